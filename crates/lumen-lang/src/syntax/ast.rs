use crate::error::SyntaxError;
use crate::syntax::token::{Keyword, Operator, Token};

/// Half-open range of token indices inside the owning statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(index: usize) -> Self {
        Self { start: index, end: index + 1 }
    }

    pub fn join(self, other: Span) -> Span {
        Span { start: self.start.min(other.start), end: self.end.max(other.end) }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

// ─── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add, Sub, Mul, Div, Mod, Pow,
    Eq, NotEq, Lt, LtEq, Gt, GtEq,
}

/// Binding power of prefix `-`, `+` and `not`: above `*`, below `^`.
pub const UNARY_PRECEDENCE: u8 = 4;

impl BinOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        Some(match op {
            Operator::Plus    => Self::Add,
            Operator::Minus   => Self::Sub,
            Operator::Star    => Self::Mul,
            Operator::Slash   => Self::Div,
            Operator::Percent => Self::Mod,
            Operator::Caret   => Self::Pow,
            Operator::EqEq    => Self::Eq,
            Operator::BangEq  => Self::NotEq,
            Operator::Lt      => Self::Lt,
            Operator::LtEq    => Self::LtEq,
            Operator::Gt      => Self::Gt,
            Operator::GtEq    => Self::GtEq,
            _ => return None,
        })
    }

    pub fn precedence(self) -> u8 {
        match self {
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => 1,
            Self::Add | Self::Sub => 2,
            Self::Mul | Self::Div | Self::Mod => 3,
            Self::Pow => 5,
        }
    }

    pub fn associativity(self) -> Assoc {
        Assoc::Left
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add   => "+",
            Self::Sub   => "-",
            Self::Mul   => "*",
            Self::Div   => "/",
            Self::Mod   => "%",
            Self::Pow   => "^",
            Self::Eq    => "==",
            Self::NotEq => "!=",
            Self::Lt    => "<",
            Self::LtEq  => "<=",
            Self::Gt    => ">",
            Self::GtEq  => ">=",
        }
    }

    pub fn apply(self, a: f32, b: f32) -> f32 {
        let truth = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            Self::Add   => a + b,
            Self::Sub   => a - b,
            Self::Mul   => a * b,
            Self::Div   => a / b,
            Self::Mod   => a % b,
            Self::Pow   => a.powf(b),
            Self::Eq    => truth(a == b),
            Self::NotEq => truth(a != b),
            Self::Lt    => truth(a < b),
            Self::LtEq  => truth(a <= b),
            Self::Gt    => truth(a > b),
            Self::GtEq  => truth(a >= b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
    /// Postfix `!`.
    Factorial,
}

// ─── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(f32, Span),
    Identifier(String, Span),
    /// `(a, b, c)`: two to four scalar components.
    Vector(Vec<Expr>, Span),
    /// `[a, b, c]`: elements concatenated in order.
    Array(Vec<Expr>, Span),
    /// `body for binder = source [when filter]`
    For {
        body: Box<Expr>,
        binder: String,
        source: Box<Expr>,
        filter: Option<Box<Expr>>,
        span: Span,
    },
    Call { name: String, args: Vec<Expr>, span: Span },
    Unary { op: UnOp, operand: Box<Expr>, span: Span },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    /// `lower...upper`
    Range { lower: Box<Expr>, upper: Box<Expr>, span: Span },
    /// `target[index]` or `target.name`
    Index { target: Box<Expr>, index: Box<Expr>, span: Span },
    /// `target.xyz` or `target[xyz]`
    Swizzle { target: Box<Expr>, components: String, span: Span },
    /// `then_expr if condition else else_expr`
    Conditional {
        then_expr: Box<Expr>,
        condition: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Constant(_, s) | Expr::Identifier(_, s) => *s,
            Expr::Vector(_, s) | Expr::Array(_, s) => *s,
            Expr::For { span, .. }
            | Expr::Call { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Range { span, .. }
            | Expr::Index { span, .. }
            | Expr::Swizzle { span, .. }
            | Expr::Conditional { span, .. } => *span,
        }
    }
}

/// True for `x`, `xy`, `zyx`, `wwww` and the like.
pub fn is_swizzle(name: &str) -> bool {
    (1..=4).contains(&name.len()) && name.bytes().all(|b| matches!(b, b'x' | b'y' | b'z' | b'w'))
}

// ─── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Points,
    Parametric,
    Polygons,
}

impl From<Keyword> for RenderKind {
    fn from(keyword: Keyword) -> Self {
        match keyword {
            Keyword::Point      => Self::Points,
            Keyword::Parametric => Self::Parametric,
            Keyword::Polygon    => Self::Polygons,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `name = body`
    Variable { name: String, body: Expr },
    /// `name(p1, p2) = body`
    Function { name: String, params: Vec<String>, body: Expr },
    /// `point body`, `parametric body`, `polygon body`
    Render { kind: RenderKind, body: Expr },
    Invalid(SyntaxError),
}

/// One parsed statement together with the tokens it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub tokens: Vec<Token>,
}

impl Statement {
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            StatementKind::Variable { name, .. } | StatementKind::Function { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Expr> {
        match &self.kind {
            StatementKind::Variable { body, .. }
            | StatementKind::Function { body, .. }
            | StatementKind::Render { body, .. } => Some(body),
            StatementKind::Invalid(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SyntaxError> {
        match &self.kind {
            StatementKind::Invalid(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.kind, StatementKind::Variable { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, StatementKind::Function { .. })
    }

    /// Source text covered by `span`, with the original spacing between tokens.
    pub fn snippet(&self, span: Span) -> String {
        let end = span.end.min(self.tokens.len());
        let mut out = String::new();
        let mut previous_end: Option<usize> = None;
        for token in self.tokens.get(span.start..end).unwrap_or_default() {
            if let Some(prev) = previous_end {
                let gap = token.offset.saturating_sub(prev);
                out.extend(std::iter::repeat_n(' ', gap));
            }
            out.push_str(&token.text);
            previous_end = Some(token.end());
        }
        out
    }

    /// Line and column of the first token in `span`.
    pub fn location(&self, span: Span) -> Option<(usize, usize)> {
        self.tokens
            .get(span.start)
            .or_else(|| self.tokens.last())
            .map(|t| (t.line, t.column))
    }
}
