use thiserror::Error;

use crate::syntax::ast::Span;

/// Parse-time failures. Codes are prefixed `P`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxErrorKind {
    #[error("unknown token")]
    UnknownToken,
    #[error("invalid variable declaration")]
    InvalidVariableDeclaration,
    #[error("invalid function declaration")]
    InvalidFunctionDeclaration,
    #[error("invalid function parameter")]
    InvalidParameter,
    #[error("unknown statement")]
    UnknownStatement,
    #[error("missing expression")]
    MissingExpression,
    #[error("missing closing bracket")]
    MissingClosingBracket,
    #[error("unmatched closing bracket")]
    UnmatchedBracket,
    #[error("missing operator")]
    MissingOperator,
    #[error("too many vector components (at most 4)")]
    TooManyComponents,
    #[error("misplaced comma")]
    MisplacedComma,
    #[error("misplaced for-assignment")]
    MisplacedForAssignment,
    #[error("`for` is only valid inside an array")]
    MisplacedFor,
    #[error("`...` is only valid inside an array")]
    MisplacedEllipsis,
    #[error("misplaced conditional operator")]
    MisplacedTernary,
    #[error("misplaced operator")]
    MisplacedOperator,
    #[error("a constant cannot be indexed")]
    InvalidIndexTarget,
    #[error("cannot index with a constant")]
    IndexWithConstant,
    #[error("cannot index with a vector")]
    IndexWithVector,
    #[error("invalid function call")]
    InvalidFunctionCall,
    #[error("unreadable numeric literal")]
    InvalidNumber,
}

impl SyntaxErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownToken               => "P001",
            Self::InvalidVariableDeclaration => "P002",
            Self::InvalidFunctionDeclaration => "P003",
            Self::InvalidParameter           => "P004",
            Self::UnknownStatement           => "P005",
            Self::MissingExpression          => "P006",
            Self::MissingClosingBracket      => "P007",
            Self::UnmatchedBracket           => "P008",
            Self::MissingOperator            => "P009",
            Self::TooManyComponents          => "P010",
            Self::MisplacedComma             => "P011",
            Self::MisplacedForAssignment     => "P012",
            Self::MisplacedFor               => "P013",
            Self::MisplacedEllipsis          => "P014",
            Self::MisplacedTernary           => "P015",
            Self::MisplacedOperator          => "P016",
            Self::InvalidIndexTarget         => "P017",
            Self::IndexWithConstant          => "P018",
            Self::IndexWithVector            => "P019",
            Self::InvalidFunctionCall        => "P020",
            Self::InvalidNumber              => "P021",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{}] {kind}", .kind.code())]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    /// Token range inside the owning statement.
    pub span: Span,
}

impl SyntaxError {
    pub fn new(kind: SyntaxErrorKind, span: Span) -> Self {
        Self { kind, span }
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Evaluation-time failures. Codes are prefixed `R`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    #[error("undefined identifier `{0}`")]
    UndefinedIdentifier(String),
    #[error("vector components must be scalars")]
    VectorInsideVector,
    #[error("array elements have differing dimensions")]
    NonUniformArray,
    #[error("arrays cannot be nested inside arrays")]
    ArrayInsideArray,
    #[error("array is too large")]
    ArrayTooLarge,
    #[error("invalid array range")]
    InvalidArrayRange,
    #[error("`{0}` is a function, not a variable")]
    IdentifierNotVariable(String),
    #[error("`{0}` is not a function")]
    IdentifierNotFunction(String),
    #[error("`{name}` expects {expected} parameters, got {found}")]
    IncorrectParameterCount { name: String, expected: usize, found: usize },
    #[error("`{name}` does not accept {found} arguments")]
    IncorrectArgumentCount { name: String, found: usize },
    #[error("invalid argument to `{name}`: {reason}")]
    InvalidArgumentType { name: String, reason: &'static str },
    #[error("`...` operands must be single scalars")]
    InvalidEllipsisOperand,
    #[error("cannot index with a vector")]
    IndexingWithVector,
    #[error("vectors of dimension {0} and {1} cannot be combined")]
    DifferingLengthVectors(usize, usize),
    #[error("invalid swizzle `{0}`")]
    InvalidSwizzling(String),
    #[error("`{0}` is not implemented")]
    NotImplemented(String),
    #[error("`{0}` depends on itself")]
    CyclicDefinition(String),
    #[error("call depth exceeded {0}")]
    RecursionLimit(usize),
}

impl RuntimeErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UndefinedIdentifier(_)        => "R001",
            Self::VectorInsideVector            => "R002",
            Self::NonUniformArray               => "R003",
            Self::ArrayInsideArray              => "R004",
            Self::ArrayTooLarge                 => "R005",
            Self::InvalidArrayRange             => "R006",
            Self::IdentifierNotVariable(_)      => "R007",
            Self::IdentifierNotFunction(_)      => "R008",
            Self::IncorrectParameterCount { .. } => "R009",
            Self::IncorrectArgumentCount { .. } => "R010",
            Self::InvalidArgumentType { .. }    => "R011",
            Self::InvalidEllipsisOperand        => "R012",
            Self::IndexingWithVector            => "R013",
            Self::DifferingLengthVectors(..)    => "R014",
            Self::InvalidSwizzling(_)           => "R015",
            Self::NotImplemented(_)             => "R016",
            Self::CyclicDefinition(_)           => "R017",
            Self::RecursionLimit(_)             => "R018",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{}] {kind}", .kind.code())]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub span: Span,
    /// Statement whose tokens `span` indexes into; `None` for ad-hoc expressions.
    pub statement: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, span: Span) -> Self {
        Self { kind, span, statement: None }
    }

    pub fn in_statement(mut self, name: Option<&str>) -> Self {
        if self.statement.is_none() {
            self.statement = name.map(str::to_string);
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Either failure, for entry points that both parse and evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
