/// Declaration keywords that open a render statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Point,
    Parametric,
    Polygon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Caret,    // ^
    Bang,     // !
    Dot,      // .
    Ellipsis, // ...
    Assign,   // =
    EqEq,     // ==
    BangEq,   // !=
    Lt,       // <
    LtEq,     // <=
    Gt,       // >
    GtEq,     // >=

    // Word operators
    For,
    When,
    If,
    Else,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    OpenParen,
    CloseParen,
    OpenSquare,
    CloseSquare,
}

impl Bracket {
    pub fn is_open(self) -> bool {
        matches!(self, Self::OpenParen | Self::OpenSquare)
    }

    /// The closing bracket paired with an opening one.
    pub fn closer(self) -> Self {
        match self {
            Self::OpenParen | Self::CloseParen => Self::CloseParen,
            Self::OpenSquare | Self::CloseSquare => Self::CloseSquare,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier,
    Number,
    Bracket(Bracket),
    Operator(Operator),
    /// The only symbol is `,`.
    Comma,
    Unknown,
}

impl TokenKind {
    /// Tokens that can end an operand: identifiers, numbers and closing brackets.
    pub fn is_operable(&self) -> bool {
        matches!(
            self,
            Self::Identifier
                | Self::Number
                | Self::Bracket(Bracket::CloseParen)
                | Self::Bracket(Bracket::CloseSquare)
        )
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        *self == Self::Operator(op)
    }
}

/// Maps a word to its keyword or word-operator kind, or returns `Identifier`.
pub fn classify_word(word: &str) -> TokenKind {
    match word {
        "point"      => TokenKind::Keyword(Keyword::Point),
        "parametric" => TokenKind::Keyword(Keyword::Parametric),
        "polygon"    => TokenKind::Keyword(Keyword::Polygon),
        "for"        => TokenKind::Operator(Operator::For),
        "when"       => TokenKind::Operator(Operator::When),
        "if"         => TokenKind::Operator(Operator::If),
        "else"       => TokenKind::Operator(Operator::Else),
        "not"        => TokenKind::Operator(Operator::Not),
        _            => TokenKind::Identifier,
    }
}

// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
    /// Byte offset of the token in the script source.
    pub offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize, offset: usize) -> Self {
        Self { kind, text: text.into(), line, column, offset }
    }

    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}
