use crate::syntax::token::{Bracket, Operator, Token, TokenKind, classify_word};

/// Splits source text into statements and each statement into tokens.
///
/// Statements end at `\n` or `;`. A `\` followed only by blanks up to the end
/// of the line joins the next line onto the current statement. `//` starts a
/// comment running to the end of the line. Unrecognised characters become
/// `Unknown` tokens; the parser reports them.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source: source.as_bytes(), pos: 0, line: 1, column: 1 }
    }

    pub fn tokenize(mut self) -> Vec<Vec<Token>> {
        let mut statements = Vec::new();
        let mut current = Vec::new();

        loop {
            self.skip_blanks();
            if self.is_at_end() { break; }

            match self.peek() {
                b'\n' | b';' => {
                    self.advance();
                    if !current.is_empty() {
                        statements.push(std::mem::take(&mut current));
                    }
                }
                b'\\' if self.continues_line() => self.skip_continuation(),
                b'/' if self.peek_next() == b'/' => self.skip_line(),
                _ => current.push(self.next_token()),
            }
        }

        if !current.is_empty() {
            statements.push(current);
        }
        statements
    }

    fn next_token(&mut self) -> Token {
        let (line, column, offset) = (self.line, self.column, self.pos);
        let ch = self.advance();

        let kind = match ch {
            b'0'..=b'9' => { self.read_number(); TokenKind::Number }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                self.read_word();
                classify_word(self.text_from(offset).as_str())
            }

            b'.' => {
                if self.peek() == b'.' && self.peek_next() == b'.' {
                    self.advance();
                    self.advance();
                    TokenKind::Operator(Operator::Ellipsis)
                } else if self.peek() == b'.' {
                    self.advance();
                    TokenKind::Unknown
                } else {
                    TokenKind::Operator(Operator::Dot)
                }
            }
            b'+' => TokenKind::Operator(Operator::Plus),
            b'-' => TokenKind::Operator(Operator::Minus),
            b'*' => TokenKind::Operator(Operator::Star),
            b'/' => TokenKind::Operator(Operator::Slash),
            b'%' => TokenKind::Operator(Operator::Percent),
            b'^' => TokenKind::Operator(Operator::Caret),
            b'!' => self.with_equals(Operator::Bang, Operator::BangEq),
            b'=' => self.with_equals(Operator::Assign, Operator::EqEq),
            b'<' => self.with_equals(Operator::Lt, Operator::LtEq),
            b'>' => self.with_equals(Operator::Gt, Operator::GtEq),

            b'(' => TokenKind::Bracket(Bracket::OpenParen),
            b')' => TokenKind::Bracket(Bracket::CloseParen),
            b'[' => TokenKind::Bracket(Bracket::OpenSquare),
            b']' => TokenKind::Bracket(Bracket::CloseSquare),
            b',' => TokenKind::Comma,

            other => {
                // keep multi-byte characters in one token
                if other >= 0x80 {
                    while !self.is_at_end() && (self.peek() & 0xC0) == 0x80 {
                        self.advance();
                    }
                }
                TokenKind::Unknown
            }
        };

        Token::new(kind, self.text_from(offset), line, column, offset)
    }

    // ─── Primitives ──────────────────────────────────────────────────────────

    fn advance(&mut self) -> u8 {
        let ch = self.source[self.pos];
        self.pos += 1;
        if ch == b'\n' { self.line += 1; self.column = 1; }
        else { self.column += 1; }
        ch
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.source[self.pos] }
    }

    fn peek_next(&self) -> u8 {
        if self.pos + 1 >= self.source.len() { 0 } else { self.source[self.pos + 1] }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn text_from(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.source[start..self.pos]).into_owned()
    }

    fn with_equals(&mut self, single: Operator, double: Operator) -> TokenKind {
        if self.peek() == b'=' {
            self.advance();
            TokenKind::Operator(double)
        } else {
            TokenKind::Operator(single)
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), b' ' | b'\t' | b'\r') && !self.is_at_end() {
            self.advance();
        }
    }

    fn skip_line(&mut self) {
        while !self.is_at_end() && self.peek() != b'\n' { self.advance(); }
    }

    /// True when the `\` under the cursor is followed only by blanks up to a newline.
    fn continues_line(&self) -> bool {
        let mut i = self.pos + 1;
        while i < self.source.len() && matches!(self.source[i], b' ' | b'\t' | b'\r') {
            i += 1;
        }
        i >= self.source.len() || self.source[i] == b'\n'
    }

    fn skip_continuation(&mut self) {
        self.advance(); // `\`
        while !self.is_at_end() {
            if self.advance() == b'\n' { break; }
        }
    }

    // ─── Readers ─────────────────────────────────────────────────────────────

    /// Digits with dotted digit groups. `1.2.3` stays one (unreadable) token so
    /// the parser can reject it; a `.` not followed by a digit ends the number,
    /// which keeps `3...7` and `v.x` intact.
    fn read_number(&mut self) {
        while self.peek().is_ascii_digit() { self.advance(); }
        while self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() { self.advance(); }
        }
    }

    fn read_word(&mut self) {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
    }
}

/// Convenience wrapper over `Lexer::tokenize`.
pub fn tokenize(source: &str) -> Vec<Vec<Token>> {
    Lexer::new(source).tokenize()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::token::Keyword;

    fn kinds(src: &str) -> Vec<Vec<TokenKind>> {
        tokenize(src)
            .into_iter()
            .map(|s| s.into_iter().map(|t| t.kind).collect())
            .collect()
    }

    fn texts(src: &str) -> Vec<String> {
        tokenize(src).into_iter().flatten().map(|t| t.text).collect()
    }

    #[test]
    fn empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("\n ; \n").is_empty());
    }

    #[test]
    fn statements_split_on_newline_and_semicolon() {
        assert_eq!(tokenize("a = 1\nb = 2; c = 3").len(), 3);
    }

    #[test]
    fn backslash_joins_lines() {
        let statements = tokenize("a = 1 + \\\n  2\nb = 3");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].len(), 5);
        assert_eq!(statements[0][4].line, 2);
    }

    #[test]
    fn stray_backslash_is_unknown() {
        assert_eq!(kinds("a \\ b")[0][1], TokenKind::Unknown);
    }

    #[test]
    fn numbers() {
        assert_eq!(texts("12 1.5 0.25"), vec!["12", "1.5", "0.25"]);
    }

    #[test]
    fn ellipsis_not_consumed_by_number() {
        assert_eq!(
            kinds("3...7")[0],
            vec![TokenKind::Number, TokenKind::Operator(Operator::Ellipsis), TokenKind::Number]
        );
    }

    #[test]
    fn repeated_dots_stay_in_number() {
        assert_eq!(texts("1.2.3"), vec!["1.2.3"]);
    }

    #[test]
    fn double_dot_is_unknown() {
        assert_eq!(kinds("a..b")[0][1], TokenKind::Unknown);
    }

    #[test]
    fn swizzle_dot() {
        assert_eq!(
            kinds("v.xy")[0],
            vec![TokenKind::Identifier, TokenKind::Operator(Operator::Dot), TokenKind::Identifier]
        );
    }

    #[test]
    fn keywords_and_word_operators() {
        assert_eq!(kinds("point")[0], vec![TokenKind::Keyword(Keyword::Point)]);
        assert_eq!(kinds("parametric")[0], vec![TokenKind::Keyword(Keyword::Parametric)]);
        assert_eq!(kinds("polygon")[0], vec![TokenKind::Keyword(Keyword::Polygon)]);
        assert_eq!(kinds("for")[0], vec![TokenKind::Operator(Operator::For)]);
        assert_eq!(kinds("format")[0], vec![TokenKind::Identifier]);
        assert_eq!(kinds("not")[0], vec![TokenKind::Operator(Operator::Not)]);
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(kinds("==")[0], vec![TokenKind::Operator(Operator::EqEq)]);
        assert_eq!(kinds("!=")[0], vec![TokenKind::Operator(Operator::BangEq)]);
        assert_eq!(kinds("<=")[0], vec![TokenKind::Operator(Operator::LtEq)]);
        assert_eq!(kinds(">=")[0], vec![TokenKind::Operator(Operator::GtEq)]);
        assert_eq!(kinds("3!")[0][1], TokenKind::Operator(Operator::Bang));
    }

    #[test]
    fn brackets_and_comma() {
        assert_eq!(
            kinds("([,])")[0],
            vec![
                TokenKind::Bracket(Bracket::OpenParen),
                TokenKind::Bracket(Bracket::OpenSquare),
                TokenKind::Comma,
                TokenKind::Bracket(Bracket::CloseSquare),
                TokenKind::Bracket(Bracket::CloseParen),
            ]
        );
    }

    #[test]
    fn comment_skipped() {
        assert_eq!(texts("a = 1 // trailing\n// whole line\nb"), vec!["a", "=", "1", "b"]);
    }

    #[test]
    fn unknown_characters() {
        assert_eq!(kinds("a $ b")[0][1], TokenKind::Unknown);
        let tokens = tokenize("x = π");
        assert_eq!(tokens[0][2].kind, TokenKind::Unknown);
        assert_eq!(tokens[0][2].text, "π");
    }

    #[test]
    fn line_column_and_offset_tracking() {
        let statements = tokenize("a\n  bc = 1");
        let b = &statements[1][0];
        assert_eq!((b.line, b.column, b.offset), (2, 3, 4));
        assert_eq!(b.end(), 6);
    }
}
