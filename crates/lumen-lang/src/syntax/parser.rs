use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::syntax::ast::*;
use crate::syntax::lexer::tokenize;
use crate::syntax::token::{Bracket, Operator, Token, TokenKind};

/// Tokenizes and parses every statement in `source`.
pub fn parse_script(source: &str) -> Vec<Statement> {
    tokenize(source).into_iter().map(parse_statement).collect()
}

/// Classifies and parses one statement. Failures are recorded in the
/// returned statement as `StatementKind::Invalid` so a script load can carry on.
pub fn parse_statement(tokens: Vec<Token>) -> Statement {
    let kind = classify(&tokens).unwrap_or_else(StatementKind::Invalid);
    Statement { kind, tokens }
}

/// Parses a bare expression, as if it were the body of a declaration.
pub fn parse_expression(tokens: &[Token]) -> Result<Expr, SyntaxError> {
    check_tokens(tokens)?;
    parse_body(tokens, 0)
}

// ─── Statement level ─────────────────────────────────────────────────────────

fn classify(tokens: &[Token]) -> Result<StatementKind, SyntaxError> {
    let partners = check_tokens(tokens)?;
    let whole = Span::new(0, tokens.len());
    let assign = tokens.iter().position(|t| t.kind.is_operator(Operator::Assign));

    let Some(first) = tokens.first() else {
        return Err(SyntaxError::new(SyntaxErrorKind::MissingExpression, whole));
    };

    match (first.kind, tokens.get(1).map(|t| t.kind)) {
        (TokenKind::Identifier, Some(TokenKind::Bracket(Bracket::OpenParen))) => {
            let close = partners[1].unwrap_or(tokens.len() - 1);
            let declares = tokens
                .get(close + 1)
                .is_some_and(|t| t.kind.is_operator(Operator::Assign));
            if declares {
                let params = parse_params(tokens, 2, close)?;
                let body = parse_body(tokens, close + 2)?;
                Ok(StatementKind::Function { name: first.text.clone(), params, body })
            } else if assign.is_some() {
                Err(SyntaxError::new(
                    SyntaxErrorKind::InvalidFunctionDeclaration,
                    Span::new(0, close + 1),
                ))
            } else {
                Err(SyntaxError::new(SyntaxErrorKind::UnknownStatement, whole))
            }
        }
        (TokenKind::Identifier, Some(TokenKind::Operator(Operator::Assign))) => {
            let body = parse_body(tokens, 2)?;
            Ok(StatementKind::Variable { name: first.text.clone(), body })
        }
        (TokenKind::Keyword(keyword), _) => {
            let body = parse_body(tokens, 1)?;
            Ok(StatementKind::Render { kind: keyword.into(), body })
        }
        (TokenKind::Identifier, _) if assign.is_some() => {
            let end = assign.map_or(tokens.len(), |i| i + 1);
            Err(SyntaxError::new(SyntaxErrorKind::InvalidVariableDeclaration, Span::new(0, end)))
        }
        _ => Err(SyntaxError::new(SyntaxErrorKind::UnknownStatement, whole)),
    }
}

/// Rejects unknown tokens and unbalanced brackets. Returns, for each
/// bracket token, the index of its partner.
fn check_tokens(tokens: &[Token]) -> Result<Vec<Option<usize>>, SyntaxError> {
    if let Some(i) = tokens.iter().position(|t| t.kind == TokenKind::Unknown) {
        return Err(SyntaxError::new(SyntaxErrorKind::UnknownToken, Span::single(i)));
    }

    let mut partners = vec![None; tokens.len()];
    let mut open: Vec<(usize, Bracket)> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let TokenKind::Bracket(bracket) = token.kind else { continue };
        if bracket.is_open() {
            open.push((i, bracket));
            continue;
        }
        match open.pop() {
            Some((j, opener)) if opener.closer() == bracket => {
                partners[i] = Some(j);
                partners[j] = Some(i);
            }
            _ => return Err(SyntaxError::new(SyntaxErrorKind::UnmatchedBracket, Span::single(i))),
        }
    }

    match open.last() {
        Some(&(i, _)) => Err(SyntaxError::new(SyntaxErrorKind::MissingClosingBracket, Span::single(i))),
        None => Ok(partners),
    }
}

/// `ident (, ident)*` between the declaration's parentheses.
fn parse_params(tokens: &[Token], start: usize, close: usize) -> Result<Vec<String>, SyntaxError> {
    let mut params: Vec<String> = Vec::new();
    let mut i = start;
    while i < close {
        let token = &tokens[i];
        if token.kind != TokenKind::Identifier || params.contains(&token.text) {
            return Err(SyntaxError::new(SyntaxErrorKind::InvalidParameter, Span::single(i)));
        }
        params.push(token.text.clone());
        i += 1;
        if i < close {
            if tokens[i].kind != TokenKind::Comma || i + 1 == close {
                return Err(SyntaxError::new(SyntaxErrorKind::InvalidParameter, Span::single(i)));
            }
            i += 1;
        }
    }
    Ok(params)
}

fn parse_body(tokens: &[Token], start: usize) -> Result<Expr, SyntaxError> {
    if start >= tokens.len() {
        let at = start.min(tokens.len()).saturating_sub(1);
        return Err(SyntaxError::new(SyntaxErrorKind::MissingExpression, Span::single(at)));
    }
    let mut parser = Parser { tokens, pos: start, array_context: true };
    let expr = parser.parse_for()?;
    if parser.pos < tokens.len() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

// ─── Expression parser ───────────────────────────────────────────────────────

/// Recursive descent over one statement's tokens.
///
/// Levels, loosest first: `for`, `...`, `if/else`, binary operators by
/// precedence (prefix operators sit between `* / %` and `^`), postfix
/// (`[..]`, `.`, `!`), primary.
///
/// `array_context` is set at the top of a declaration body, inside `[...]`
/// and inside index brackets: the places where `for` and `...` may appear.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    array_context: bool,
}

impl<'t> Parser<'t> {
    fn parse_for(&mut self) -> Result<Expr, SyntaxError> {
        let mut body = self.parse_ellipsis()?;

        while self.check_op(Operator::For) {
            let at = self.pos;
            if !self.array_context {
                return Err(self.error(SyntaxErrorKind::MisplacedFor, Span::single(at)));
            }
            self.advance();

            let binder = match self.peek() {
                Some(t) if t.kind == TokenKind::Identifier => t.text.clone(),
                _ => return Err(self.error(SyntaxErrorKind::MisplacedFor, Span::single(at))),
            };
            self.advance();
            if !self.matches_op(Operator::Assign) {
                return Err(self.error(SyntaxErrorKind::MisplacedFor, Span::new(at, self.pos)));
            }

            let source = self.parse_ellipsis()?;
            let filter = if self.matches_op(Operator::When) {
                Some(Box::new(self.parse_conditional()?))
            } else {
                None
            };

            let span = body.span().join(Span::new(at, self.pos));
            body = Expr::For { body: Box::new(body), binder, source: Box::new(source), filter, span };
        }

        Ok(body)
    }

    fn parse_ellipsis(&mut self) -> Result<Expr, SyntaxError> {
        let lower = self.parse_conditional()?;
        if !self.check_op(Operator::Ellipsis) {
            return Ok(lower);
        }

        let at = self.pos;
        if !self.array_context {
            return Err(self.error(SyntaxErrorKind::MisplacedEllipsis, Span::single(at)));
        }
        self.advance();
        let upper = self.parse_conditional()?;
        if self.check_op(Operator::Ellipsis) {
            return Err(self.error(SyntaxErrorKind::MisplacedEllipsis, Span::single(self.pos)));
        }

        let span = lower.span().join(upper.span());
        Ok(Expr::Range { lower: Box::new(lower), upper: Box::new(upper), span })
    }

    /// `a if c else b`, right-associative.
    fn parse_conditional(&mut self) -> Result<Expr, SyntaxError> {
        let then_expr = self.parse_binary(1)?;
        if !self.check_op(Operator::If) {
            return Ok(then_expr);
        }

        let at = self.pos;
        self.advance();
        let condition = self.parse_binary(1)?;
        if !self.matches_op(Operator::Else) {
            return Err(self.error(SyntaxErrorKind::MisplacedTernary, Span::single(at)));
        }
        let else_expr = self.parse_conditional()?;

        let span = then_expr.span().join(else_expr.span());
        Ok(Expr::Conditional {
            then_expr: Box::new(then_expr),
            condition: Box::new(condition),
            else_expr: Box::new(else_expr),
            span,
        })
    }

    /// Precedence climbing over the binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;

        while let Some(op) = self.peek_binop() {
            let prec = op.precedence();
            if prec < min_prec { break; }
            self.advance();

            let next_min = match op.associativity() {
                Assoc::Left => prec + 1,
                Assoc::Right => prec,
            };
            let right = self.parse_binary(next_min)?;
            let span = left.span().join(right.span());
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Operator(Operator::Minus)) => UnOp::Neg,
            Some(TokenKind::Operator(Operator::Plus)) => UnOp::Pos,
            Some(TokenKind::Operator(Operator::Not)) => UnOp::Not,
            _ => return self.parse_postfix(),
        };
        let at = self.pos;
        self.advance();
        let operand = self.parse_binary(UNARY_PRECEDENCE)?;
        let span = Span::single(at).join(operand.span());
        Ok(Expr::Unary { op, operand: Box::new(operand), span })
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek_kind() {
                // target[index] or target[xyz]
                Some(TokenKind::Bracket(Bracket::OpenSquare)) => {
                    let open = self.pos;
                    self.reject_constant_target(&expr, open)?;
                    self.advance();
                    if self.check_bracket(Bracket::CloseSquare) {
                        return Err(self.error(SyntaxErrorKind::MissingExpression, Span::new(open, self.pos + 1)));
                    }
                    let index = self.with_context(true, |p| p.parse_for())?;
                    self.expect_bracket(Bracket::CloseSquare)?;
                    let span = expr.span().join(Span::new(open, self.pos));
                    expr = self.index_node(expr, index, span)?;
                }

                // target.xyz, target.name, target.(expr)
                Some(TokenKind::Operator(Operator::Dot)) => {
                    let dot = self.pos;
                    self.reject_constant_target(&expr, dot)?;
                    self.advance();
                    let index = match self.peek_kind() {
                        Some(TokenKind::Identifier) => {
                            let name = self.tokens[self.pos].text.clone();
                            self.advance();
                            Expr::Identifier(name, Span::single(self.pos - 1))
                        }
                        Some(TokenKind::Number) => {
                            return Err(self.error(SyntaxErrorKind::IndexWithConstant, Span::single(self.pos)));
                        }
                        Some(TokenKind::Bracket(Bracket::OpenParen)) => self.parse_primary()?,
                        _ => return Err(self.error(SyntaxErrorKind::MissingExpression, Span::single(dot))),
                    };
                    let span = expr.span().join(index.span());
                    expr = self.index_node(expr, index, span)?;
                }

                Some(TokenKind::Operator(Operator::Bang)) => {
                    let span = expr.span().join(Span::single(self.pos));
                    self.advance();
                    expr = Expr::Unary { op: UnOp::Factorial, operand: Box::new(expr), span };
                }

                // `(x)(y)`, `2(3)`: only a bare name can be called
                Some(TokenKind::Bracket(Bracket::OpenParen)) => {
                    let span = expr.span().join(Span::single(self.pos));
                    return Err(self.error(SyntaxErrorKind::InvalidFunctionCall, span));
                }

                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let Some(token) = self.peek() else {
            return Err(self.missing_expression());
        };
        let at = self.pos;

        match token.kind {
            TokenKind::Number => {
                let value = token
                    .text
                    .parse::<f32>()
                    .map_err(|_| self.error(SyntaxErrorKind::InvalidNumber, Span::single(at)))?;
                self.advance();
                Ok(Expr::Constant(value, Span::single(at)))
            }

            TokenKind::Identifier => {
                let name = token.text.clone();
                self.advance();
                if !self.check_bracket(Bracket::OpenParen) {
                    return Ok(Expr::Identifier(name, Span::single(at)));
                }
                self.advance();
                let args = self.with_context(false, |p| p.parse_list(Bracket::CloseParen))?;
                Ok(Expr::Call { name, args, span: Span::new(at, self.pos) })
            }

            TokenKind::Bracket(Bracket::OpenParen) => {
                self.advance();
                let mut items = self.with_context(false, |p| p.parse_list(Bracket::CloseParen))?;
                let span = Span::new(at, self.pos);
                match items.len() {
                    0 => Err(self.error(SyntaxErrorKind::MissingExpression, span)),
                    1 => Ok(items.remove(0)),
                    2..=4 => Ok(Expr::Vector(items, span)),
                    _ => Err(self.error(SyntaxErrorKind::TooManyComponents, span)),
                }
            }

            TokenKind::Bracket(Bracket::OpenSquare) => {
                self.advance();
                let items = self.with_context(true, |p| p.parse_list(Bracket::CloseSquare))?;
                let span = Span::new(at, self.pos);
                if items.is_empty() {
                    return Err(self.error(SyntaxErrorKind::MissingExpression, span));
                }
                Ok(Expr::Array(items, span))
            }

            TokenKind::Operator(op) => {
                let kind = match op {
                    Operator::For => SyntaxErrorKind::MisplacedFor,
                    Operator::If | Operator::Else | Operator::When => SyntaxErrorKind::MisplacedTernary,
                    Operator::Ellipsis => SyntaxErrorKind::MisplacedEllipsis,
                    Operator::Assign => SyntaxErrorKind::MisplacedForAssignment,
                    _ => SyntaxErrorKind::MisplacedOperator,
                };
                Err(self.error(kind, Span::single(at)))
            }

            _ => Err(self.error(SyntaxErrorKind::MissingExpression, Span::single(at))),
        }
    }

    /// Comma-separated items up to and including `closer`; the opener is
    /// already consumed.
    fn parse_list(&mut self, closer: Bracket) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        if self.check_bracket(closer) {
            self.advance();
            return Ok(items);
        }

        loop {
            items.push(self.parse_for()?);
            if self.matches_kind(TokenKind::Comma) { continue; }
            self.expect_bracket(closer)?;
            return Ok(items);
        }
    }

    // ─── Node helpers ────────────────────────────────────────────────────────

    fn reject_constant_target(&self, target: &Expr, at: usize) -> Result<(), SyntaxError> {
        match target {
            Expr::Constant(_, span) => {
                Err(self.error(SyntaxErrorKind::InvalidIndexTarget, span.join(Span::single(at))))
            }
            _ => Ok(()),
        }
    }

    fn index_node(&self, target: Expr, index: Expr, span: Span) -> Result<Expr, SyntaxError> {
        match index {
            Expr::Identifier(name, _) if is_swizzle(&name) => {
                Ok(Expr::Swizzle { target: Box::new(target), components: name, span })
            }
            Expr::Vector(_, vspan) => Err(self.error(SyntaxErrorKind::IndexWithVector, vspan)),
            index => Ok(Expr::Index { target: Box::new(target), index: Box::new(index), span }),
        }
    }

    // ─── Token primitives ────────────────────────────────────────────────────

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_binop(&self) -> Option<BinOp> {
        match self.peek_kind()? {
            TokenKind::Operator(op) => BinOp::from_operator(op),
            _ => None,
        }
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() { self.pos += 1; }
    }

    fn check_op(&self, op: Operator) -> bool {
        self.peek_kind() == Some(TokenKind::Operator(op))
    }

    fn check_bracket(&self, bracket: Bracket) -> bool {
        self.peek_kind() == Some(TokenKind::Bracket(bracket))
    }

    fn matches_op(&mut self, op: Operator) -> bool {
        self.matches_kind(TokenKind::Operator(op))
    }

    fn matches_kind(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) { self.advance(); true } else { false }
    }

    fn expect_bracket(&mut self, bracket: Bracket) -> Result<(), SyntaxError> {
        if self.check_bracket(bracket) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn with_context<T>(
        &mut self,
        array_context: bool,
        f: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        let saved = std::mem::replace(&mut self.array_context, array_context);
        let result = f(self);
        self.array_context = saved;
        result
    }

    fn error(&self, kind: SyntaxErrorKind, span: Span) -> SyntaxError {
        SyntaxError::new(kind, span)
    }

    fn missing_expression(&self) -> SyntaxError {
        let at = self.pos.min(self.tokens.len()).saturating_sub(1);
        self.error(SyntaxErrorKind::MissingExpression, Span::single(at))
    }

    /// Error for a token that cannot continue the expression parsed so far.
    fn unexpected(&self) -> SyntaxError {
        let Some(token) = self.peek() else {
            return self.missing_expression();
        };
        let kind = match token.kind {
            TokenKind::Comma => SyntaxErrorKind::MisplacedComma,
            TokenKind::Operator(Operator::Assign) => SyntaxErrorKind::MisplacedForAssignment,
            TokenKind::Operator(Operator::If | Operator::Else | Operator::When) => {
                SyntaxErrorKind::MisplacedTernary
            }
            TokenKind::Operator(Operator::Ellipsis) => SyntaxErrorKind::MisplacedEllipsis,
            TokenKind::Operator(Operator::For) => SyntaxErrorKind::MisplacedFor,
            TokenKind::Operator(_) => SyntaxErrorKind::MisplacedOperator,
            _ => SyntaxErrorKind::MissingOperator,
        };
        self.error(kind, Span::single(self.pos))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
