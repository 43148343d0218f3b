mod expr;

use super::lexeme::Lexeme;
use super::{Expr, Program, Statement};
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};

const MAX_NESTING_DEPTH: u32 = 256;

pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_with_help(
                "nesting depth exceeded (maximum 256 levels)",
                "split the expression with `let` bindings",
            );
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn parse_program(mut self) -> Result<Program, Vec<Diagnostic>> {
        let mut statements = Vec::new();
        while !self.at(&Lexeme::Eof) {
            let before = self.diagnostics.len();
            if let Some(stmt) = self.parse_statement() {
                statements.push(stmt);
            }
            if self.diagnostics.len() > before {
                self.recover_to_line_end();
            } else if !self.eat(&Lexeme::Newline) {
                self.error_at_current(&format!(
                    "expected end of line, found {}",
                    self.peek().description()
                ));
                self.recover_to_line_end();
            }
        }
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Option<Spanned<Statement>> {
        let start = self.current_span();
        match self.peek() {
            Lexeme::Arg => {
                self.advance();
                let name = self.expect_ident();
                let dims = if self.eat(&Lexeme::Colon) {
                    self.parse_dims()
                } else {
                    Vec::new()
                };
                let span = start.merge(self.prev_span());
                Some(Spanned::new(Statement::Arg { name, dims }, span))
            }
            Lexeme::Let => {
                self.advance();
                let name = self.expect_ident();
                self.expect(&Lexeme::Eq);
                let value = self.parse_expr();
                let span = start.merge(value.span);
                Some(Spanned::new(Statement::Let { name, value }, span))
            }
            Lexeme::Out => {
                self.advance();
                let value = self.parse_expr();
                let span = start.merge(value.span);
                Some(Spanned::new(Statement::Out(value), span))
            }
            other => {
                let found = other.description();
                self.error_with_help(
                    &format!("expected 'arg', 'let' or 'out', found {}", found),
                    "each line declares an argument, binds a name or marks an output",
                );
                None
            }
        }
    }

    /// `[d0, d1, ...]`; `[]` is a scalar.
    fn parse_dims(&mut self) -> Vec<usize> {
        let mut dims = Vec::new();
        self.expect(&Lexeme::LBracket);
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Newline) && !self.at(&Lexeme::Eof)
        {
            match self.peek().clone() {
                Lexeme::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                    self.advance();
                    dims.push(n as usize);
                }
                other => {
                    self.error_at_current(&format!(
                        "expected an extent, found {}",
                        other.description()
                    ));
                    return dims;
                }
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBracket);
        dims
    }

    fn recover_to_line_end(&mut self) {
        while !self.at(&Lexeme::Newline) && !self.at(&Lexeme::Eof) {
            self.advance();
        }
        self.eat(&Lexeme::Newline);
    }

    // --- Token helpers ---

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Span {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            ));
            self.current_span()
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected identifier, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        self.diagnostics.push(
            Diagnostic::error(msg.to_string(), self.current_span()).with_help(help.to_string()),
        );
    }
}

/// Placeholder expression produced during error recovery.
fn error_expr(span: Span) -> Spanned<Expr> {
    Spanned::new(Expr::Number(0.0), span)
}
