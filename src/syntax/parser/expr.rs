use super::{error_expr, Parser};
use crate::span::Spanned;
use crate::syntax::lexeme::Lexeme;
use crate::syntax::{BinOp, Expr};

/// Binding power of prefix minus; above every infix operator.
const PREFIX_BP: u8 = 9;

impl Parser {
    pub(super) fn parse_expr(&mut self) -> Spanned<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Spanned<Expr> {
        if !self.enter_nesting() {
            let span = self.current_span();
            self.exit_nesting();
            return error_expr(span);
        }

        let lhs = if self.at(&Lexeme::Minus) {
            let start = self.current_span();
            self.advance();
            let operand = self.parse_expr_bp(PREFIX_BP);
            let span = start.merge(operand.span);
            Spanned::new(Expr::Neg(Box::new(operand)), span)
        } else {
            let primary = self.parse_primary();
            self.parse_postfix(primary)
        };
        let mut lhs = lhs;

        loop {
            let op = match self.peek() {
                Lexeme::EqEq => BinOp::Eq,
                Lexeme::BangEq => BinOp::Ne,
                Lexeme::Lt => BinOp::Lt,
                Lexeme::LtEq => BinOp::Le,
                Lexeme::Gt => BinOp::Gt,
                Lexeme::GtEq => BinOp::Ge,
                Lexeme::Plus => BinOp::Add,
                Lexeme::Minus => BinOp::Sub,
                Lexeme::Star => BinOp::Mul,
                Lexeme::Slash => BinOp::Div,
                _ => break,
            };

            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }

            self.advance();
            let rhs = self.parse_expr_bp(r_bp);
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        self.exit_nesting();
        lhs
    }

    /// Postfix `[index]` chains.
    fn parse_postfix(&mut self, mut expr: Spanned<Expr>) -> Spanned<Expr> {
        while self.at(&Lexeme::LBracket) {
            self.advance();
            let index = self.parse_expr();
            self.expect(&Lexeme::RBracket);
            let span = expr.span.merge(self.prev_span());
            expr = Spanned::new(
                Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                },
                span,
            );
        }
        expr
    }

    fn parse_primary(&mut self) -> Spanned<Expr> {
        let start = self.current_span();

        match self.peek().clone() {
            Lexeme::Number(n) => {
                self.advance();
                Spanned::new(Expr::Number(n), start)
            }
            Lexeme::Ident(name) => {
                self.advance();
                if self.at(&Lexeme::LParen) {
                    let args = self.parse_delimited(&Lexeme::LParen, &Lexeme::RParen);
                    let span = start.merge(self.prev_span());
                    Spanned::new(
                        Expr::Call {
                            name: Spanned::new(name, start),
                            args,
                        },
                        span,
                    )
                } else {
                    Spanned::new(Expr::Name(name), start)
                }
            }
            Lexeme::LParen => {
                self.advance();
                let inner = self.parse_expr();
                self.expect(&Lexeme::RParen);
                inner
            }
            Lexeme::LBracket => {
                let items = self.parse_delimited(&Lexeme::LBracket, &Lexeme::RBracket);
                let span = start.merge(self.prev_span());
                Spanned::new(Expr::Pack(items), span)
            }
            other => {
                self.error_at_current(&format!(
                    "expected expression, found {}",
                    other.description()
                ));
                error_expr(start)
            }
        }
    }

    /// `open expr, expr, ... close`, allowing a trailing comma.
    fn parse_delimited(&mut self, open: &Lexeme, close: &Lexeme) -> Vec<Spanned<Expr>> {
        self.expect(open);
        let mut items = Vec::new();
        while !self.at(close) && !self.at(&Lexeme::Newline) && !self.at(&Lexeme::Eof) {
            items.push(self.parse_expr());
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(close);
        items
    }
}
