//! Textual front end: a line-oriented expression language that builds
//! computation graphs.
//!
//! ```text
//! # distance from the origin, undefined outside the unit disc
//! arg p: [2]
//! let r = sqrt(p[0] * p[0] + p[1] * p[1])
//! out guard(r <= 1, r)
//! ```

mod build;
pub(crate) mod lexeme;
pub mod span;
mod lexer;
mod parser;

#[cfg(test)]
mod tests;

pub use build::{build_graph, Built};

use crate::diagnostic::Diagnostic;
use span::Spanned;

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub statements: Vec<Spanned<Statement>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// `arg NAME [: [d0, ...]]`
    Arg { name: Spanned<String>, dims: Vec<usize> },
    /// `let NAME = EXPR`
    Let { name: Spanned<String>, value: Spanned<Expr> },
    /// `out EXPR`
    Out(Spanned<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Name(String),
    Pack(Vec<Spanned<Expr>>),
    Index {
        target: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    Neg(Box<Spanned<Expr>>),
    Binary {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Call {
        name: Spanned<String>,
        args: Vec<Spanned<Expr>>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    /// (left, right) binding power; higher binds tighter.
    pub fn binding_power(self) -> (u8, u8) {
        match self {
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => (2, 3),
            BinOp::Add | BinOp::Sub => (4, 5),
            BinOp::Mul | BinOp::Div => (6, 7),
        }
    }
}

/// Lex and parse a source text.
pub fn parse_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let (tokens, lex_errors) = lexer::Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    parser::Parser::new(tokens).parse_program()
}
