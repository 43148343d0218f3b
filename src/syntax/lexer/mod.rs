use super::lexeme::Lexeme;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};

pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    text: &'src str,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            text: source,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    /// A non-empty stream ends with `Newline, Eof`; blank lines collapse.
    pub(crate) fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens: Vec<Spanned<Lexeme>> = Vec::new();
        loop {
            let tok = self.next_token();
            match tok.node {
                Lexeme::Newline
                    if tokens
                        .last()
                        .map_or(true, |t| t.node == Lexeme::Newline) => {}
                Lexeme::Eof => {
                    if tokens.last().is_some_and(|t| t.node != Lexeme::Newline) {
                        tokens.push(self.make_token(Lexeme::Newline, self.pos, self.pos));
                    }
                    tokens.push(tok);
                    break;
                }
                _ => tokens.push(tok),
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_blanks_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if ch == b'\n' {
                self.pos += 1;
                return self.make_token(Lexeme::Newline, start, self.pos);
            }
            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }
            if ch.is_ascii_digit() {
                return self.scan_number();
            }
            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None: error recorded, try again
        }
    }

    fn skip_blanks_and_comments(&mut self) {
        while self.pos < self.source.len() {
            match self.source[self.pos] {
                b'\n' => break,
                b'#' => {
                    while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                c if c.is_ascii_whitespace() => self.pos += 1,
                _ => break,
            }
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = &self.text[start..self.pos];
        let token = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(token, start, self.pos)
    }

    /// `digits [. digits] [e [+-] digits]`
    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.skip_digits();
        if self.peek_at(0) == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                self.skip_digits();
            }
        }
        let text = &self.text[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => self.make_token(Lexeme::Number(n), start, self.pos),
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    format!("invalid number '{}'", text),
                    Span::new(start as u32, self.pos as u32),
                ));
                self.make_token(Lexeme::Number(0.0), start, self.pos)
            }
        }
    }

    fn skip_digits(&mut self) {
        while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        let next = self.peek_at(1);
        self.pos += 1;

        let tok = match (ch, next) {
            (b'=', Some(b'=')) => {
                self.pos += 1;
                Lexeme::EqEq
            }
            (b'!', Some(b'=')) => {
                self.pos += 1;
                Lexeme::BangEq
            }
            (b'<', Some(b'=')) => {
                self.pos += 1;
                Lexeme::LtEq
            }
            (b'>', Some(b'=')) => {
                self.pos += 1;
                Lexeme::GtEq
            }
            (b'(', _) => Lexeme::LParen,
            (b')', _) => Lexeme::RParen,
            (b'[', _) => Lexeme::LBracket,
            (b']', _) => Lexeme::RBracket,
            (b',', _) => Lexeme::Comma,
            (b':', _) => Lexeme::Colon,
            (b'=', _) => Lexeme::Eq,
            (b'<', _) => Lexeme::Lt,
            (b'>', _) => Lexeme::Gt,
            (b'+', _) => Lexeme::Plus,
            (b'-', _) => Lexeme::Minus,
            (b'*', _) => Lexeme::Star,
            (b'/', _) => Lexeme::Slash,
            _ => {
                // Step over a whole UTF-8 character.
                while self.pos < self.source.len() && !self.text.is_char_boundary(self.pos) {
                    self.pos += 1;
                }
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("unexpected character '{}'", &self.text[start..self.pos]),
                        Span::new(start as u32, self.pos as u32),
                    )
                    .with_help("comments start with '#'"),
                );
                return None;
            }
        };
        Some(self.make_token(tok, start, self.pos))
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn make_token(&self, node: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(node, Span::new(start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
