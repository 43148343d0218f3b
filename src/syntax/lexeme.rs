/// Lexemes of the expression language.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Keywords
    Arg,
    Let,
    Out,

    // Symbols
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Colon,    // :
    Eq,       // =
    EqEq,     // ==
    BangEq,   // !=
    Lt,       // <
    LtEq,     // <=
    Gt,       // >
    GtEq,     // >=
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /

    // Literals
    Number(f64),
    Ident(String),

    /// End of a statement line.
    Newline,
    Eof,
}

impl Lexeme {
    pub fn from_keyword(s: &str) -> Option<Lexeme> {
        match s {
            "arg" => Some(Lexeme::Arg),
            "let" => Some(Lexeme::Let),
            "out" => Some(Lexeme::Out),
            _ => None,
        }
    }

    /// Human-readable description for error messages.
    pub fn description(&self) -> String {
        match self {
            Lexeme::Arg => "'arg'".into(),
            Lexeme::Let => "'let'".into(),
            Lexeme::Out => "'out'".into(),
            Lexeme::LParen => "'('".into(),
            Lexeme::RParen => "')'".into(),
            Lexeme::LBracket => "'['".into(),
            Lexeme::RBracket => "']'".into(),
            Lexeme::Comma => "','".into(),
            Lexeme::Colon => "':'".into(),
            Lexeme::Eq => "'='".into(),
            Lexeme::EqEq => "'=='".into(),
            Lexeme::BangEq => "'!='".into(),
            Lexeme::Lt => "'<'".into(),
            Lexeme::LtEq => "'<='".into(),
            Lexeme::Gt => "'>'".into(),
            Lexeme::GtEq => "'>='".into(),
            Lexeme::Plus => "'+'".into(),
            Lexeme::Minus => "'-'".into(),
            Lexeme::Star => "'*'".into(),
            Lexeme::Slash => "'/'".into(),
            Lexeme::Number(n) => format!("number {}", n),
            Lexeme::Ident(s) => format!("identifier '{}'", s),
            Lexeme::Newline => "end of line".into(),
            Lexeme::Eof => "end of file".into(),
        }
    }
}
