#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Special
    Eof,
    Newline,
    Space,

    // Literals and names
    Ident,
    Int,

    // Operators
    Add,    // +
    Sub,    // -
    Mul,    // *
    Quo,    // /
    Rem,    // %
    And,    // &
    Or,     // |
    Xor,    // ^
    Shl,    // <<
    Shr,    // >>
    LAnd,   // &&
    LOr,    // ||
    Eql,    // ==
    Lss,    // <
    Gtr,    // >
    Assign, // =
    Not,    // !
    Neq,    // !=
    Leq,    // <=
    Geq,    // >=

    // Delimiters
    LParen,    // (
    LBrack,    // [
    LBrace,    // {
    RParen,    // )
    RBrack,    // ]
    RBrace,    // }
    Comma,     // ,
    Period,    // .
    Semicolon, // ;
    Colon,     // :

    // Keywords
    While,
    Break,
    Continue,
    If,
    Else,
    Func,
    Return,
    Var,
}

/// Every token with a fixed spelling. The lexer picks the longest entry that
/// prefixes the current line.
pub const FIXED_TOKENS: &[(&str, TokenKind)] = &[
    ("+", TokenKind::Add),
    ("-", TokenKind::Sub),
    ("*", TokenKind::Mul),
    ("/", TokenKind::Quo),
    ("%", TokenKind::Rem),
    ("&", TokenKind::And),
    ("|", TokenKind::Or),
    ("^", TokenKind::Xor),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("&&", TokenKind::LAnd),
    ("||", TokenKind::LOr),
    ("==", TokenKind::Eql),
    ("<", TokenKind::Lss),
    (">", TokenKind::Gtr),
    ("=", TokenKind::Assign),
    ("!", TokenKind::Not),
    ("!=", TokenKind::Neq),
    ("<=", TokenKind::Leq),
    (">=", TokenKind::Geq),
    ("(", TokenKind::LParen),
    ("[", TokenKind::LBrack),
    ("{", TokenKind::LBrace),
    (")", TokenKind::RParen),
    ("]", TokenKind::RBrack),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (".", TokenKind::Period),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    ("while", TokenKind::While),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("func", TokenKind::Func),
    ("return", TokenKind::Return),
    ("var", TokenKind::Var),
];

impl TokenKind {
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::While
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::Func
                | TokenKind::Return
                | TokenKind::Var
        )
    }

    /// Fixed spelling of the token, if it has one.
    pub fn spelling(self) -> Option<&'static str> {
        FIXED_TOKENS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(text, _)| *text)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Eof => write!(f, "end of file"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Space => write!(f, "space"),
            TokenKind::Ident => write!(f, "identifier"),
            TokenKind::Int => write!(f, "integer"),
            other => match other.spelling() {
                Some(text) => write!(f, "`{}`", text),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

/// A lexed token: its kind plus the exact source text it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn eof() -> Self {
        Self::new(TokenKind::Eof, "")
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::Ident | TokenKind::Int => write!(f, "`{}`", self.text),
            _ => write!(f, "{}", self.kind),
        }
    }
}
