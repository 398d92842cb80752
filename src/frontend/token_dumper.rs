use crate::frontend::lexer::Spanned;
use crate::frontend::token::{Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the source text instead of Debug
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Spanned]) -> String {
        tokens.iter().map(|s| self.render_one(s) + "\n").collect()
    }

    fn render_one(&self, s: &Spanned) -> String {
        let line = s.span.line;
        let col = s.span.col;

        let kind = Self::kind(&s.token);
        let colr = if self.color { Self::color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let value = if self.show_debug_repr {
            format!("{:?}", s.token)
        } else {
            match s.token.kind {
                TokenKind::Newline => "NEWLINE".to_string(),
                TokenKind::Eof => "EOF".to_string(),
                _ => s.token.text.clone(),
            }
        };

        format!(
            "[{:02}:{:02}] {}{:<8} {}{}",
            line, col, colr, kind, value, reset
        )
    }

    fn kind(t: &Token) -> &'static str {
        use TokenKind::*;
        match t.kind {
            Newline => "NEWLINE",
            Space => "SPACE",
            Eof => "EOF",
            Int => "INT",
            Ident => "IDENT",
            LParen | RParen | LBrack | RBrack | LBrace | RBrace => "DELIM",
            Comma | Period | Semicolon | Colon => "PUNCT",
            Eql | Neq | Lss | Leq | Gtr | Geq => "CMP",
            kind if kind.is_keyword() => "KEYWORD",
            _ => "OP",
        }
    }

    fn color(t: &Token) -> &'static str {
        use TokenKind::*;
        match t.kind {
            Newline | Space | Eof => Self::DIM,
            Int => Self::CYN,
            Ident => Self::YEL,
            kind if kind.is_keyword() => Self::BLU,
            LParen | RParen | LBrack | RBrack | LBrace | RBrace => Self::RESET,
            Comma | Period | Semicolon | Colon => Self::RESET,
            _ => Self::MAG,
        }
    }
}
