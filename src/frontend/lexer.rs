use thiserror::Error;

use crate::frontend::token::{FIXED_TOKENS, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_word(b: u8) -> bool {
    is_alpha(b) || is_digit(b)
}

/// Scan one token from the front of `src`.
///
/// Returns the token and the number of bytes it consumed, or `None` when the
/// input starts with something no token can begin with. An empty input yields
/// `Eof` consuming nothing. Matching never looks past the next `\n`, so no
/// token spans a line break.
pub fn scan(src: &[u8]) -> Option<(Token, usize)> {
    match src {
        [] => return Some((Token::eof(), 0)),
        [b'\n', ..] => return Some((Token::new(TokenKind::Newline, "\n"), 1)),
        [b' ', ..] => return Some((Token::new(TokenKind::Space, " "), 1)),
        [b'/', b'/', ..] => {
            // Line comment: swallow through the newline and stand in for it.
            let consumed = match src.iter().position(|&b| b == b'\n') {
                Some(i) => i + 1,
                None => src.len(),
            };
            return Some((Token::new(TokenKind::Newline, "\n"), consumed));
        }
        _ => {}
    }

    let line_end = src.iter().position(|&b| b == b'\n').unwrap_or(src.len());
    let line = &src[..line_end];

    let mut best: Option<(&str, TokenKind)> = None;
    for &(text, kind) in FIXED_TOKENS {
        if !line.starts_with(text.as_bytes()) {
            continue;
        }
        // Keywords only count when they are a whole word: `varx` is one
        // identifier, never `var` followed by `x`.
        if kind.is_keyword() && line.get(text.len()).is_some_and(|&b| is_word(b)) {
            continue;
        }
        if best.is_none_or(|(prev, _)| prev.len() < text.len()) {
            best = Some((text, kind));
        }
    }

    if let Some((text, kind)) = best {
        return Some((Token::new(kind, text), text.len()));
    }

    let first = line[0];
    let kind = if is_alpha(first) {
        TokenKind::Ident
    } else if is_digit(first) {
        TokenKind::Int
    } else {
        return None;
    };

    let len = line.iter().take_while(|&&b| is_word(b)).count();
    let text = String::from_utf8_lossy(&line[..len]).into_owned();
    Some((Token::new(kind, text), len))
}

pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::from_bytes(source.as_bytes())
    }

    pub fn from_bytes(source: &'a [u8]) -> Self {
        Lexer {
            source,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn advance_by(&mut self, count: usize) {
        for &b in &self.source[self.pos..self.pos + count] {
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += count;
    }

    /// Produce the next token, including spaces.
    pub fn next_token(&mut self) -> Result<Spanned, LexerError> {
        let span = self.span();
        let rest = &self.source[self.pos..];

        let Some((token, consumed)) = scan(rest) else {
            let ch = rest[0];
            let shown = if ch.is_ascii_graphic() {
                format!("'{}'", ch as char)
            } else {
                format!("byte 0x{:02x}", ch)
            };
            return Err(LexerError {
                message: format!("illegal token: {}", shown),
                line: span.line,
                col: span.col,
            });
        };

        self.advance_by(consumed);
        Ok(Spanned { token, span })
    }

    /// Lex the whole source. Spaces are dropped, newlines are kept, and the
    /// stream always ends `Newline, Eof` so a final line without a trailing
    /// `\n` still terminates its statement.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens: Vec<Spanned> = Vec::new();

        loop {
            let spanned = self.next_token()?;
            match spanned.token.kind {
                TokenKind::Space => continue,
                TokenKind::Eof => {
                    let needs_newline = tokens
                        .last()
                        .is_some_and(|t| t.token.kind != TokenKind::Newline);
                    if needs_newline {
                        tokens.push(Spanned {
                            token: Token::new(TokenKind::Newline, "\n"),
                            span: spanned.span,
                        });
                    }
                    tokens.push(spanned);
                    break;
                }
                _ => tokens.push(spanned),
            }
        }

        Ok(tokens)
    }
}
