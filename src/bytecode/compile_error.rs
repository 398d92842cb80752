use thiserror::Error;

use crate::frontend::lexer::{LexerError, Span, Spanned};
use crate::frontend::token::TokenKind;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexerError),

    #[error("{span}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("{span}: {found} cannot start a statement")]
    InvalidStatement { found: String, span: Span },

    #[error("{span}: {found} is not allowed in an expression")]
    InvalidExpressionToken { found: String, span: Span },

    #[error("{span}: expected an expression before {found}")]
    EmptyExpression { found: String, span: Span },

    #[error("{span}: unbalanced parenthesis in expression")]
    UnbalancedParen { span: Span },

    #[error("{span}: undefined identifier `{name}`")]
    UndefinedSymbol { name: String, span: Span },

    #[error("{span}: `{name}` is already declared in this scope")]
    DuplicateSymbol { name: String, span: Span },

    #[error("{span}: function `{name}` cannot be used as a value")]
    FunctionAsValue { name: String, span: Span },

    #[error("{span}: `{name}` takes {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("{span}: invalid integer literal `{text}`")]
    InvalidInteger { text: String, span: Span },

    #[error("{span}: `}}` without a matching block")]
    UnmatchedBrace { span: Span },

    #[error("unexpected end of file: {open} block(s) still open")]
    UnclosedBlock { open: usize },

    #[error("{span}: functions can only be declared at global scope")]
    NestedFunction { span: Span },

    #[error("{span}: `{keyword}` statements are not supported")]
    UnsupportedControlFlow { keyword: String, span: Span },

    #[error("link error: no `main` function declared")]
    MissingMain,

    #[error("link error: `main` must be a function")]
    MainNotFunction,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn unexpected(expected: impl std::fmt::Display, found: &Spanned) -> Self {
        CompileError::UnexpectedToken {
            expected: expected.to_string(),
            found: found.token.to_string(),
            span: found.span,
        }
    }

    pub fn invalid_statement(found: &Spanned) -> Self {
        match found.token.kind {
            TokenKind::If
            | TokenKind::Else
            | TokenKind::While
            | TokenKind::Break
            | TokenKind::Continue
            | TokenKind::Return => CompileError::UnsupportedControlFlow {
                keyword: found.token.text.clone(),
                span: found.span,
            },
            _ => CompileError::InvalidStatement {
                found: found.token.to_string(),
                span: found.span,
            },
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }

    /// Source position of the error, when it has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex(e) => Some(Span {
                line: e.line,
                col: e.col,
            }),
            CompileError::UnexpectedToken { span, .. }
            | CompileError::InvalidStatement { span, .. }
            | CompileError::InvalidExpressionToken { span, .. }
            | CompileError::EmptyExpression { span, .. }
            | CompileError::UnbalancedParen { span }
            | CompileError::UndefinedSymbol { span, .. }
            | CompileError::DuplicateSymbol { span, .. }
            | CompileError::FunctionAsValue { span, .. }
            | CompileError::ArityMismatch { span, .. }
            | CompileError::InvalidInteger { span, .. }
            | CompileError::UnmatchedBrace { span }
            | CompileError::NestedFunction { span }
            | CompileError::UnsupportedControlFlow { span, .. } => Some(*span),
            CompileError::UnclosedBlock { .. }
            | CompileError::MissingMain
            | CompileError::MainNotFunction
            | CompileError::Internal(_) => None,
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CompileError::MissingMain => Some("add `func main() {` ... `}` as the program entry point"),
            CompileError::UnsupportedControlFlow { .. } => {
                Some("the language has no control-flow statements yet")
            }
            CompileError::NestedFunction { .. } => {
                Some("close the enclosing function with `}` before declaring another")
            }
            CompileError::InvalidExpressionToken { .. } => {
                Some("expressions support + - & | ^ << >> == != < >= && || and parentheses")
            }
            _ => None,
        }
    }
}
