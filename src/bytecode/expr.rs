//! Infix expression compilation (shunting-yard).
//!
//! Operands are emitted as soon as they are read; operators wait on an
//! explicit stack and are emitted in postfix order. An incoming operator only
//! flushes stacked operators of *strictly* higher precedence, so a chain of
//! equal-precedence operators groups to the right: `a - b - c` computes
//! `a - (b - c)`.

use tracing::warn;

use crate::bytecode::compile::{CompilerContext, TokenStream};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Instruction;
use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::symbols::SymbolKind;
use crate::frontend::token::TokenKind;

/// Binding strength of a binary operator, or `None` if `kind` is not one.
pub fn precedence(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::Shl | TokenKind::Shr | TokenKind::And => 5,
        TokenKind::Add | TokenKind::Sub | TokenKind::Or | TokenKind::Xor => 4,
        TokenKind::Eql
        | TokenKind::Neq
        | TokenKind::Lss
        | TokenKind::Leq
        | TokenKind::Gtr
        | TokenKind::Geq => 3,
        TokenKind::LAnd => 2,
        TokenKind::LOr => 1,
        _ => return None,
    })
}

/// The instruction an operator compiles to. `<=`, `>`, `&&` and `||` parse
/// but have no opcode.
pub fn operator_instruction(kind: TokenKind) -> Option<Instruction> {
    Some(match kind {
        TokenKind::Add => Instruction::Add,
        TokenKind::Sub => Instruction::Sub,
        TokenKind::Xor => Instruction::Xor,
        TokenKind::Or => Instruction::Or,
        TokenKind::And => Instruction::And,
        TokenKind::Shr => Instruction::Sr,
        TokenKind::Shl => Instruction::Sl,
        TokenKind::Eql => Instruction::Eq,
        TokenKind::Neq => Instruction::Ne,
        TokenKind::Lss => Instruction::Lt,
        TokenKind::Geq => Instruction::Ge,
        _ => return None,
    })
}

/// Parse an integer literal: decimal, `0x`/`0o`/`0b` prefixed, or octal when
/// it has a bare leading zero (`010` is 8), with optional `_` separators. Anything that fits in 32 bits, signed or
/// unsigned, is accepted and stored as its two's-complement word.
pub fn parse_int(text: &str) -> Option<i32> {
    let digits: String = text.chars().filter(|&c| c != '_').collect();
    let (radix, body) = match digits.get(..2) {
        Some("0x") | Some("0X") => (16, &digits[2..]),
        Some("0o") | Some("0O") => (8, &digits[2..]),
        Some("0b") | Some("0B") => (2, &digits[2..]),
        _ if digits.len() > 1 && digits.starts_with('0') => (8, &digits[1..]),
        _ => (10, digits.as_str()),
    };
    if body.is_empty() {
        return None;
    }
    let value = i64::from_str_radix(body, radix).ok()?;
    if value > u32::MAX as i64 {
        return None;
    }
    Some(value as u32 as i32)
}

enum Stacked {
    Operator(TokenKind, Span),
    LParen,
}

fn emit_operator(ctx: &mut CompilerContext, kind: TokenKind, span: Span) {
    match operator_instruction(kind) {
        Some(instruction) => ctx.emit(instruction),
        None => warn!(
            operator = %kind,
            line = span.line,
            col = span.col,
            "operator has no opcode; nothing emitted"
        ),
    }
}

/// Compile one expression, stopping (without consuming) at the first token in
/// `terminators` that sits outside any parentheses.
pub fn compile_expression(
    tokens: &mut TokenStream,
    ctx: &mut CompilerContext,
    terminators: &[TokenKind],
) -> Result<(), CompileError> {
    let mut stack: Vec<Stacked> = Vec::new();
    let mut depth = 0usize;
    let mut operands = 0usize;

    loop {
        let tok: Spanned = tokens.peek().clone();
        let kind = tok.token.kind;

        if depth == 0 && terminators.contains(&kind) {
            if operands == 0 {
                return Err(CompileError::EmptyExpression {
                    found: tok.token.to_string(),
                    span: tok.span,
                });
            }
            break;
        }

        match kind {
            TokenKind::Int => {
                tokens.advance();
                let value = parse_int(&tok.token.text).ok_or_else(|| CompileError::InvalidInteger {
                    text: tok.token.text.clone(),
                    span: tok.span,
                })?;
                ctx.emit_literal(value);
                operands += 1;
            }
            TokenKind::Ident => {
                tokens.advance();
                let symbol = ctx.lookup(&tok)?;
                if symbol.kind == SymbolKind::Function {
                    return Err(CompileError::FunctionAsValue {
                        name: symbol.name,
                        span: tok.span,
                    });
                }
                ctx.emit_address(symbol.address)?;
                ctx.emit(if symbol.is_global() {
                    Instruction::PushGlobal
                } else {
                    Instruction::PushLocal
                });
                operands += 1;
            }
            TokenKind::LParen => {
                tokens.advance();
                stack.push(Stacked::LParen);
                depth += 1;
            }
            TokenKind::RParen => {
                if depth == 0 {
                    return Err(CompileError::UnbalancedParen { span: tok.span });
                }
                tokens.advance();
                loop {
                    match stack.pop() {
                        Some(Stacked::Operator(op, span)) => emit_operator(ctx, op, span),
                        Some(Stacked::LParen) => break,
                        None => return Err(CompileError::internal("lost left-paren marker")),
                    }
                }
                depth -= 1;
            }
            TokenKind::Newline | TokenKind::Eof => {
                if depth > 0 {
                    return Err(CompileError::UnbalancedParen { span: tok.span });
                }
                let expected = terminators
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(" or ");
                return Err(CompileError::unexpected(expected, &tok));
            }
            _ => {
                let Some(incoming) = precedence(kind) else {
                    return Err(CompileError::InvalidExpressionToken {
                        found: tok.token.to_string(),
                        span: tok.span,
                    });
                };
                tokens.advance();
                while let Some(Stacked::Operator(top, _)) = stack.last() {
                    if precedence(*top).unwrap_or(0) <= incoming {
                        break;
                    }
                    if let Some(Stacked::Operator(op, span)) = stack.pop() {
                        emit_operator(ctx, op, span);
                    }
                }
                stack.push(Stacked::Operator(kind, tok.span));
            }
        }
    }

    while let Some(entry) = stack.pop() {
        if let Stacked::Operator(op, span) = entry {
            emit_operator(ctx, op, span);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::CompileOptions;
    use crate::bytecode::disasm::decode_all;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::symbols::{GLOBAL_SCOPE, Symbol};

    /// Compile `source` as a newline-terminated expression with globals
    /// `g0`, `g1` and a local `l0` in scope.
    fn compile(source: &str) -> Result<Vec<Instruction>, CompileError> {
        let mut tokens = TokenStream::new(Lexer::new(source).tokenize()?);
        let mut ctx = CompilerContext::new(CompileOptions::default());
        ctx.symbols.declare(Symbol::integer("g0", GLOBAL_SCOPE, 0));
        ctx.symbols.declare(Symbol::integer("g1", GLOBAL_SCOPE, 1));
        ctx.symbols.declare(Symbol::function("f", GLOBAL_SCOPE, 7));
        ctx.symbols.declare(Symbol::integer("l0", GLOBAL_SCOPE + 1, 0));

        compile_expression(&mut tokens, &mut ctx, &[TokenKind::Newline])?;
        let program = ctx.into_program();
        Ok(decode_all(program.as_bytes())
            .unwrap()
            .into_iter()
            .map(|(_, i)| i)
            .collect())
    }

    fn lit(v: i32) -> Instruction {
        Instruction::PushLiteral(v)
    }

    #[test]
    fn test_single_literal() {
        assert_eq!(compile("42").unwrap(), vec![lit(42)]);
    }

    #[test]
    fn test_higher_precedence_binds_tighter() {
        // 1 + (2 << 3)
        assert_eq!(
            compile("1 + 2 << 3").unwrap(),
            vec![lit(1), lit(2), lit(3), Instruction::Sl, Instruction::Add]
        );
        // (1 << 2) + 3
        assert_eq!(
            compile("1 << 2 + 3").unwrap(),
            vec![lit(1), lit(2), Instruction::Sl, lit(3), Instruction::Add]
        );
    }

    #[test]
    fn test_equal_precedence_groups_right() {
        // 1 - (2 - 3)
        assert_eq!(
            compile("1 - 2 - 3").unwrap(),
            vec![lit(1), lit(2), lit(3), Instruction::Sub, Instruction::Sub]
        );
    }

    #[test]
    fn test_parentheses() {
        assert_eq!(
            compile("(1 - 2) - 3").unwrap(),
            vec![lit(1), lit(2), Instruction::Sub, lit(3), Instruction::Sub]
        );
        assert_eq!(compile("((7))").unwrap(), vec![lit(7)]);
    }

    #[test]
    fn test_comparison_below_arithmetic() {
        assert_eq!(
            compile("1 + 2 == 3").unwrap(),
            vec![lit(1), lit(2), Instruction::Add, lit(3), Instruction::Eq]
        );
        assert_eq!(
            compile("1 != 2").unwrap(),
            vec![lit(1), lit(2), Instruction::Ne]
        );
        assert_eq!(
            compile("1 < 2").unwrap(),
            vec![lit(1), lit(2), Instruction::Lt]
        );
        assert_eq!(
            compile("1 >= 2").unwrap(),
            vec![lit(1), lit(2), Instruction::Ge]
        );
    }

    #[test]
    fn test_operators_without_opcode_emit_nothing() {
        assert_eq!(compile("1 <= 2").unwrap(), vec![lit(1), lit(2)]);
        assert_eq!(compile("1 > 2").unwrap(), vec![lit(1), lit(2)]);
        assert_eq!(compile("1 && 2 || 3").unwrap(), vec![lit(1), lit(2), lit(3)]);
    }

    #[test]
    fn test_variable_operands() {
        assert_eq!(
            compile("g1 ^ l0").unwrap(),
            vec![
                lit(1),
                Instruction::PushGlobal,
                lit(0),
                Instruction::PushLocal,
                Instruction::Xor
            ]
        );
    }

    #[test]
    fn test_integer_literal_forms() {
        assert_eq!(parse_int("10"), Some(10));
        assert_eq!(parse_int("0x2A"), Some(42));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int("1_000"), Some(1000));
        assert_eq!(parse_int("0xFFFFFFFF"), Some(-1));
        assert_eq!(parse_int("4294967296"), None);
        assert_eq!(parse_int("12ab"), None);
        assert_eq!(parse_int("0x"), None);
    }

    #[test]
    fn test_leading_zero_is_octal() {
        assert_eq!(parse_int("010"), Some(8));
        assert_eq!(parse_int("0_17"), Some(15));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("00"), Some(0));
        assert_eq!(parse_int("08"), None);
        assert!(matches!(
            compile("09"),
            Err(CompileError::InvalidInteger { .. })
        ));
        assert_eq!(compile("010").unwrap(), vec![lit(8)]);
    }

    #[test]
    fn test_invalid_integer_literal() {
        assert!(matches!(
            compile("12ab"),
            Err(CompileError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn test_undefined_identifier() {
        assert!(matches!(
            compile("nope + 1"),
            Err(CompileError::UndefinedSymbol { .. })
        ));
    }

    #[test]
    fn test_function_is_not_a_value() {
        assert!(matches!(
            compile("f + 1"),
            Err(CompileError::FunctionAsValue { .. })
        ));
    }

    #[test]
    fn test_empty_expression() {
        assert!(matches!(
            compile("\n"),
            Err(CompileError::EmptyExpression { .. })
        ));
    }

    #[test]
    fn test_unbalanced_parens() {
        assert!(matches!(
            compile("(1 + 2"),
            Err(CompileError::UnbalancedParen { .. })
        ));
        assert!(matches!(
            compile("1 + 2)"),
            Err(CompileError::UnbalancedParen { .. })
        ));
    }

    #[test]
    fn test_multiplication_is_rejected() {
        assert!(matches!(
            compile("2 * 3"),
            Err(CompileError::InvalidExpressionToken { .. })
        ));
    }

    #[test]
    fn test_nested_terminator_inside_parens() {
        let mut tokens = TokenStream::new(Lexer::new("(1 + 2), 3)").tokenize().unwrap());
        let mut ctx = CompilerContext::new(CompileOptions::default());
        compile_expression(
            &mut tokens,
            &mut ctx,
            &[TokenKind::Comma, TokenKind::RParen],
        )
        .unwrap();
        assert_eq!(tokens.peek().token.kind, TokenKind::Comma);
    }
}
