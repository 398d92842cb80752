use tracing::{debug, info};

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::expr::compile_expression;
use crate::bytecode::op::Instruction;
use crate::bytecode::program::{PatchSite, Program, SymbolMap};
use crate::frontend::lexer::{Lexer, Spanned};
use crate::frontend::symbols::{GLOBAL_SCOPE, Symbol, SymbolKind, SymbolTable};
use crate::frontend::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Pad with no-ops so every push-literal operand is 4-byte aligned.
    pub align_operands: bool,
}

/// What opened the block a `}` will close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Function,
}

/// Cursor over the lexed token stream. The stream always ends in `Eof`, and
/// the cursor never moves past it.
pub struct TokenStream {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl TokenStream {
    pub fn new(mut tokens: Vec<Spanned>) -> Self {
        if tokens.last().is_none_or(|t| t.token.kind != TokenKind::Eof) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Spanned {
                token: Token::eof(),
                span,
            });
        }
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> &Spanned {
        &self.tokens[self.pos]
    }

    pub fn peek_kind(&self) -> TokenKind {
        self.peek().token.kind
    }

    pub fn advance(&mut self) -> Spanned {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    pub fn expect(&mut self, kind: TokenKind) -> Result<Spanned, CompileError> {
        if self.peek_kind() != kind {
            return Err(CompileError::unexpected(kind, self.peek()));
        }
        Ok(self.advance())
    }
}

/// All mutable state of one compilation: the output buffer, the symbol
/// table, open blocks, the current scope depth and pending back-patches.
pub struct CompilerContext {
    pub symbols: SymbolTable,
    pub blocks: Vec<BlockKind>,
    pub scope: usize,
    pending_patches: Vec<PatchSite>,
    program: Program,
    symbol_map: SymbolMap,
    options: CompileOptions,
}

impl CompilerContext {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            symbols: SymbolTable::new(),
            blocks: Vec::new(),
            scope: GLOBAL_SCOPE,
            pending_patches: Vec::new(),
            program: Program::new(),
            symbol_map: SymbolMap::default(),
            options,
        }
    }

    /// Byte offset the next instruction will be emitted at.
    pub fn here(&self) -> usize {
        self.program.len()
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.program.emit(instruction);
    }

    pub fn emit_literal(&mut self, value: i32) {
        if self.options.align_operands {
            self.program.align_next_operand();
        }
        self.program.emit(Instruction::PushLiteral(value));
    }

    /// Push an address (byte offset or slot number) as a literal.
    pub fn emit_address(&mut self, address: usize) -> Result<(), CompileError> {
        let value = i32::try_from(address)
            .map_err(|_| CompileError::internal(format!("address {} does not fit in a word", address)))?;
        self.emit_literal(value);
        Ok(())
    }

    /// Emit a push-literal with a placeholder operand and remember where it is.
    pub fn emit_placeholder(&mut self) {
        if self.options.align_operands {
            self.program.align_next_operand();
        }
        let site = self.program.emit_placeholder_literal();
        self.pending_patches.push(site);
    }

    /// Fill the most recent placeholder with `address`.
    pub fn resolve_patch(&mut self, address: usize) -> Result<(), CompileError> {
        let site = self
            .pending_patches
            .pop()
            .ok_or_else(|| CompileError::internal("no pending back-patch to resolve"))?;
        let value = i32::try_from(address)
            .map_err(|_| CompileError::internal(format!("address {} does not fit in a word", address)))?;
        debug!(site = site.0, address, "resolve back-patch");
        self.program.patch_literal(site, value);
        Ok(())
    }

    pub fn pending_patches(&self) -> usize {
        self.pending_patches.len()
    }

    pub fn lookup(&self, name: &Spanned) -> Result<Symbol, CompileError> {
        self.symbols
            .lookup(&name.token.text)
            .cloned()
            .ok_or_else(|| CompileError::UndefinedSymbol {
                name: name.token.text.clone(),
                span: name.span,
            })
    }

    fn check_unique(&self, name: &Spanned, scope: usize) -> Result<(), CompileError> {
        if self.symbols.is_declared_in(&name.token.text, scope) {
            return Err(CompileError::DuplicateSymbol {
                name: name.token.text.clone(),
                span: name.span,
            });
        }
        Ok(())
    }

    pub fn into_program(self) -> Program {
        self.program
    }
}

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub program: Program,
    pub symbols: SymbolMap,
}

/// Single-pass statement compiler: walks the token stream once and emits
/// bytecode directly.
pub struct Compiler {
    ctx: CompilerContext,
    tokens: TokenStream,
}

impl Compiler {
    pub fn new(tokens: Vec<Spanned>, options: CompileOptions) -> Self {
        Self {
            ctx: CompilerContext::new(options),
            tokens: TokenStream::new(tokens),
        }
    }

    pub fn compile_program(mut self) -> Result<Compiled, CompileError> {
        self.prologue();

        loop {
            match self.tokens.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Func => self.function_declaration()?,
                TokenKind::Var => self.var_declaration()?,
                TokenKind::Ident => self.identifier_statement()?,
                TokenKind::RBrace => self.close_block()?,
                TokenKind::Newline => {
                    self.tokens.advance();
                }
                _ => return Err(CompileError::invalid_statement(self.tokens.peek())),
            }
        }

        self.epilogue()?;

        info!(bytes = self.ctx.here(), "compiled program");
        Ok(Compiled {
            program: self.ctx.program,
            symbols: self.ctx.symbol_map,
        })
    }

    /// Entry sequence: load the address of `main`, call it, halt.
    fn prologue(&mut self) {
        self.ctx.emit_placeholder();
        self.ctx.emit(Instruction::Call);
        self.ctx.emit(Instruction::Ecall);
    }

    fn epilogue(&mut self) -> Result<(), CompileError> {
        if !self.ctx.blocks.is_empty() {
            return Err(CompileError::UnclosedBlock {
                open: self.ctx.blocks.len(),
            });
        }

        let main = self
            .ctx
            .symbols
            .lookup("main")
            .ok_or(CompileError::MissingMain)?;
        if main.kind != SymbolKind::Function {
            return Err(CompileError::MainNotFunction);
        }
        let address = main.address;
        self.ctx.resolve_patch(address)?;

        if self.ctx.pending_patches() != 0 {
            return Err(CompileError::internal(format!(
                "{} back-patch site(s) left unresolved",
                self.ctx.pending_patches()
            )));
        }
        Ok(())
    }

    // func name(a, b) {
    fn function_declaration(&mut self) -> Result<(), CompileError> {
        let func = self.tokens.expect(TokenKind::Func)?;
        if self.ctx.scope != GLOBAL_SCOPE {
            return Err(CompileError::NestedFunction { span: func.span });
        }

        let name = self.tokens.expect(TokenKind::Ident)?;
        self.ctx.check_unique(&name, self.ctx.scope)?;

        let mut function = Symbol::function(name.token.text.clone(), self.ctx.scope, self.ctx.here());
        self.ctx.blocks.push(BlockKind::Function);

        self.tokens.expect(TokenKind::LParen)?;
        self.ctx.scope += 1;

        while self.tokens.peek_kind() == TokenKind::Ident {
            let param_name = self.tokens.advance();
            if function.params.iter().any(|p| p.name == param_name.token.text) {
                return Err(CompileError::DuplicateSymbol {
                    name: param_name.token.text,
                    span: param_name.span,
                });
            }
            let param = Symbol::integer(
                param_name.token.text,
                self.ctx.scope,
                function.params.len(),
            );

            // Reserve the frame slot, then move the next call argument into it.
            self.ctx.emit_literal(0);
            self.ctx.emit_address(param.address)?;
            self.ctx.emit(Instruction::PushFuncArg);
            self.ctx.emit(Instruction::PopLocal);

            function.params.push(param);

            if self.tokens.peek_kind() != TokenKind::RParen {
                self.tokens.expect(TokenKind::Comma)?;
            }
        }

        self.tokens.expect(TokenKind::RParen)?;

        let params = function.params.clone();
        self.ctx
            .symbol_map
            .functions
            .push((function.name.clone(), function.address));
        self.ctx.symbols.declare(function);
        for param in params {
            self.ctx.symbols.declare(param);
        }

        self.tokens.expect(TokenKind::LBrace)?;
        self.tokens.expect(TokenKind::Newline)?;

        self.ctx.emit_literal(0);
        self.ctx.emit(Instruction::PopFuncRetVal);
        Ok(())
    }

    // var name
    fn var_declaration(&mut self) -> Result<(), CompileError> {
        self.tokens.expect(TokenKind::Var)?;
        let name = self.tokens.expect(TokenKind::Ident)?;
        self.ctx.check_unique(&name, self.ctx.scope)?;

        let symbol = if self.ctx.scope == GLOBAL_SCOPE {
            let address = self.ctx.symbols.next_global_address();
            self.ctx.emit_address(address)?;
            self.ctx.emit_literal(0);
            self.ctx.emit(Instruction::PopGlobal);
            self.ctx
                .symbol_map
                .globals
                .push((name.token.text.clone(), address));
            Symbol::integer(name.token.text, self.ctx.scope, address)
        } else {
            // Locals live on the operand stack at fp + address.
            let address = self.ctx.symbols.next_local_address();
            self.ctx.emit_literal(0);
            Symbol::integer(name.token.text, self.ctx.scope, address)
        };
        self.ctx.symbols.declare(symbol);

        self.tokens.expect(TokenKind::Newline)?;
        Ok(())
    }

    // name = expr | name(args)
    fn identifier_statement(&mut self) -> Result<(), CompileError> {
        let name = self.tokens.peek().clone();
        let symbol = self.ctx.lookup(&name)?;

        self.ctx.emit_address(symbol.address)?;

        match symbol.kind {
            SymbolKind::Integer => {
                self.tokens.expect(TokenKind::Ident)?;
                self.tokens.expect(TokenKind::Assign)?;
                compile_expression(&mut self.tokens, &mut self.ctx, &[TokenKind::Newline])?;
                self.ctx.emit(if symbol.is_global() {
                    Instruction::PopGlobal
                } else {
                    Instruction::PopLocal
                });
            }
            SymbolKind::Function => self.call(&symbol)?,
        }

        self.tokens.expect(TokenKind::Newline)?;
        Ok(())
    }

    /// Arguments are evaluated left to right and queued on the argument
    /// stack; the callee's address is already on the operand stack.
    fn call(&mut self, function: &Symbol) -> Result<(), CompileError> {
        let name = self.tokens.expect(TokenKind::Ident)?;
        self.tokens.expect(TokenKind::LParen)?;

        let mut count = 0;
        if self.tokens.peek_kind() != TokenKind::RParen {
            loop {
                compile_expression(
                    &mut self.tokens,
                    &mut self.ctx,
                    &[TokenKind::Comma, TokenKind::RParen],
                )?;
                self.ctx.emit(Instruction::PopFuncArg);
                count += 1;

                if self.tokens.peek_kind() == TokenKind::Comma {
                    self.tokens.advance();
                } else {
                    break;
                }
            }
        }
        self.tokens.expect(TokenKind::RParen)?;

        if count != function.params.len() {
            return Err(CompileError::ArityMismatch {
                name: function.name.clone(),
                expected: function.params.len(),
                found: count,
                span: name.span,
            });
        }

        self.ctx.emit(Instruction::Call);
        Ok(())
    }

    fn close_block(&mut self) -> Result<(), CompileError> {
        let brace = self.tokens.expect(TokenKind::RBrace)?;
        let block = self
            .ctx
            .blocks
            .pop()
            .ok_or(CompileError::UnmatchedBrace { span: brace.span })?;

        match block {
            BlockKind::Function => {
                self.ctx.scope -= 1;
                self.ctx.symbols.exit_scope(self.ctx.scope);
                self.ctx.emit(Instruction::Return);
            }
        }

        self.tokens.expect(TokenKind::Newline)?;
        Ok(())
    }
}

/// Lex and compile `source` in one go.
pub fn compile_source(source: &str, options: CompileOptions) -> Result<Compiled, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    Compiler::new(tokens, options).compile_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disasm::decode_all;
    use crate::bytecode::op::Opcode;

    fn compile(source: &str) -> Result<Compiled, CompileError> {
        compile_source(source, CompileOptions::default())
    }

    fn instructions(source: &str) -> Vec<(usize, Instruction)> {
        decode_all(compile(source).unwrap().program.as_bytes()).unwrap()
    }

    fn lit(v: i32) -> Instruction {
        Instruction::PushLiteral(v)
    }

    #[test]
    fn test_empty_main_exact_bytes() {
        let compiled = compile("func main() {\n}\n").unwrap();
        assert_eq!(
            compiled.program.code,
            vec![
                Opcode::PushLiteral.byte(), 7, 0, 0, 0, // entry: address of main
                Opcode::Call.byte(),
                Opcode::Ecall.byte(),
                Opcode::PushLiteral.byte(), 0, 0, 0, 0, // main: return value = 0
                Opcode::PopFuncRetVal.byte(),
                Opcode::Return.byte(),
            ]
        );
        assert_eq!(compiled.symbols.functions, vec![("main".to_string(), 7)]);
    }

    #[test]
    fn test_entry_patch_matches_main_address() {
        let source = "var a\nfunc helper() {\n}\nfunc main() {\nhelper()\n}\n";
        let compiled = compile(source).unwrap();
        let main_at = compiled
            .symbols
            .functions
            .iter()
            .find(|(n, _)| n == "main")
            .map(|(_, at)| *at)
            .unwrap();
        let code = compiled.program.as_bytes();
        assert_eq!(Instruction::decode(code, 0), Ok(lit(main_at as i32)));
    }

    #[test]
    fn test_global_var_declaration() {
        let ins = instructions("var x\nvar y\nfunc main() {\n}\n");
        let body: Vec<Instruction> = ins.iter().skip(3).map(|(_, i)| *i).collect();
        assert_eq!(
            &body[..6],
            &[
                lit(0),
                lit(0),
                Instruction::PopGlobal,
                lit(1),
                lit(0),
                Instruction::PopGlobal,
            ]
        );
    }

    #[test]
    fn test_assignment_to_global_inside_main() {
        let ins = instructions("var x\nfunc main() {\nx = 42\n}\n");
        let tail: Vec<Instruction> = ins.iter().rev().take(4).rev().map(|(_, i)| *i).collect();
        assert_eq!(
            tail,
            vec![lit(0), lit(42), Instruction::PopGlobal, Instruction::Return]
        );
    }

    #[test]
    fn test_local_shadows_global() {
        let source = "var x\nfunc main() {\nvar x\nx = 5\n}\nfunc other() {\nx = 6\n}\nfunc keep() {\n}\n";
        let ins: Vec<Instruction> = instructions(source).into_iter().map(|(_, i)| i).collect();
        // inside main: local slot 0
        let main_store = ins
            .windows(3)
            .position(|w| w == [lit(0), lit(5), Instruction::PopLocal]);
        assert!(main_store.is_some(), "{:?}", ins);
        // after main's scope ends, `x` is the global again
        let other_store = ins
            .windows(3)
            .position(|w| w == [lit(0), lit(6), Instruction::PopGlobal]);
        assert!(other_store.is_some(), "{:?}", ins);
    }

    #[test]
    fn test_parameters_move_arguments_into_slots() {
        let ins: Vec<Instruction> = instructions("func f(a, b) {\n}\nfunc main() {\n}\n")
            .into_iter()
            .map(|(_, i)| i)
            .collect();
        assert_eq!(
            &ins[3..11],
            &[
                lit(0),
                lit(0),
                Instruction::PushFuncArg,
                Instruction::PopLocal,
                lit(0),
                lit(1),
                Instruction::PushFuncArg,
                Instruction::PopLocal,
            ]
        );
    }

    #[test]
    fn test_call_queues_arguments_in_order() {
        let source = "func f(a, b) {\n}\nfunc main() {\nf(1, (2 + 3))\n}\n";
        let compiled = compile(source).unwrap();
        let f_at = compiled.symbols.function_at(7).unwrap();
        assert_eq!(f_at, "f");
        let ins: Vec<Instruction> = decode_all(compiled.program.as_bytes())
            .unwrap()
            .into_iter()
            .map(|(_, i)| i)
            .collect();
        let call_seq = [
            lit(7),
            lit(1),
            Instruction::PopFuncArg,
            lit(2),
            lit(3),
            Instruction::Add,
            Instruction::PopFuncArg,
            Instruction::Call,
        ];
        assert!(ins.windows(call_seq.len()).any(|w| w == call_seq), "{:?}", ins);
    }

    #[test]
    fn test_local_addresses_follow_parameters() {
        let ins: Vec<Instruction> = instructions("func main(a) {\nvar b\nb = a\n}\n")
            .into_iter()
            .map(|(_, i)| i)
            .collect();
        let assign = [
            lit(1),
            lit(0),
            Instruction::PushLocal,
            Instruction::PopLocal,
        ];
        assert!(ins.windows(4).any(|w| w == assign), "{:?}", ins);
    }

    #[test]
    fn test_aligned_operands() {
        let options = CompileOptions {
            align_operands: true,
        };
        let compiled = compile_source("func main() {\n}\n", options).unwrap();
        for (at, ins) in decode_all(compiled.program.as_bytes()).unwrap() {
            if let Instruction::PushLiteral(_) = ins {
                assert_eq!((at + 1) % 4, 0, "operand of literal at {} is misaligned", at);
            }
        }
        // main starts at the first padding byte after the prologue
        assert_eq!(compiled.symbols.functions, vec![("main".to_string(), 10)]);
        assert_eq!(Instruction::decode(compiled.program.as_bytes(), 3), Ok(lit(10)));
    }

    #[test]
    fn test_no_trailing_newline() {
        assert!(compile("func main() {\n}").is_ok());
    }

    #[test]
    fn test_missing_main() {
        assert!(matches!(
            compile("func helper() {\n}\n"),
            Err(CompileError::MissingMain)
        ));
        assert!(matches!(compile(""), Err(CompileError::MissingMain)));
    }

    #[test]
    fn test_main_must_be_function() {
        assert!(matches!(
            compile("var main\n"),
            Err(CompileError::MainNotFunction)
        ));
    }

    #[test]
    fn test_unmatched_brace() {
        assert!(matches!(
            compile("}\nfunc main() {\n}\n"),
            Err(CompileError::UnmatchedBrace { .. })
        ));
    }

    #[test]
    fn test_unclosed_block() {
        assert!(matches!(
            compile("func main() {\n"),
            Err(CompileError::UnclosedBlock { open: 1 })
        ));
    }

    #[test]
    fn test_nested_function_rejected() {
        assert!(matches!(
            compile("func main() {\nfunc inner() {\n}\n}\n"),
            Err(CompileError::NestedFunction { .. })
        ));
    }

    #[test]
    fn test_undefined_identifier_statement() {
        assert!(matches!(
            compile("func main() {\ny = 1\n}\n"),
            Err(CompileError::UndefinedSymbol { .. })
        ));
    }

    #[test]
    fn test_locals_do_not_survive_their_function() {
        assert!(matches!(
            compile("func f() {\nvar t\n}\nfunc main() {\nt = 1\n}\n"),
            Err(CompileError::UndefinedSymbol { .. })
        ));
    }

    #[test]
    fn test_duplicate_declarations() {
        assert!(matches!(
            compile("var x\nvar x\nfunc main() {\n}\n"),
            Err(CompileError::DuplicateSymbol { .. })
        ));
        assert!(matches!(
            compile("func f(a, a) {\n}\nfunc main() {\n}\n"),
            Err(CompileError::DuplicateSymbol { .. })
        ));
        assert!(matches!(
            compile("func main(a) {\nvar a\n}\n"),
            Err(CompileError::DuplicateSymbol { .. })
        ));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = compile("func f(a) {\n}\nfunc main() {\nf()\n}\n").unwrap_err();
        assert!(matches!(
            err,
            CompileError::ArityMismatch {
                expected: 1,
                found: 0,
                ..
            }
        ));
        let err = compile("func f() {\n}\nfunc main() {\nf(1, 2)\n}\n").unwrap_err();
        assert!(matches!(
            err,
            CompileError::ArityMismatch {
                expected: 0,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_control_flow_unsupported() {
        assert!(matches!(
            compile("func main() {\nif x\n}\n"),
            Err(CompileError::UnsupportedControlFlow { .. })
        ));
        assert!(matches!(
            compile("func main() {\nreturn\n}\n"),
            Err(CompileError::UnsupportedControlFlow { .. })
        ));
    }

    #[test]
    fn test_statement_must_end_with_newline() {
        let err = compile("var x y\nfunc main() {\n}\n").unwrap_err();
        assert!(matches!(err, CompileError::UnexpectedToken { .. }));
        assert!(err.to_string().contains("expected newline"));
    }

    #[test]
    fn test_brace_must_be_followed_by_newline() {
        assert!(matches!(
            compile("func main() { x\n}\n"),
            Err(CompileError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_lex_error_surfaces() {
        assert!(matches!(
            compile("var $\n"),
            Err(CompileError::Lex(_))
        ));
    }

    #[test]
    fn test_token_stream_stops_at_eof() {
        let mut stream = TokenStream::new(Vec::new());
        assert_eq!(stream.peek_kind(), TokenKind::Eof);
        stream.advance();
        stream.advance();
        assert_eq!(stream.peek_kind(), TokenKind::Eof);
    }

    #[test]
    fn test_resolve_without_pending_patch_is_internal_error() {
        let mut ctx = CompilerContext::new(CompileOptions::default());
        assert!(matches!(
            ctx.resolve_patch(0),
            Err(CompileError::Internal(_))
        ));
    }
}
