pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod expr;
pub mod op;
pub mod program;

pub use compile::{CompileOptions, Compiled, Compiler, compile_source};
pub use compile_error::CompileError;
pub use op::{DecodeError, Instruction, Opcode};
pub use program::{Program, SymbolMap};
