pub mod bytecode;
pub mod frontend;
pub mod logging;
pub mod runtime;
