pub mod lexer;
pub mod symbols;
pub mod token;
pub mod token_dumper;
