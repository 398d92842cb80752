use std::collections::BTreeMap;

use crate::bytecode::op::{DecodeError, Instruction};
use crate::bytecode::program::SymbolMap;

/// Decode a whole program front to back. Stops at the first byte that does
/// not decode.
pub fn decode_all(code: &[u8]) -> Result<Vec<(usize, Instruction)>, DecodeError> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let instruction = Instruction::decode(code, pc)?;
        out.push((pc, instruction));
        pc += instruction.width();
    }
    Ok(out)
}

/// Return disassembly as a String. Bytes that do not decode are listed as
/// `.byte` and skipped one at a time.
pub fn disassemble_to_string(code: &[u8], symbols: Option<&SymbolMap>) -> String {
    let mut output = String::new();
    let mut pc = 0;

    while pc < code.len() {
        if let Some(name) = symbols.and_then(|s| s.function_at(pc)) {
            output.push_str(&format!("      ┌─ {}\n", name));
        }

        match Instruction::decode(code, pc) {
            Ok(instruction) => {
                output.push_str(&format!("{:04}  {}", pc, instruction));
                if let Some(note) = annotate(code, pc, instruction, symbols) {
                    output.push_str(&format!("  ; {}", note));
                }
                output.push('\n');
                pc += instruction.width();
            }
            Err(_) => {
                output.push_str(&format!("{:04}  .byte 0x{:02x}\n", pc, code[pc]));
                pc += 1;
            }
        }
    }

    output
}

/// Comment for a push-literal that names what the next instruction will do
/// with it, when that is a call into a known function.
fn annotate(
    code: &[u8],
    pc: usize,
    instruction: Instruction,
    symbols: Option<&SymbolMap>,
) -> Option<String> {
    let Instruction::PushLiteral(value) = instruction else {
        return None;
    };
    let next = Instruction::decode(code, pc + instruction.width()).ok()?;
    if next != Instruction::Call {
        return None;
    }
    let name = symbols?.function_at(usize::try_from(value).ok()?)?;
    Some(format!("→ {}", name))
}

/// Print disassembly of a bytecode program
pub fn print_program(code: &[u8], symbols: Option<&SymbolMap>) {
    println!("════════════════════════════════════════");
    println!(" bytecode");
    println!(" {} bytes", code.len());
    println!("════════════════════════════════════════");
    print!("{}", disassemble_to_string(code, symbols));
}

// =============================================================================
// Statistics
// =============================================================================

pub fn op_counts(code: &[u8]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    let mut pc = 0;
    while pc < code.len() {
        match Instruction::decode(code, pc) {
            Ok(instruction) => {
                *counts.entry(instruction.opcode().mnemonic()).or_insert(0) += 1;
                pc += instruction.width();
            }
            Err(_) => {
                *counts.entry(".byte").or_insert(0) += 1;
                pc += 1;
            }
        }
    }
    counts
}

/// Print bytecode statistics
pub fn print_stats(code: &[u8]) {
    println!("=== BYTECODE STATISTICS ===\n");

    let counts = op_counts(code);
    let total: usize = counts.values().sum();

    println!("Bytes:        {}", code.len());
    println!("Instructions: {}", total);
    println!();
    println!("Op frequency:");

    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));

    for (op, count) in sorted.iter().take(10) {
        let pct = (*count as f64 / total as f64) * 100.0;
        println!("  {:<18} {:>4} ({:>5.1}%)", op, count, pct);
    }
}
