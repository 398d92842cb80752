use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::bytecode::op::{Instruction, OPERAND_WIDTH, Opcode};

/// A compiled program: a flat, headerless byte sequence. Addresses are byte
/// offsets into `code`, and execution starts at offset 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<u8>,
}

/// Offset of a push-literal operand that still holds placeholder zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite(pub usize);

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(code: Vec<u8>) -> Self {
        Self { code }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn emit(&mut self, instruction: Instruction) {
        trace!(at = self.code.len(), %instruction, "emit");
        instruction.encode(&mut self.code);
    }

    /// Emit a push-literal whose operand is filled in later.
    pub fn emit_placeholder_literal(&mut self) -> PatchSite {
        self.emit(Instruction::PushLiteral(0));
        PatchSite(self.code.len() - OPERAND_WIDTH)
    }

    /// Overwrite the operand at `site`. The site must come from
    /// `emit_placeholder_literal` on this program.
    pub fn patch_literal(&mut self, site: PatchSite, value: i32) {
        let PatchSite(at) = site;
        debug_assert_eq!(self.code[at - 1], Opcode::PushLiteral.byte());
        self.code[at..at + OPERAND_WIDTH].copy_from_slice(&value.to_le_bytes());
    }

    /// Pad with no-ops until the next push-literal operand would start on a
    /// 4-byte boundary.
    pub fn align_next_operand(&mut self) {
        while (self.code.len() + 1) % OPERAND_WIDTH != 0 {
            self.emit(Instruction::Nop);
        }
    }
}

/// Debug sidecar written next to a bytecode file: names for function entry
/// points and global slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMap {
    pub functions: Vec<(String, usize)>,
    pub globals: Vec<(String, usize)>,
}

impl SymbolMap {
    pub fn function_at(&self, address: usize) -> Option<&str> {
        self.functions
            .iter()
            .find(|(_, at)| *at == address)
            .map(|(name, _)| name.as_str())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_literal_overwrites_operand_only() {
        let mut program = Program::new();
        let site = program.emit_placeholder_literal();
        program.emit(Instruction::Call);
        assert_eq!(site, PatchSite(1));

        program.patch_literal(site, 0x0102_0304);
        assert_eq!(program.code, vec![12, 0x04, 0x03, 0x02, 0x01, 33]);
    }

    #[test]
    fn test_align_next_operand() {
        let mut program = Program::new();
        program.align_next_operand();
        assert_eq!(program.len(), 3);
        program.emit(Instruction::PushLiteral(7));
        // opcode at 3, operand at 4..8
        assert_eq!(program.code[3], Opcode::PushLiteral.byte());
        assert_eq!(program.len(), 8);

        program.align_next_operand();
        assert_eq!(program.len(), 11);
        assert!(program.code[8..11].iter().all(|&b| b == Opcode::Nop.byte()));
    }

    #[test]
    fn test_symbol_map_postcard_roundtrip() {
        let map = SymbolMap {
            functions: vec![("main".to_string(), 7), ("add".to_string(), 24)],
            globals: vec![("x".to_string(), 0)],
        };
        let bytes = map.to_bytes().unwrap();
        let back = SymbolMap::from_bytes(&bytes).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.function_at(24), Some("add"));
        assert_eq!(back.function_at(8), None);
    }

    #[test]
    fn test_symbol_map_rejects_garbage() {
        assert!(SymbolMap::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
