use thiserror::Error;

// =============================================================================
// OPCODE - raw instruction bytes
// =============================================================================

/// Opcode byte values. Every instruction is one of these bytes, and only
/// `PushLiteral` is followed by an operand (4 bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 1,
    Ecall = 2,

    Add = 4,
    Sub = 5,
    Xor = 6,
    Or = 7,
    And = 8,
    Sr = 9,
    Sl = 10,

    PushLiteral = 12,
    PushLocal = 13,
    PushGlobal = 14,
    PushFuncArg = 15,
    PushFuncRetVal = 16,

    PopLocal = 21,
    PopGlobal = 22,
    PopFuncArg = 23,
    PopFuncRetVal = 24,

    Eq = 28,
    Ne = 29,
    Lt = 30,
    Ge = 31,

    Jump = 32,
    Call = 33,
    Return = 34,
}

impl Opcode {
    pub const ALL: [Opcode; 25] = [
        Opcode::Nop,
        Opcode::Ecall,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Xor,
        Opcode::Or,
        Opcode::And,
        Opcode::Sr,
        Opcode::Sl,
        Opcode::PushLiteral,
        Opcode::PushLocal,
        Opcode::PushGlobal,
        Opcode::PushFuncArg,
        Opcode::PushFuncRetVal,
        Opcode::PopLocal,
        Opcode::PopGlobal,
        Opcode::PopFuncArg,
        Opcode::PopFuncRetVal,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Ge,
        Opcode::Jump,
        Opcode::Call,
        Opcode::Return,
    ];

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Encoded size in bytes, opcode included.
    pub fn width(self) -> usize {
        match self {
            Opcode::PushLiteral => 1 + OPERAND_WIDTH,
            _ => 1,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Ecall => "ECALL",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Xor => "XOR",
            Opcode::Or => "OR",
            Opcode::And => "AND",
            Opcode::Sr => "SR",
            Opcode::Sl => "SL",
            Opcode::PushLiteral => "PUSH_LITERAL",
            Opcode::PushLocal => "PUSH_LOCAL",
            Opcode::PushGlobal => "PUSH_GLOBAL",
            Opcode::PushFuncArg => "PUSH_FUNC_ARG",
            Opcode::PushFuncRetVal => "PUSH_FUNC_RET_VAL",
            Opcode::PopLocal => "POP_LOCAL",
            Opcode::PopGlobal => "POP_GLOBAL",
            Opcode::PopFuncArg => "POP_FUNC_ARG",
            Opcode::PopFuncRetVal => "POP_FUNC_RET_VAL",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Ge => "GE",
            Opcode::Jump => "JUMP",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            1 => Opcode::Nop,
            2 => Opcode::Ecall,
            4 => Opcode::Add,
            5 => Opcode::Sub,
            6 => Opcode::Xor,
            7 => Opcode::Or,
            8 => Opcode::And,
            9 => Opcode::Sr,
            10 => Opcode::Sl,
            12 => Opcode::PushLiteral,
            13 => Opcode::PushLocal,
            14 => Opcode::PushGlobal,
            15 => Opcode::PushFuncArg,
            16 => Opcode::PushFuncRetVal,
            21 => Opcode::PopLocal,
            22 => Opcode::PopGlobal,
            23 => Opcode::PopFuncArg,
            24 => Opcode::PopFuncRetVal,
            28 => Opcode::Eq,
            29 => Opcode::Ne,
            30 => Opcode::Lt,
            31 => Opcode::Ge,
            32 => Opcode::Jump,
            33 => Opcode::Call,
            34 => Opcode::Return,
            other => return Err(other),
        })
    }
}

pub const OPERAND_WIDTH: usize = 4;

// =============================================================================
// INSTRUCTION - decoded form
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    /// Halt the machine.
    Ecall,

    // binary ( a b -- a op b )
    Add,
    Sub,
    Xor,
    Or,
    And,
    Sr,
    Sl,

    /// ( -- imm )
    PushLiteral(i32),
    /// ( addr -- stack[fp + addr] )
    PushLocal,
    /// ( addr -- globals[addr] )
    PushGlobal,
    /// ( -- arg ), taking the oldest queued call argument
    PushFuncArg,
    /// ( -- ret )
    PushFuncRetVal,

    /// ( addr value -- ), stack[fp + addr] = value
    PopLocal,
    /// ( addr value -- ), globals[addr] = value
    PopGlobal,
    /// ( value -- ), queue value as a call argument
    PopFuncArg,
    /// ( value -- ), ret = value
    PopFuncRetVal,

    // comparisons ( a b -- 0|1 )
    Eq,
    Ne,
    Lt,
    Ge,

    /// ( target cond -- ), jumps when cond is zero
    Jump,
    /// ( target -- )
    Call,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{byte:02x} at {pc:#06x}")]
    UnknownOpcode { pc: usize, byte: u8 },

    #[error("truncated operand for {opcode} at {pc:#06x}")]
    TruncatedOperand { pc: usize, opcode: &'static str },

    #[error("program counter {pc:#06x} is outside the program ({len} bytes)")]
    OutOfBounds { pc: usize, len: usize },
}

impl Instruction {
    pub fn opcode(self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::Ecall => Opcode::Ecall,
            Instruction::Add => Opcode::Add,
            Instruction::Sub => Opcode::Sub,
            Instruction::Xor => Opcode::Xor,
            Instruction::Or => Opcode::Or,
            Instruction::And => Opcode::And,
            Instruction::Sr => Opcode::Sr,
            Instruction::Sl => Opcode::Sl,
            Instruction::PushLiteral(_) => Opcode::PushLiteral,
            Instruction::PushLocal => Opcode::PushLocal,
            Instruction::PushGlobal => Opcode::PushGlobal,
            Instruction::PushFuncArg => Opcode::PushFuncArg,
            Instruction::PushFuncRetVal => Opcode::PushFuncRetVal,
            Instruction::PopLocal => Opcode::PopLocal,
            Instruction::PopGlobal => Opcode::PopGlobal,
            Instruction::PopFuncArg => Opcode::PopFuncArg,
            Instruction::PopFuncRetVal => Opcode::PopFuncRetVal,
            Instruction::Eq => Opcode::Eq,
            Instruction::Ne => Opcode::Ne,
            Instruction::Lt => Opcode::Lt,
            Instruction::Ge => Opcode::Ge,
            Instruction::Jump => Opcode::Jump,
            Instruction::Call => Opcode::Call,
            Instruction::Return => Opcode::Return,
        }
    }

    pub fn width(self) -> usize {
        self.opcode().width()
    }

    /// Decode the instruction starting at `pc`.
    pub fn decode(code: &[u8], pc: usize) -> Result<Instruction, DecodeError> {
        let &byte = code.get(pc).ok_or(DecodeError::OutOfBounds {
            pc,
            len: code.len(),
        })?;
        let opcode = Opcode::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { pc, byte })?;

        Ok(match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Ecall => Instruction::Ecall,
            Opcode::Add => Instruction::Add,
            Opcode::Sub => Instruction::Sub,
            Opcode::Xor => Instruction::Xor,
            Opcode::Or => Instruction::Or,
            Opcode::And => Instruction::And,
            Opcode::Sr => Instruction::Sr,
            Opcode::Sl => Instruction::Sl,
            Opcode::PushLiteral => {
                let operand = code
                    .get(pc + 1..pc + 1 + OPERAND_WIDTH)
                    .ok_or(DecodeError::TruncatedOperand {
                        pc,
                        opcode: opcode.mnemonic(),
                    })?;
                let mut bytes = [0u8; OPERAND_WIDTH];
                bytes.copy_from_slice(operand);
                Instruction::PushLiteral(i32::from_le_bytes(bytes))
            }
            Opcode::PushLocal => Instruction::PushLocal,
            Opcode::PushGlobal => Instruction::PushGlobal,
            Opcode::PushFuncArg => Instruction::PushFuncArg,
            Opcode::PushFuncRetVal => Instruction::PushFuncRetVal,
            Opcode::PopLocal => Instruction::PopLocal,
            Opcode::PopGlobal => Instruction::PopGlobal,
            Opcode::PopFuncArg => Instruction::PopFuncArg,
            Opcode::PopFuncRetVal => Instruction::PopFuncRetVal,
            Opcode::Eq => Instruction::Eq,
            Opcode::Ne => Instruction::Ne,
            Opcode::Lt => Instruction::Lt,
            Opcode::Ge => Instruction::Ge,
            Opcode::Jump => Instruction::Jump,
            Opcode::Call => Instruction::Call,
            Opcode::Return => Instruction::Return,
        })
    }

    /// Append the encoded instruction to `out`.
    pub fn encode(self, out: &mut Vec<u8>) {
        out.push(self.opcode().byte());
        if let Instruction::PushLiteral(value) = self {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::PushLiteral(value) => {
                write!(f, "{:<18}{}", self.opcode().mnemonic(), value)
            }
            other => write!(f, "{}", other.opcode().mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_table_is_consistent() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.byte()), Ok(op));
        }
        assert_eq!(Opcode::try_from(0), Err(0));
        assert_eq!(Opcode::try_from(20), Err(20));
        assert_eq!(Opcode::try_from(0xff), Err(0xff));
    }

    #[test]
    fn test_decode_push_literal_little_endian() {
        let code = [Opcode::PushLiteral.byte(), 0x2a, 0x01, 0x00, 0x00];
        assert_eq!(Instruction::decode(&code, 0), Ok(Instruction::PushLiteral(0x012a)));
        assert_eq!(Instruction::PushLiteral(0).width(), 5);
    }

    #[test]
    fn test_decode_negative_literal() {
        let mut code = Vec::new();
        Instruction::PushLiteral(-1).encode(&mut code);
        assert_eq!(code, vec![12, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(Instruction::decode(&code, 0), Ok(Instruction::PushLiteral(-1)));
    }

    #[test]
    fn test_decode_truncated_operand() {
        let code = [Opcode::PushLiteral.byte(), 0x01, 0x02];
        assert!(matches!(
            Instruction::decode(&code, 0),
            Err(DecodeError::TruncatedOperand { pc: 0, .. })
        ));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let code = [Opcode::Nop.byte(), 0x63];
        assert_eq!(
            Instruction::decode(&code, 1),
            Err(DecodeError::UnknownOpcode { pc: 1, byte: 0x63 })
        );
    }

    #[test]
    fn test_decode_out_of_bounds() {
        assert_eq!(
            Instruction::decode(&[], 0),
            Err(DecodeError::OutOfBounds { pc: 0, len: 0 })
        );
    }

    #[test]
    fn test_single_byte_widths() {
        assert_eq!(Instruction::Call.width(), 1);
        assert_eq!(Instruction::Return.width(), 1);
        assert_eq!(Opcode::Ecall.width(), 1);
    }
}
