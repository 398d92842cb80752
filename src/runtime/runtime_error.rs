use thiserror::Error;

use crate::bytecode::op::DecodeError;
use crate::runtime::vm::VmStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("runtime error: {0}")]
    Decode(#[from] DecodeError),

    #[error("runtime error: stack underflow at {pc:#06x}")]
    StackUnderflow { pc: usize },

    #[error("runtime error: {what} capacity exceeded ({limit})")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("runtime error: local slot {address} is outside the current frame at {pc:#06x}")]
    InvalidLocal { address: i32, pc: usize },

    #[error("runtime error: global slot {address} is out of range at {pc:#06x}")]
    InvalidGlobal { address: i32, pc: usize },

    #[error("runtime error: invalid branch target {target} at {pc:#06x}")]
    InvalidTarget { target: i32, pc: usize },

    #[error("runtime error: return with an empty return stack at {pc:#06x}")]
    ReturnStackUnderflow { pc: usize },

    #[error("runtime error: no queued function argument at {pc:#06x}")]
    ArgQueueEmpty { pc: usize },

    #[error("runtime error: execution step limit exceeded ({limit})")]
    StepLimit { limit: usize },

    #[error("runtime error: machine is {status}, not runnable")]
    NotReady { status: VmStatus },
}

impl RuntimeError {
    /// Program counter the error was raised at, when known.
    pub fn pc(&self) -> Option<usize> {
        match self {
            RuntimeError::Decode(
                DecodeError::UnknownOpcode { pc, .. }
                | DecodeError::TruncatedOperand { pc, .. }
                | DecodeError::OutOfBounds { pc, .. },
            ) => Some(*pc),
            RuntimeError::StackUnderflow { pc }
            | RuntimeError::InvalidLocal { pc, .. }
            | RuntimeError::InvalidGlobal { pc, .. }
            | RuntimeError::InvalidTarget { pc, .. }
            | RuntimeError::ReturnStackUnderflow { pc }
            | RuntimeError::ArgQueueEmpty { pc } => Some(*pc),
            RuntimeError::CapacityExceeded { .. }
            | RuntimeError::StepLimit { .. }
            | RuntimeError::NotReady { .. } => None,
        }
    }
}
