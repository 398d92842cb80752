use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tracing::{Level, debug, enabled};

use crate::bytecode::op::Instruction;
use crate::bytecode::program::Program;
use crate::runtime::runtime_error::RuntimeError;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_stack_size: usize,
    pub max_call_depth: usize,
    pub max_arg_queue: usize,
    pub max_globals: usize,
    pub max_steps: Option<usize>,
    /// Emit a state dump before every instruction.
    pub trace: bool,
    /// Pause after every traced instruction that was actually logged.
    pub step_delay: Option<Duration>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_stack_size: 10_000,
            max_call_depth: 1000,
            max_arg_queue: 256,
            max_globals: 1024,
            max_steps: None,
            trace: false,
            step_delay: None,
        }
    }
}

impl VmConfig {
    /// The `--debug` preset: traced, one instruction every 100 ms.
    pub fn debug() -> Self {
        VmConfig {
            trace: true,
            step_delay: Some(Duration::from_millis(100)),
            ..VmConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Ready,
    Running,
    Halted,
    Error,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmStatus::Ready => "READY",
            VmStatus::Running => "RUNNING",
            VmStatus::Halted => "HALT",
            VmStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Saved caller state, pushed by CALL and restored by RETURN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub return_pc: usize,
    pub fp: usize,
}

pub struct Vm {
    program: Program,
    config: VmConfig,
    status: VmStatus,
    pc: usize,
    fp: usize,
    stack: Vec<i32>,
    frames: Vec<Frame>,
    args: VecDeque<i32>,
    ret: i32,
    globals: Vec<i32>,
    steps: usize,
}

impl Vm {
    pub fn new(program: Program) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: Program, config: VmConfig) -> Self {
        Self {
            program,
            config,
            status: VmStatus::Ready,
            pc: 0,
            fp: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            args: VecDeque::new(),
            ret: 0,
            globals: Vec::new(),
            steps: 0,
        }
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    pub fn stack(&self) -> &[i32] {
        &self.stack
    }

    /// Global table. Slots never written read as zero and may be absent here.
    pub fn globals(&self) -> &[i32] {
        &self.globals
    }

    pub fn global(&self, slot: usize) -> i32 {
        self.globals.get(slot).copied().unwrap_or(0)
    }

    pub fn return_value(&self) -> i32 {
        self.ret
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Run from the entry point until the machine halts or fails. A machine
    /// only runs once.
    pub fn run(&mut self) -> Result<i32, RuntimeError> {
        if self.status != VmStatus::Ready {
            return Err(RuntimeError::NotReady {
                status: self.status,
            });
        }
        self.status = VmStatus::Running;
        debug!(bytes = self.program.len(), "vm start");

        while self.status == VmStatus::Running {
            self.step()?;
        }

        debug!(steps = self.steps, ret = self.ret, "vm halted");
        Ok(self.ret)
    }

    /// Execute exactly one instruction. A ready machine starts running.
    pub fn step(&mut self) -> Result<VmStatus, RuntimeError> {
        match self.status {
            VmStatus::Ready => self.status = VmStatus::Running,
            VmStatus::Running => {}
            status => return Err(RuntimeError::NotReady { status }),
        }

        match self.execute_one() {
            Ok(()) => Ok(self.status),
            Err(e) => {
                self.status = VmStatus::Error;
                Err(e)
            }
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        if let Some(limit) = self.config.max_steps {
            if self.steps >= limit {
                return Err(RuntimeError::StepLimit { limit });
            }
        }
        self.steps += 1;
        Ok(())
    }

    fn execute_one(&mut self) -> Result<(), RuntimeError> {
        self.check_limits()?;

        let instruction = Instruction::decode(self.program.as_bytes(), self.pc)?;
        if self.config.trace {
            self.dump_state(instruction);
        }

        let mut next = self.pc + instruction.width();

        match instruction {
            Instruction::Nop => {}
            Instruction::Ecall => self.status = VmStatus::Halted,

            Instruction::Add => self.binary(i32::wrapping_add)?,
            Instruction::Sub => self.binary(i32::wrapping_sub)?,
            Instruction::Xor => self.binary(|a, b| a ^ b)?,
            Instruction::Or => self.binary(|a, b| a | b)?,
            Instruction::And => self.binary(|a, b| a & b)?,
            Instruction::Sr => self.binary(|a, b| a.wrapping_shr(b as u32))?,
            Instruction::Sl => self.binary(|a, b| a.wrapping_shl(b as u32))?,

            Instruction::Eq => self.binary(|a, b| (a == b) as i32)?,
            Instruction::Ne => self.binary(|a, b| (a != b) as i32)?,
            Instruction::Lt => self.binary(|a, b| (a < b) as i32)?,
            Instruction::Ge => self.binary(|a, b| (a >= b) as i32)?,

            Instruction::PushLiteral(value) => self.push(value)?,
            Instruction::PushLocal => {
                let address = self.pop()?;
                let slot = self.local_slot(address)?;
                self.push(self.stack[slot])?;
            }
            Instruction::PushGlobal => {
                let address = self.pop()?;
                let slot = self.global_slot(address)?;
                self.push(self.global(slot))?;
            }
            Instruction::PushFuncArg => {
                let value = self
                    .args
                    .pop_front()
                    .ok_or(RuntimeError::ArgQueueEmpty { pc: self.pc })?;
                self.push(value)?;
            }
            Instruction::PushFuncRetVal => self.push(self.ret)?,

            Instruction::PopLocal => {
                let value = self.pop()?;
                let address = self.pop()?;
                let slot = self.local_slot(address)?;
                self.stack[slot] = value;
            }
            Instruction::PopGlobal => {
                let value = self.pop()?;
                let address = self.pop()?;
                let slot = self.global_slot(address)?;
                if slot >= self.globals.len() {
                    self.globals.resize(slot + 1, 0);
                }
                self.globals[slot] = value;
            }
            Instruction::PopFuncArg => {
                let value = self.pop()?;
                if self.args.len() >= self.config.max_arg_queue {
                    return Err(RuntimeError::CapacityExceeded {
                        what: "function argument queue",
                        limit: self.config.max_arg_queue,
                    });
                }
                self.args.push_back(value);
            }
            Instruction::PopFuncRetVal => self.ret = self.pop()?,

            Instruction::Jump => {
                let condition = self.pop()?;
                let target = self.pop()?;
                if condition == 0 {
                    next = self.target(target)?;
                }
            }
            Instruction::Call => {
                let target = self.pop()?;
                let target = self.target(target)?;
                if self.frames.len() >= self.config.max_call_depth {
                    return Err(RuntimeError::CapacityExceeded {
                        what: "call depth",
                        limit: self.config.max_call_depth,
                    });
                }
                self.frames.push(Frame {
                    return_pc: next,
                    fp: self.fp,
                });
                self.fp = self.stack.len();
                next = target;
            }
            Instruction::Return => {
                let frame = self
                    .frames
                    .pop()
                    .ok_or(RuntimeError::ReturnStackUnderflow { pc: self.pc })?;
                self.stack.truncate(self.fp);
                self.fp = frame.fp;
                next = frame.return_pc;
            }
        }

        self.pc = next;
        Ok(())
    }

    fn dump_state(&self, instruction: Instruction) {
        if !enabled!(Level::DEBUG) {
            return;
        }
        debug!(
            pc = format_args!("{:04}", self.pc),
            %instruction,
            sp = self.stack.len(),
            fp = self.fp,
            top = ?self.stack.last(),
            frames = self.frames.len(),
            args = self.args.len(),
            ret = self.ret,
            "step"
        );
        if let Some(delay) = self.config.step_delay {
            std::thread::sleep(delay);
        }
    }

    fn binary(&mut self, f: impl Fn(i32, i32) -> i32) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b))
    }

    fn push(&mut self, value: i32) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(RuntimeError::CapacityExceeded {
                what: "operand stack",
                limit: self.config.max_stack_size,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<i32, RuntimeError> {
        // Values below the frame pointer belong to the caller.
        if self.stack.len() <= self.fp {
            return Err(RuntimeError::StackUnderflow { pc: self.pc });
        }
        self.stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow { pc: self.pc })
    }

    fn local_slot(&self, address: i32) -> Result<usize, RuntimeError> {
        usize::try_from(address)
            .ok()
            .map(|offset| self.fp + offset)
            .filter(|&slot| slot < self.stack.len())
            .ok_or(RuntimeError::InvalidLocal {
                address,
                pc: self.pc,
            })
    }

    fn global_slot(&self, address: i32) -> Result<usize, RuntimeError> {
        usize::try_from(address)
            .ok()
            .filter(|&slot| slot < self.config.max_globals)
            .ok_or(RuntimeError::InvalidGlobal {
                address,
                pc: self.pc,
            })
    }

    fn target(&self, target: i32) -> Result<usize, RuntimeError> {
        usize::try_from(target)
            .ok()
            .filter(|&t| t < self.program.len())
            .ok_or(RuntimeError::InvalidTarget {
                target,
                pc: self.pc,
            })
    }
}
