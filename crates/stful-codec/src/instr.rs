//! Instructions handed to the transport.
//!
//! Each instruction has a fixed little-endian byte layout starting with an
//! opcode byte. The transport moves the bytes; this crate only builds them.

use thiserror::Error;

use crate::{ROW_BYTES, Row};

const OP_VIRTUAL_WRITE: u8 = 0x01;
const OP_VIRTUAL_READ: u8 = 0x02;
const OP_RUN_SALU: u8 = 0x03;
const OP_SET_REGISTER: u8 = 0x04;
const OP_ATOMIC_MOD: u8 = 0x05;
const OP_FIFO_ADJUST: u8 = 0x06;
const OP_FIFO_RESET: u8 = 0x07;

/// Direction of a FIFO counter adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FifoOp {
    Push,
    Pop,
}

/// A hardware instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Masked write of one row through the CPU virtual-memory path.
    VirtualWrite {
        log_tbl: u8,
        addr: u32,
        data: Row,
        mask: Row,
    },
    /// Read of one row through the CPU virtual-memory path.
    VirtualRead { log_tbl: u8, addr: u32 },
    /// Run one stateful ALU instruction against a stateful address.
    RunSalu { log_tbl: u8, instr: u8, addr: u32 },
    /// Write a 32-bit register.
    SetRegister { addr: u32, value: u32 },
    /// Open (`begin`) or close an atomic register update.
    AtomicMod { begin: bool },
    /// Adjust a FIFO occupancy counter.
    FifoAdjust { counter: u8, op: FifoOp, count: u32 },
    /// Clear a FIFO occupancy counter.
    FifoReset { counter: u8 },
}

/// Instruction decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrDecodeError {
    #[error("empty instruction")]
    Empty,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("instruction truncated: opcode {opcode:#04x} needs {expected} bytes, got {actual}")]
    Truncated {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

impl Instruction {
    /// Short name used for logging and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::VirtualWrite { .. } => "virtual_write",
            Self::VirtualRead { .. } => "virtual_read",
            Self::RunSalu { .. } => "run_salu",
            Self::SetRegister { .. } => "set_register",
            Self::AtomicMod { .. } => "atomic_mod",
            Self::FifoAdjust { .. } => "fifo_adjust",
            Self::FifoReset { .. } => "fifo_reset",
        }
    }

    /// Encoded size in bytes for an opcode.
    const fn encoded_len(opcode: u8) -> Option<usize> {
        match opcode {
            OP_VIRTUAL_WRITE => Some(2 + 4 + 2 * ROW_BYTES),
            OP_VIRTUAL_READ => Some(2 + 4),
            OP_RUN_SALU => Some(3 + 4),
            OP_SET_REGISTER => Some(1 + 4 + 4),
            OP_ATOMIC_MOD => Some(2),
            OP_FIFO_ADJUST => Some(3 + 4),
            OP_FIFO_RESET => Some(2),
            _ => None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 4 + 2 * ROW_BYTES);
        match self {
            Self::VirtualWrite {
                log_tbl,
                addr,
                data,
                mask,
            } => {
                out.push(OP_VIRTUAL_WRITE);
                out.push(*log_tbl);
                out.extend_from_slice(&addr.to_le_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(mask);
            }
            Self::VirtualRead { log_tbl, addr } => {
                out.push(OP_VIRTUAL_READ);
                out.push(*log_tbl);
                out.extend_from_slice(&addr.to_le_bytes());
            }
            Self::RunSalu {
                log_tbl,
                instr,
                addr,
            } => {
                out.push(OP_RUN_SALU);
                out.push(*log_tbl);
                out.push(*instr);
                out.extend_from_slice(&addr.to_le_bytes());
            }
            Self::SetRegister { addr, value } => {
                out.push(OP_SET_REGISTER);
                out.extend_from_slice(&addr.to_le_bytes());
                out.extend_from_slice(&value.to_le_bytes());
            }
            Self::AtomicMod { begin } => {
                out.push(OP_ATOMIC_MOD);
                out.push(u8::from(*begin));
            }
            Self::FifoAdjust { counter, op, count } => {
                out.push(OP_FIFO_ADJUST);
                out.push(*counter);
                out.push(match op {
                    FifoOp::Push => 0,
                    FifoOp::Pop => 1,
                });
                out.extend_from_slice(&count.to_le_bytes());
            }
            Self::FifoReset { counter } => {
                out.push(OP_FIFO_RESET);
                out.push(*counter);
            }
        }
        out
    }

    /// Decode an instruction produced by [`Instruction::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown opcode or a short buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, InstrDecodeError> {
        let opcode = *bytes.first().ok_or(InstrDecodeError::Empty)?;
        let expected = Self::encoded_len(opcode).ok_or(InstrDecodeError::UnknownOpcode(opcode))?;
        if bytes.len() < expected {
            return Err(InstrDecodeError::Truncated {
                opcode,
                expected,
                actual: bytes.len(),
            });
        }

        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let row_at = |at: usize| {
            let mut row = [0u8; ROW_BYTES];
            row.copy_from_slice(&bytes[at..at + ROW_BYTES]);
            row
        };

        Ok(match opcode {
            OP_VIRTUAL_WRITE => Self::VirtualWrite {
                log_tbl: bytes[1],
                addr: u32_at(2),
                data: row_at(6),
                mask: row_at(6 + ROW_BYTES),
            },
            OP_VIRTUAL_READ => Self::VirtualRead {
                log_tbl: bytes[1],
                addr: u32_at(2),
            },
            OP_RUN_SALU => Self::RunSalu {
                log_tbl: bytes[1],
                instr: bytes[2],
                addr: u32_at(3),
            },
            OP_SET_REGISTER => Self::SetRegister {
                addr: u32_at(1),
                value: u32_at(5),
            },
            OP_ATOMIC_MOD => Self::AtomicMod {
                begin: bytes[1] != 0,
            },
            OP_FIFO_ADJUST => Self::FifoAdjust {
                counter: bytes[1],
                op: if bytes[2] == 0 { FifoOp::Push } else { FifoOp::Pop },
                count: u32_at(3),
            },
            OP_FIFO_RESET => Self::FifoReset { counter: bytes[1] },
            other => return Err(InstrDecodeError::UnknownOpcode(other)),
        })
    }
}
