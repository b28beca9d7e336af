//! Codec for stateful register tables.
//!
//! This crate is pure: it maps logical indices onto the 128-bit SRAM row
//! geometry, packs typed values into rows, builds the address forms used by the
//! CPU and the stateful ALU, and encodes the instructions handed to the
//! transport. It performs no I/O.

mod addr;
mod instr;
mod regs;
mod row;
mod value;
mod width;

pub use addr::*;
pub use instr::*;
pub use regs::*;
pub use row::*;
pub use value::*;
pub use width::*;
