//! Boundary to the instruction-list / DMA transport.
//!
//! The manager never talks to hardware directly. Writes are enqueued and
//! forgotten; reads are enqueued, pushed as a batch tagged with a
//! [`ReadCookie`] and later drained with [`Transport::complete_all_reads`].

use stful_codec::{Instruction, Row, VmemAddr};

use crate::{DevId, PipeBitmap, TransportError};

/// Tag attached to a batch of pushed reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadCookie(pub u64);

/// Data returned for one enqueued [`Instruction::VirtualRead`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadCompletion {
    pub cookie: ReadCookie,
    pub pipe: u8,
    pub stage: u8,
    pub log_tbl: u8,
    /// Row address (`vpn<<10 | line`) that was read.
    pub addr: u32,
    pub data: Row,
}

/// Hardware transport.
pub trait Transport {
    /// Enqueue an instruction for every pipe in `pipes` at `stage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction cannot be queued.
    fn enqueue_write(
        &mut self,
        dev: DevId,
        pipes: PipeBitmap,
        stage: u8,
        instr: &Instruction,
    ) -> Result<(), TransportError>;

    /// Enqueue a block write of `data.len() / entry_size` consecutive rows
    /// starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the block cannot be queued.
    fn enqueue_block_write(
        &mut self,
        dev: DevId,
        pipes: PipeBitmap,
        addr: VmemAddr,
        entry_size: usize,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Enqueue a read instruction on one pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the read cannot be queued.
    fn enqueue_read(
        &mut self,
        dev: DevId,
        pipe: u8,
        stage: u8,
        instr: &Instruction,
    ) -> Result<(), TransportError>;

    /// Submit every read enqueued since the last push, tagged with `cookie`.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be submitted.
    fn push_reads(&mut self, dev: DevId, cookie: ReadCookie) -> Result<(), TransportError>;

    /// Wait for every pushed read and return the results.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails while waiting.
    fn complete_all_reads(&mut self, dev: DevId) -> Result<Vec<ReadCompletion>, TransportError>;

    /// Read a 32-bit register of one pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the register cannot be read.
    fn read_register(&mut self, dev: DevId, pipe: u8, addr: u32) -> Result<u32, TransportError>;
}
