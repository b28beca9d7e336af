//! Per-call hardware context.
//!
//! A [`DeviceIo`] borrows the transport and the read bookkeeping of the
//! manager for the duration of one operation on one device. Virtual devices
//! have no hardware, so every write is dropped and reads are refused.

use rustc_hash::FxHashMap;
use stful_codec::{Instruction, ROW_BYTES, VmemAddr};
use tracing::trace;

use crate::transport::{ReadCompletion, ReadCookie, Transport};
use crate::{DevId, DeviceConfig, PipeBitmap, Result, StfulError, TableHandle, metrics};

/// Cookies of pushed read batches and completions that arrived for someone
/// else while an operation was waiting for its own.
#[derive(Debug, Default)]
pub(crate) struct ReadTracker {
    next_cookie: u64,
    /// Batches owned by an asynchronous table sync.
    pub(crate) pending: FxHashMap<ReadCookie, (DevId, TableHandle)>,
    pub(crate) stash: Vec<(DevId, ReadCompletion)>,
}

impl ReadTracker {
    pub(crate) const fn alloc_cookie(&mut self) -> ReadCookie {
        self.next_cookie += 1;
        ReadCookie(self.next_cookie)
    }

    /// Stashed completions of `dev`, in arrival order.
    pub(crate) fn take_stashed(&mut self, dev: DevId) -> Vec<ReadCompletion> {
        let (mine, rest): (Vec<_>, Vec<_>) = self.stash.drain(..).partition(|(d, _)| *d == dev);
        self.stash = rest;
        mine.into_iter().map(|(_, c)| c).collect()
    }
}

/// One row read: pipe, stage and the read instruction.
#[derive(Clone, Debug)]
pub(crate) struct RowRead {
    pub pipe: u8,
    pub stage: u8,
    pub instr: Instruction,
}

pub(crate) struct DeviceIo<'a, T: Transport> {
    pub(crate) transport: &'a mut T,
    pub(crate) dev: DeviceConfig,
    pub(crate) reads: &'a mut ReadTracker,
}

impl<T: Transport> DeviceIo<'_, T> {
    pub(crate) const fn dev_id(&self) -> DevId {
        self.dev.dev_id
    }

    pub(crate) const fn is_virtual(&self) -> bool {
        self.dev.virtual_device
    }

    /// Enqueue one instruction on `pipes`.
    pub(crate) fn write(&mut self, pipes: PipeBitmap, stage: u8, instr: &Instruction) -> Result<()> {
        if self.is_virtual() || pipes.is_empty() {
            return Ok(());
        }
        trace!(dev = self.dev.dev_id, ?pipes, stage, kind = instr.kind(), "enqueue");
        self.transport
            .enqueue_write(self.dev.dev_id, pipes, stage, instr)?;
        metrics::record_instruction(instr.kind());
        Ok(())
    }

    /// Enqueue a block write of whole rows starting at `addr`.
    pub(crate) fn block_write(&mut self, pipes: PipeBitmap, addr: VmemAddr, data: &[u8]) -> Result<()> {
        if self.is_virtual() || pipes.is_empty() || data.is_empty() {
            return Ok(());
        }
        let rows = data.len() / ROW_BYTES;
        trace!(dev = self.dev.dev_id, ?pipes, stage = addr.stage, row = addr.row, rows, "block write");
        self.transport
            .enqueue_block_write(self.dev.dev_id, pipes, addr, ROW_BYTES, data)?;
        metrics::record_block_write(rows as u64);
        Ok(())
    }

    /// Enqueue and push `reads` as one batch; returns its cookie.
    pub(crate) fn submit_reads(&mut self, reads: &[RowRead]) -> Result<ReadCookie> {
        if self.is_virtual() {
            return Err(StfulError::invalid(format!(
                "device {} is virtual and has no hardware to read",
                self.dev.dev_id
            )));
        }
        let dev = self.dev.dev_id;
        for read in reads {
            self.transport
                .enqueue_read(dev, read.pipe, read.stage, &read.instr)?;
        }
        let cookie = self.reads.alloc_cookie();
        self.transport.push_reads(dev, cookie)?;
        metrics::record_reads(reads.len() as u64);
        Ok(cookie)
    }

    /// Wait until `expected` completions tagged `cookie` have arrived.
    /// Completions for other batches are stashed for the manager.
    pub(crate) fn wait_for(&mut self, cookie: ReadCookie, expected: usize) -> Result<Vec<ReadCompletion>> {
        let dev = self.dev.dev_id;
        let mut mine = Vec::with_capacity(expected);
        let stashed = self.reads.take_stashed(dev);
        for completion in stashed {
            if completion.cookie == cookie {
                mine.push(completion);
            } else {
                self.reads.stash.push((dev, completion));
            }
        }
        while mine.len() < expected {
            let batch = self.transport.complete_all_reads(dev)?;
            if batch.is_empty() {
                return Err(StfulError::unexpected(format!(
                    "transport drained with {} of {expected} reads outstanding on device {dev}",
                    expected - mine.len()
                )));
            }
            for completion in batch {
                if completion.cookie == cookie {
                    mine.push(completion);
                } else {
                    self.reads.stash.push((dev, completion));
                }
            }
        }
        Ok(mine)
    }

    /// Blocking read of a batch of rows.
    pub(crate) fn read_rows(&mut self, reads: &[RowRead]) -> Result<Vec<ReadCompletion>> {
        if reads.is_empty() {
            return Ok(Vec::new());
        }
        let cookie = self.submit_reads(reads)?;
        self.wait_for(cookie, reads.len())
    }

    pub(crate) fn read_register(&mut self, pipe: u8, addr: u32) -> Result<u32> {
        Ok(self.transport.read_register(self.dev.dev_id, pipe, addr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(cookie: u64, pipe: u8) -> ReadCompletion {
        ReadCompletion {
            cookie: ReadCookie(cookie),
            pipe,
            stage: 0,
            log_tbl: 0,
            addr: 0,
            data: [0; ROW_BYTES],
        }
    }

    #[test]
    fn test_cookies_are_unique() {
        let mut tracker = ReadTracker::default();
        let a = tracker.alloc_cookie();
        let b = tracker.alloc_cookie();
        assert_ne!(a, b);
    }

    #[test]
    fn test_take_stashed_filters_device() {
        let mut tracker = ReadTracker::default();
        tracker.stash.push((0, completion(1, 0)));
        tracker.stash.push((1, completion(2, 0)));
        tracker.stash.push((0, completion(3, 1)));
        let taken = tracker.take_stashed(0);
        assert_eq!(
            taken.iter().map(|c| c.cookie.0).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(tracker.stash.len(), 1);
        assert_eq!(tracker.stash[0].0, 1);
    }
}
