//! FIFO tables.
//!
//! A FIFO table is an indirect table used as a ring. Each instance keeps a
//! push and a pop cursor over the table's index space, which wraps across
//! stage boundaries. The occupancy counter register in the table's first
//! stage is authoritative; cursors move only after the counter adjustment
//! has been enqueued.

use rustc_hash::FxHashSet;
use stful_codec::{FifoOp, Instruction, RegisterValue, decode, decompose_index, fifo_counter_addr};
use tracing::debug;

use crate::io::DeviceIo;
use crate::table::WriteScope;
use crate::transport::Transport;
use crate::{FifoSpec, PipeBitmap, PipeTarget, Result, StatefulTable, StfulError, metrics};

/// Push and pop positions of one instance, as table indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FifoCursor {
    pub push: u32,
    pub pop: u32,
}

#[derive(Debug)]
pub(crate) struct FifoState {
    pub(crate) spec: FifoSpec,
    pub(crate) cursors: Vec<FifoCursor>,
    /// Host view of each instance's occupancy; authoritative only on virtual
    /// devices.
    pub(crate) occupancy: Vec<u32>,
}

impl FifoState {
    pub(crate) const fn new(spec: FifoSpec) -> Self {
        Self {
            spec,
            cursors: Vec::new(),
            occupancy: Vec::new(),
        }
    }

    /// Reset cursors for `instances` fresh instances.
    pub(crate) fn rebuild(&mut self, instances: usize) {
        self.cursors = vec![FifoCursor::default(); instances];
        self.occupancy = vec![0; instances];
    }
}

impl StatefulTable {
    fn fifo_state(&self) -> Result<&FifoState> {
        self.fifo
            .as_ref()
            .ok_or_else(|| StfulError::invalid(format!("table {} is not a fifo", self.handle)))
    }

    /// Current cursors of the instance `target` names.
    ///
    /// # Errors
    ///
    /// Fails if the table is not a FIFO or the target names no instance.
    pub fn fifo_cursor(&self, target: PipeTarget) -> Result<FifoCursor> {
        let inst = self.resolve_instance(target)?;
        Ok(self.fifo_state()?.cursors[inst])
    }

    fn fifo_counter_location(&self) -> Result<(u8, u8)> {
        let counter = self.fifo_state()?.spec.counter;
        Ok((self.stages[0].stage_id, counter))
    }

    fn instance_occupancy<T: Transport>(&self, io: &mut DeviceIo<'_, T>, inst: usize) -> Result<u32> {
        let fifo = self.fifo_state()?;
        if io.is_virtual() {
            return Ok(fifo.occupancy[inst]);
        }
        let (stage, counter) = self.fifo_counter_location()?;
        let pipe = self.instances[inst].pipe_id;
        let occupancy = io.read_register(pipe, fifo_counter_addr(stage, counter))?;
        if occupancy > self.num_entries_real {
            return Err(StfulError::Unexpected(format!(
                "fifo counter of table {} on pipe {pipe} reads {occupancy}, beyond {} entries",
                self.handle, self.num_entries_real
            )));
        }
        Ok(occupancy)
    }

    pub(crate) fn fifo_occupancy<T: Transport>(
        &self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
    ) -> Result<u32> {
        self.fifo_state()?;
        let inst = self.resolve_instance(target)?;
        self.instance_occupancy(io, inst)
    }

    fn fifo_adjust<T: Transport>(
        &self,
        io: &mut DeviceIo<'_, T>,
        pipes: PipeBitmap,
        op: FifoOp,
        count: u32,
    ) -> Result<()> {
        let (stage, counter) = self.fifo_counter_location()?;
        io.write(pipes, stage, &Instruction::FifoAdjust { counter, op, count })
    }

    fn record_occupancy(&self, inst: usize) {
        if let Some(fifo) = self.fifo.as_ref() {
            metrics::record_fifo_occupancy(self.dev, self.handle, fifo.occupancy[inst]);
        }
    }

    /// Push `values` at the instance's push cursor.
    pub(crate) fn fifo_enqueue<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        values: &[RegisterValue],
    ) -> Result<()> {
        let direction = self.fifo_state()?.spec.direction;
        if !direction.cpu_pushes() {
            return Err(StfulError::invalid(format!(
                "fifo table {} is popped by the cpu and pushed by the data plane",
                self.handle
            )));
        }
        let inst = self.resolve_instance(target)?;
        if values.is_empty() {
            return Ok(());
        }
        let capacity = self.num_entries_real;
        let requested = u32::try_from(values.len()).unwrap_or(u32::MAX);
        let occupancy = self.instance_occupancy(io, inst)?;
        let free = capacity - occupancy;
        if requested > free {
            return Err(StfulError::FifoFull {
                handle: self.handle,
                free,
                requested,
            });
        }

        let push = self.fifo_state()?.cursors[inst].push;
        debug!(dev = self.dev, tbl = %self.handle, pipe = self.instances[inst].pipe_id, push, count = requested, "fifo enqueue");
        for (offset, &value) in (0u32..).zip(values) {
            let index = (push + offset) % capacity;
            let (stage_idx, local) = self.locate(index)?;
            self.write_one_stage(io, stage_idx, local, WriteScope::Instance(inst), value)?;
        }
        self.fifo_adjust(io, self.instances[inst].pipes, FifoOp::Push, requested)?;

        if let Some(fifo) = self.fifo.as_mut() {
            fifo.cursors[inst].push = (push + requested) % capacity;
            fifo.occupancy[inst] = occupancy + requested;
        }
        self.record_occupancy(inst);
        Ok(())
    }

    /// Pop up to `max` entries from the instance's pop cursor.
    pub(crate) fn fifo_dequeue<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        max: u32,
    ) -> Result<Vec<RegisterValue>> {
        let direction = self.fifo_state()?.spec.direction;
        if !direction.cpu_pops() {
            return Err(StfulError::invalid(format!(
                "fifo table {} is pushed by the cpu and popped by the data plane",
                self.handle
            )));
        }
        let inst = self.resolve_instance(target)?;
        let occupancy = self.instance_occupancy(io, inst)?;
        let count = max.min(occupancy);
        if count == 0 {
            return Ok(Vec::new());
        }

        let capacity = self.num_entries_real;
        let pop = self.fifo_state()?.cursors[inst].pop;
        let pipe = self.instances[inst].pipe_id;
        debug!(dev = self.dev, tbl = %self.handle, pipe, pop, count, "fifo dequeue");

        let mut located = Vec::with_capacity(count as usize);
        for offset in 0..count {
            located.push(self.locate((pop + offset) % capacity)?);
        }

        let values = if io.is_virtual() {
            located
                .iter()
                .map(|&(stage_idx, local)| self.shadow_read(stage_idx, local, pipe))
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut seen = FxHashSet::default();
            let rows: Vec<(usize, u32)> = located
                .iter()
                .map(|&(stage_idx, local)| (stage_idx, decompose_index(self.width, local).row()))
                .filter(|key| seen.insert(*key))
                .collect();
            let data = self.read_hw_rows(io, &rows, PipeBitmap::single(pipe))?;
            located
                .iter()
                .map(|&(stage_idx, local)| {
                    let parts = decompose_index(self.width, local);
                    data.get(&(pipe, stage_idx, parts.row()))
                        .map(|row| decode(self.width, parts.subword, row))
                        .ok_or_else(|| StfulError::unexpected("fifo row missing from read data"))
                })
                .collect::<Result<Vec<_>>>()?
        };

        self.fifo_adjust(io, self.instances[inst].pipes, FifoOp::Pop, count)?;
        if let Some(fifo) = self.fifo.as_mut() {
            fifo.cursors[inst].pop = (pop + count) % capacity;
            fifo.occupancy[inst] = occupancy - count;
        }
        self.record_occupancy(inst);
        Ok(values)
    }

    /// Clear the occupancy counter and rewind the cursors of every instance
    /// `scope` touches. Tables without FIFO settings are left alone.
    pub(crate) fn fifo_clear_scope<T: Transport>(&mut self, io: &mut DeviceIo<'_, T>, scope: WriteScope) -> Result<()> {
        if self.fifo.is_none() {
            return Ok(());
        }
        let instances: Vec<usize> = match scope {
            WriteScope::AllPipes => (0..self.instances.len()).collect(),
            WriteScope::Instance(inst) => vec![inst],
            WriteScope::SinglePipe(pipe) => self.instance_for_pipe(pipe).into_iter().collect(),
        };
        let (stage, counter) = self.fifo_counter_location()?;
        for inst in instances {
            io.write(self.instances[inst].pipes, stage, &Instruction::FifoReset { counter })?;
            if let Some(fifo) = self.fifo.as_mut() {
                fifo.cursors[inst] = FifoCursor::default();
                fifo.occupancy[inst] = 0;
            }
            self.record_occupancy(inst);
        }
        Ok(())
    }

    /// Empty the instance's FIFO and rewind its cursors.
    pub(crate) fn fifo_reset<T: Transport>(&mut self, io: &mut DeviceIo<'_, T>, target: PipeTarget) -> Result<()> {
        let (stage, counter) = self.fifo_counter_location()?;
        let inst = self.resolve_instance(target)?;
        debug!(dev = self.dev, tbl = %self.handle, pipe = self.instances[inst].pipe_id, "fifo reset");
        io.write(self.instances[inst].pipes, stage, &Instruction::FifoReset { counter })?;
        if let Some(fifo) = self.fifo.as_mut() {
            fifo.cursors[inst] = FifoCursor::default();
            fifo.occupancy[inst] = 0;
        }
        self.record_occupancy(inst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FifoDirection;

    #[test]
    fn test_rebuild_resets_cursors() {
        let mut state = FifoState::new(FifoSpec {
            counter: 1,
            direction: FifoDirection::Push,
        });
        state.rebuild(2);
        state.cursors[1].push = 7;
        state.occupancy[1] = 7;
        state.rebuild(4);
        assert_eq!(state.cursors, vec![FifoCursor::default(); 4]);
        assert_eq!(state.occupancy, vec![0; 4]);
    }
}
