//! Write and reset pipeline.
//!
//! Every write updates the shadow first and then enqueues one instruction per
//! stage: a masked virtual write carrying the encoded entry, or for one-bit
//! tables a stateful-ALU set/clear instruction aimed at the entry's virtual
//! address. Resets split the range into a leading partial row, whole rows
//! that go out as block writes, and a trailing partial row.

use std::ops::Range;

use stful_codec::{
    Instruction, RAM_LINES, ROW_BYTES, RegisterValue, WidthClass, compose_virt_addr,
    decompose_index, encode, replicated_row, row_addr,
};
use tracing::debug;

use crate::direct::DirectLocation;
use crate::io::DeviceIo;
use crate::table::WriteScope;
use crate::transport::Transport;
use crate::{EntryHandle, PipeBitmap, PipeTarget, Result, StatefulTable, StfulError};

/// How a reset of `count` entries starting at a stage-local index falls onto
/// rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResetSplit {
    /// Entries before the first row boundary.
    pub leading: u32,
    /// Whole rows.
    pub full: u32,
    /// Entries after the last whole row.
    pub trailing: u32,
}

impl ResetSplit {
    pub(crate) const fn new(start: u32, count: u32, entries_per_row: u32) -> Self {
        let to_boundary = (entries_per_row - start % entries_per_row) % entries_per_row;
        let leading = if count < to_boundary { count } else { to_boundary };
        let rest = count - leading;
        Self {
            leading,
            full: rest / entries_per_row,
            trailing: rest % entries_per_row,
        }
    }
}

/// A deferred table update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Word write to an indirect table.
    IndexWrite {
        pipe: PipeTarget,
        index: u32,
        value: RegisterValue,
    },
    /// Reset a direct entry to the table's initial value at `location`.
    EntryReset {
        entry: EntryHandle,
        location: DirectLocation,
        pipe: PipeTarget,
    },
}

/// Ordered list of deferred updates.
#[derive(Clone, Debug, Default)]
pub struct OpList {
    ops: Vec<Operation>,
}

impl OpList {
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Append an operation.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the list cannot grow.
    pub fn push(&mut self, op: Operation) -> Result<()> {
        self.ops
            .try_reserve(1)
            .map_err(|e| StfulError::ResourceExhausted(format!("operation list: {e}")))?;
        self.ops.push(op);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }
}

impl<'a> IntoIterator for &'a OpList {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl StatefulTable {
    /// Hardware instruction writing `value` at a stage-local index.
    pub(crate) fn entry_instr(&self, stage_idx: usize, index: u32, value: RegisterValue) -> Result<Instruction> {
        let stage = &self.stages[stage_idx];
        let parts = decompose_index(self.width, index);
        let (vpn, line) = stage.row_location(parts.row()).ok_or_else(|| {
            StfulError::unexpected(format!(
                "row {} beyond the RAMs of stage {} in table {}",
                parts.row(),
                stage.stage_id,
                self.handle
            ))
        })?;

        if self.width == WidthClass::Bit1 {
            let instr = if value.is_set() {
                stage.set_bit_instr
            } else {
                stage.clr_bit_instr
            };
            return Ok(Instruction::RunSalu {
                log_tbl: stage.log_tbl,
                instr,
                addr: compose_virt_addr(self.width, vpn, line, parts.subword),
            });
        }

        let mut data = [0u8; ROW_BYTES];
        let mut mask = [0u8; ROW_BYTES];
        encode(self.width, parts.subword, value, &mut data, Some(&mut mask));
        Ok(Instruction::VirtualWrite {
            log_tbl: stage.log_tbl,
            addr: row_addr(vpn, line),
            data,
            mask,
        })
    }

    /// Write one entry of one stage: shadow first, then hardware.
    pub(crate) fn write_one_stage<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        stage_idx: usize,
        index: u32,
        scope: WriteScope,
        value: RegisterValue,
    ) -> Result<()> {
        let pipes = self.scope_pipes(scope);
        let value = value.masked(self.width);
        self.write_through(stage_idx, index, pipes, value);
        let instr = self.entry_instr(stage_idx, index, value)?;
        io.write(pipes, self.stages[stage_idx].stage_id, &instr)
    }

    /// Word write to an indirect table.
    pub(crate) fn ent_write<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        index: u32,
        value: RegisterValue,
    ) -> Result<()> {
        self.check_direct(false)?;
        let (stage_idx, local) = self.locate(index)?;
        let scope = self.resolve_write(target)?;
        debug!(dev = self.dev, tbl = %self.handle, index, ?target, "write entry");
        self.write_one_stage(io, stage_idx, local, scope, value)
    }

    /// Fill rows `rows` of a stage with `value`, one block write per RAM.
    fn block_fill<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        stage_idx: usize,
        rows: Range<u32>,
        pipes: PipeBitmap,
        value: RegisterValue,
    ) -> Result<()> {
        self.block_seed(stage_idx, rows.clone(), pipes, value);
        if io.is_virtual() {
            return Ok(());
        }

        let pattern = replicated_row(self.width, value);
        let stage = &self.stages[stage_idx];
        let mut row = rows.start;
        while row < rows.end {
            let ram_end = (row / RAM_LINES + 1) * RAM_LINES;
            let chunk_end = ram_end.min(rows.end);
            let addr = stage.vmem_addr(row).ok_or_else(|| {
                StfulError::unexpected(format!(
                    "row {row} beyond the RAMs of stage {}",
                    stage.stage_id
                ))
            })?;
            let len = (chunk_end - row) as usize * ROW_BYTES;
            let mut data = Vec::new();
            data.try_reserve_exact(len)
                .map_err(|e| StfulError::ResourceExhausted(format!("block write buffer: {e}")))?;
            for _ in row..chunk_end {
                data.extend_from_slice(&pattern);
            }
            io.block_write(pipes, addr, &data)?;
            row = chunk_end;
        }
        Ok(())
    }

    /// Reset `count` entries of one stage starting at a stage-local index.
    fn reset_stage_span<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        stage_idx: usize,
        start: u32,
        count: u32,
        scope: WriteScope,
        value: RegisterValue,
    ) -> Result<()> {
        let epr = self.width.entries_per_row();
        let split = ResetSplit::new(start, count, epr);
        for index in start..start + split.leading {
            self.write_one_stage(io, stage_idx, index, scope, value)?;
        }
        if split.full > 0 {
            let first = (start + split.leading) / epr;
            let pipes = self.scope_pipes(scope);
            self.block_fill(io, stage_idx, first..first + split.full, pipes, value)?;
        }
        let tail = start + split.leading + split.full * epr;
        for index in tail..tail + split.trailing {
            self.write_one_stage(io, stage_idx, index, scope, value)?;
        }
        Ok(())
    }

    /// Reset table indices `start..start + count` to `value`, or to the
    /// initial value when `value` is `None`.
    pub(crate) fn reset_range<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        start: u32,
        count: u32,
        scope: WriteScope,
        value: Option<RegisterValue>,
    ) -> Result<()> {
        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.num_entries_real)
            .ok_or(StfulError::IndexOutOfRange {
                handle: self.handle,
                index: start.saturating_add(count.saturating_sub(1)),
                size: self.num_entries_real,
            })?;
        let value = value.unwrap_or(self.initial).masked(self.width);
        let mut index = start;
        while index < end {
            let (stage_idx, local) = self.locate(index)?;
            let stage = &self.stages[stage_idx];
            let n = end.min(stage.base + stage.num_entries) - index;
            self.reset_stage_span(io, stage_idx, local, n, scope, value)?;
            index += n;
        }
        Ok(())
    }

    pub(crate) fn table_reset<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
    ) -> Result<()> {
        let scope = self.resolve_write(target)?;
        debug!(dev = self.dev, tbl = %self.handle, ?target, "reset table");
        if self.direct {
            let pipes = self.scope_pipes(scope);
            let initial = self.initial;
            for pipe in pipes.iter() {
                if let Some(map) = self.hdl_to_shdw.get_mut(usize::from(pipe)) {
                    for entry in map.values_mut() {
                        entry.value = initial;
                    }
                }
            }
            for stage_idx in 0..self.stages.len() {
                let rows = self.stages[stage_idx].rows_used(self.width);
                self.block_fill(io, stage_idx, 0..rows, pipes, initial)?;
            }
            return Ok(());
        }
        self.fifo_clear_scope(io, scope)?;
        self.reset_range(io, 0, self.num_entries_real, scope, None)
    }

    pub(crate) fn table_reset_range<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        start: u32,
        count: u32,
        value: Option<RegisterValue>,
    ) -> Result<()> {
        self.check_direct(false)?;
        let scope = self.resolve_write(target)?;
        debug!(dev = self.dev, tbl = %self.handle, start, count, ?target, ?value, "reset range");
        self.reset_range(io, start, count, scope, value)
    }

    /// Seed the whole table, shadow and hardware, with the initial value on
    /// every pipe.
    pub(crate) fn seed<T: Transport>(&mut self, io: &mut DeviceIo<'_, T>) -> Result<()> {
        let initial = self.initial;
        self.seed_shadow(initial);
        for stage_idx in 0..self.stages.len() {
            let rows = self.stages[stage_idx].row_capacity();
            self.block_fill(io, stage_idx, 0..rows, self.pipes, initial)?;
        }
        Ok(())
    }

    /// Apply `ops` in order, stopping at the first failure.
    pub(crate) fn process_ops<T: Transport>(&mut self, io: &mut DeviceIo<'_, T>, ops: &OpList) -> Result<()> {
        debug!(dev = self.dev, tbl = %self.handle, ops = ops.len(), "process operation list");
        for op in ops {
            match *op {
                Operation::IndexWrite { pipe, index, value } => {
                    self.ent_write(io, pipe, index, value)?;
                }
                Operation::EntryReset {
                    entry,
                    location,
                    pipe,
                } => {
                    self.direct_ent_add(io, pipe, entry, location)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChipFamily, DeviceConfig, StageSpec, TableHandle, TableSpec};

    #[test]
    fn test_reset_split_covers_exactly() {
        for epr in [1u32, 2, 4, 8, 16, 128] {
            for start in 0..2 * epr + 3 {
                for count in 0..3 * epr + 5 {
                    let split = ResetSplit::new(start, count, epr);
                    assert_eq!(split.leading + split.full * epr + split.trailing, count);
                    assert!(split.leading < epr.max(1));
                    assert!(split.trailing < epr);
                    if split.full > 0 {
                        assert_eq!((start + split.leading) % epr, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reset_split_small_range_inside_row() {
        assert_eq!(
            ResetSplit::new(3, 2, 16),
            ResetSplit {
                leading: 2,
                full: 0,
                trailing: 0
            }
        );
        assert_eq!(
            ResetSplit::new(14, 40, 16),
            ResetSplit {
                leading: 2,
                full: 2,
                trailing: 6
            }
        );
    }

    #[test]
    fn test_op_list_order() {
        let mut ops = OpList::new();
        for index in [3, 1, 2] {
            ops.push(Operation::IndexWrite {
                pipe: PipeTarget::All,
                index,
                value: RegisterValue::new(1),
            })
            .unwrap();
        }
        let order: Vec<u32> = ops
            .iter()
            .map(|op| match op {
                Operation::IndexWrite { index, .. } => *index,
                Operation::EntryReset { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    fn table(width: WidthClass) -> StatefulTable {
        let entries = 4 * RAM_LINES * width.entries_per_row();
        let spec = TableSpec::new(
            TableHandle(2),
            width,
            vec![StageSpec::new(6, 3, entries, &[0, 1, 2, 3])],
        );
        StatefulTable::from_spec(&spec, &DeviceConfig::new(0, ChipFamily::Tofino2, 1)).unwrap()
    }

    #[test]
    fn test_entry_instr_masked_write() {
        let t = table(WidthClass::Bit16);
        // index 1025 -> row 128, subword 1 (8 entries per row)
        let instr = t.entry_instr(0, 1025, RegisterValue::new(0xabcd)).unwrap();
        let Instruction::VirtualWrite { log_tbl, addr, data, mask } = instr else {
            panic!("expected a virtual write");
        };
        assert_eq!(log_tbl, 3);
        assert_eq!(addr, row_addr(0, 128));
        assert_eq!(&data[2..4], &[0xcd, 0xab]);
        assert_eq!(mask.iter().filter(|&&b| b == 0xff).count(), 2);
    }

    #[test]
    fn test_entry_instr_one_bit_uses_salu() {
        let t = table(WidthClass::Bit1);
        // 128 entries per row, 1024 rows per RAM: index 131072 is ram 1 line 0
        let set = t.entry_instr(0, 131_072 + 5, RegisterValue::bit(true)).unwrap();
        assert_eq!(
            set,
            Instruction::RunSalu {
                log_tbl: 3,
                instr: 0,
                addr: compose_virt_addr(WidthClass::Bit1, 1, 0, 5)
            }
        );
        let clr = t.entry_instr(0, 5, RegisterValue::bit(false)).unwrap();
        assert!(matches!(clr, Instruction::RunSalu { instr: 1, .. }));
    }
}
