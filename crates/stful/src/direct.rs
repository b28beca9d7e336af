//! Direct tables: one stateful entry per match entry.
//!
//! The match-table manager owns entry placement and tells us where each
//! entry lives. The shadow is keyed by the match-entry handle.

use serde::{Deserialize, Serialize};
use stful_codec::{RegisterValue, decompose_index};
use tracing::debug;

use crate::io::DeviceIo;
use crate::query::{PipeValue, ReadFrom};
use crate::transport::Transport;
use crate::{EntryHandle, PipeBitmap, PipeTarget, Result, StatefulTable, StfulError};

/// Location of a direct entry: stage and stage-local index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectLocation {
    pub stage_id: u8,
    pub index: u32,
}

impl DirectLocation {
    #[must_use]
    pub const fn new(stage_id: u8, index: u32) -> Self {
        Self { stage_id, index }
    }
}

impl StatefulTable {
    /// Stage index of a validated direct location.
    fn direct_slot(&self, location: DirectLocation) -> Result<usize> {
        let stage_idx = self.stage_index_of(location.stage_id)?;
        let size = self.stages[stage_idx].num_entries;
        if location.index >= size {
            return Err(StfulError::IndexOutOfRange {
                handle: self.handle,
                index: location.index,
                size,
            });
        }
        Ok(stage_idx)
    }

    fn write_direct<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        pipes: PipeBitmap,
        entry: EntryHandle,
        stage_idx: usize,
        index: u32,
        value: RegisterValue,
    ) -> Result<()> {
        self.direct_write_through(pipes, entry, stage_idx, index, value);
        let instr = self.entry_instr(stage_idx, index, value.masked(self.width))?;
        io.write(pipes, self.stages[stage_idx].stage_id, &instr)
    }

    /// Word write of a direct entry at `location`; the shadow entry is created
    /// on first write.
    pub(crate) fn direct_word_write<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        entry: EntryHandle,
        location: DirectLocation,
        value: RegisterValue,
    ) -> Result<()> {
        self.check_direct(true)?;
        let stage_idx = self.direct_slot(location)?;
        let scope = self.resolve_write(target)?;
        let pipes = self.scope_pipes(scope);
        debug!(dev = self.dev, tbl = %self.handle, %entry, stage = location.stage_id, index = location.index, "write direct entry");
        self.write_direct(io, pipes, entry, stage_idx, location.index, value)
    }

    /// A match entry was added at `location`: reset its state to the initial
    /// value.
    pub(crate) fn direct_ent_add<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        entry: EntryHandle,
        location: DirectLocation,
    ) -> Result<()> {
        self.check_direct(true)?;
        let stage_idx = self.direct_slot(location)?;
        let scope = self.resolve_write(target)?;
        let pipes = self.scope_pipes(scope);
        debug!(dev = self.dev, tbl = %self.handle, %entry, stage = location.stage_id, index = location.index, "add direct entry");
        self.write_direct(io, pipes, entry, stage_idx, location.index, self.initial)
    }

    /// A match entry was deleted: forget its state.
    pub(crate) fn direct_ent_del(&mut self, target: PipeTarget, entry: EntryHandle) -> Result<()> {
        self.check_direct(true)?;
        let scope = self.resolve_write(target)?;
        let pipes = self.scope_pipes(scope);
        if !self.direct_remove(pipes, entry) {
            return Err(StfulError::EntryNotFound {
                handle: self.handle,
                entry,
            });
        }
        debug!(dev = self.dev, tbl = %self.handle, %entry, "delete direct entry");
        Ok(())
    }

    /// A match entry moved: carry each pipe's value to the new location.
    pub(crate) fn direct_ent_move<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        entry: EntryHandle,
        to: DirectLocation,
    ) -> Result<()> {
        self.check_direct(true)?;
        let stage_idx = self.direct_slot(to)?;
        let scope = self.resolve_write(target)?;
        let pipes = self.scope_pipes(scope);

        // Pipes sharing a value get one instruction.
        let mut groups: Vec<(RegisterValue, PipeBitmap)> = Vec::new();
        for pipe in pipes.iter() {
            let value = self
                .direct_entry(pipe, entry)
                .ok_or(StfulError::EntryNotFound {
                    handle: self.handle,
                    entry,
                })?
                .value;
            match groups.iter_mut().find(|(v, _)| *v == value) {
                Some((_, group)) => group.insert(pipe),
                None => groups.push((value, PipeBitmap::single(pipe))),
            }
        }

        debug!(dev = self.dev, tbl = %self.handle, %entry, stage = to.stage_id, index = to.index, "move direct entry");
        for (value, group) in groups {
            self.write_direct(io, group, entry, stage_idx, to.index, value)?;
        }
        Ok(())
    }

    /// Write one pipe's copy of a direct entry during state restore.
    pub(crate) fn restore_direct<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        pipe: u8,
        entry: EntryHandle,
        location: DirectLocation,
        value: RegisterValue,
    ) -> Result<()> {
        let stage_idx = self.direct_slot(location)?;
        self.write_direct(io, PipeBitmap::single(pipe), entry, stage_idx, location.index, value)
    }

    /// Value of a direct entry on every pipe `target` resolves to.
    pub(crate) fn direct_ent_query<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        entry: EntryHandle,
        from: ReadFrom,
    ) -> Result<Vec<PipeValue>> {
        self.check_direct(true)?;
        let pipes = self.resolve_read(target)?;
        let not_found = StfulError::EntryNotFound {
            handle: self.handle,
            entry,
        };
        let mut shadows = Vec::with_capacity(pipes.count() as usize);
        for pipe in pipes.iter() {
            let Some(shadow) = self.direct_entry(pipe, entry) else {
                return Err(not_found);
            };
            shadows.push((pipe, *shadow));
        }

        if !self.from_hardware(io, from) {
            return Ok(shadows
                .into_iter()
                .map(|(pipe, shadow)| PipeValue {
                    pipe,
                    value: shadow.value,
                })
                .collect());
        }

        let mut values = Vec::with_capacity(shadows.len());
        for (pipe, shadow) in shadows {
            let parts = decompose_index(self.width, shadow.index);
            let rows =
                self.read_hw_rows(io, &[(shadow.stage_idx, parts.row())], PipeBitmap::single(pipe))?;
            let value = rows
                .get(&(pipe, shadow.stage_idx, parts.row()))
                .map(|row| stful_codec::decode(self.width, parts.subword, row))
                .ok_or_else(|| StfulError::unexpected("direct entry read returned no data"))?;
            self.direct_set_value(pipe, entry, value);
            values.push(PipeValue { pipe, value });
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChipFamily, DeviceConfig, StageSpec, TableHandle, TableSpec};

    fn direct_table() -> StatefulTable {
        let spec = TableSpec::new(
            TableHandle(9),
            stful_codec::WidthClass::Bit32,
            vec![StageSpec::new(1, 0, 512, &[0]), StageSpec::new(2, 0, 512, &[1])],
        )
        .with_direct(true);
        StatefulTable::from_spec(&spec, &DeviceConfig::new(0, ChipFamily::Tofino, 2)).unwrap()
    }

    #[test]
    fn test_direct_slot_validation() {
        let t = direct_table();
        assert_eq!(t.direct_slot(DirectLocation::new(2, 511)).unwrap(), 1);
        assert!(matches!(
            t.direct_slot(DirectLocation::new(2, 512)),
            Err(StfulError::IndexOutOfRange { index: 512, size: 512, .. })
        ));
        assert!(matches!(
            t.direct_slot(DirectLocation::new(7, 0)),
            Err(StfulError::StageNotFound { stage: 7, .. })
        ));
    }

    #[test]
    fn test_delete_unknown_entry() {
        let mut t = direct_table();
        assert!(matches!(
            t.direct_ent_del(PipeTarget::All, EntryHandle(1)),
            Err(StfulError::EntryNotFound { .. })
        ));
    }
}
