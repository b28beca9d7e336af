//! Shadow memory engine.
//!
//! Indirect tables mirror every hardware row of every stage per pipe in
//! `StageInfo::db`. Direct tables keep one map per pipe from match-entry
//! handle to the entry's location and value. The shadow is updated before the
//! matching instruction is handed to the transport, so a local read always
//! sees the most recently requested value.

use std::ops::Range;

use rustc_hash::FxHashMap;
use stful_codec::{ROW_BYTES, RegisterValue, Row, decode, decompose_index, encode, replicated_row};

use crate::table::StageInfo;
use crate::{EntryHandle, PipeBitmap, Result, StatefulTable, StfulError};

/// Shadow of one direct entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectEntry {
    pub stage_idx: usize,
    /// Stage-local index.
    pub index: u32,
    pub value: RegisterValue,
}

fn row_range(row: u32) -> Range<usize> {
    let start = row as usize * ROW_BYTES;
    start..start + ROW_BYTES
}

impl StageInfo {
    pub(crate) fn shadow_row(&self, pipe: u8, row: u32) -> Option<&Row> {
        self.db
            .get(usize::from(pipe))?
            .get(row_range(row))?
            .try_into()
            .ok()
    }

    fn shadow_row_mut(&mut self, pipe: u8, row: u32) -> Option<&mut Row> {
        self.db
            .get_mut(usize::from(pipe))?
            .get_mut(row_range(row))?
            .try_into()
            .ok()
    }
}

impl StatefulTable {
    /// Allocate shadow storage for every pipe of the table.
    pub(crate) fn alloc_shadow(&mut self, num_pipes: u8) -> Result<()> {
        if self.direct {
            let mut maps = Vec::new();
            maps.try_reserve_exact(usize::from(num_pipes))
                .map_err(|e| StfulError::ResourceExhausted(format!("direct shadow maps: {e}")))?;
            maps.resize_with(usize::from(num_pipes), FxHashMap::default);
            self.hdl_to_shdw = maps;
            return Ok(());
        }

        for stage in &mut self.stages {
            let bytes = stage.row_capacity() as usize * ROW_BYTES;
            let mut db = Vec::with_capacity(usize::from(num_pipes));
            for pipe in 0..num_pipes {
                let mut buf = Vec::new();
                if self.pipes.contains(pipe) {
                    buf.try_reserve_exact(bytes).map_err(|e| {
                        StfulError::ResourceExhausted(format!(
                            "shadow for stage {} pipe {pipe}: {e}",
                            stage.stage_id
                        ))
                    })?;
                    buf.resize(bytes, 0);
                }
                db.push(buf);
            }
            stage.db = db;
        }
        Ok(())
    }

    /// Record a write of `value` at a stage-local index for `pipes`.
    pub(crate) fn write_through(
        &mut self,
        stage_idx: usize,
        index: u32,
        pipes: PipeBitmap,
        value: RegisterValue,
    ) {
        if self.skip_shadow || self.direct {
            return;
        }
        let width = self.width;
        let parts = decompose_index(width, index);
        let stage = &mut self.stages[stage_idx];
        for pipe in pipes.iter() {
            if let Some(row) = stage.shadow_row_mut(pipe, parts.row()) {
                encode(width, parts.subword, value, row, None);
            }
        }
    }

    /// Shadow value of a stage-local index on one pipe.
    pub(crate) fn shadow_read(&self, stage_idx: usize, index: u32, pipe: u8) -> Result<RegisterValue> {
        let parts = decompose_index(self.width, index);
        let row = self.stages[stage_idx]
            .shadow_row(pipe, parts.row())
            .ok_or_else(|| {
                StfulError::unexpected(format!(
                    "no shadow row {} for pipe {pipe} in table {}",
                    parts.row(),
                    self.handle
                ))
            })?;
        Ok(decode(self.width, parts.subword, row))
    }

    /// Fill stage rows `rows` of `pipes` with `value` in every entry.
    pub(crate) fn block_seed(
        &mut self,
        stage_idx: usize,
        rows: Range<u32>,
        pipes: PipeBitmap,
        value: RegisterValue,
    ) {
        if self.skip_shadow || self.direct {
            return;
        }
        let pattern = replicated_row(self.width, value);
        let stage = &mut self.stages[stage_idx];
        let bytes = rows.start as usize * ROW_BYTES..rows.end as usize * ROW_BYTES;
        for pipe in pipes.iter() {
            let Some(span) = stage
                .db
                .get_mut(usize::from(pipe))
                .and_then(|db| db.get_mut(bytes.clone()))
            else {
                continue;
            };
            for row in span.chunks_exact_mut(ROW_BYTES) {
                row.copy_from_slice(&pattern);
            }
        }
    }

    /// Set the whole shadow to `value`.
    pub(crate) fn seed_shadow(&mut self, value: RegisterValue) {
        if self.direct {
            for map in &mut self.hdl_to_shdw {
                for entry in map.values_mut() {
                    entry.value = value;
                }
            }
            return;
        }
        for stage_idx in 0..self.stages.len() {
            let rows = self.stages[stage_idx].row_capacity();
            self.block_seed(stage_idx, 0..rows, self.pipes, value);
        }
    }

    /// Replace one shadow row with data read back from hardware.
    pub(crate) fn store_row(&mut self, stage_idx: usize, pipe: u8, row: u32, data: &Row) {
        if self.direct {
            return;
        }
        if let Some(shadow) = self.stages[stage_idx].shadow_row_mut(pipe, row) {
            *shadow = *data;
        }
    }

    /// Create or update the shadow of a direct entry on `pipes`.
    pub(crate) fn direct_write_through(
        &mut self,
        pipes: PipeBitmap,
        entry: EntryHandle,
        stage_idx: usize,
        index: u32,
        value: RegisterValue,
    ) {
        let value = value.masked(self.width);
        for pipe in pipes.iter() {
            if let Some(map) = self.hdl_to_shdw.get_mut(usize::from(pipe)) {
                map.insert(
                    entry,
                    DirectEntry {
                        stage_idx,
                        index,
                        value,
                    },
                );
            }
        }
    }

    pub(crate) fn direct_entry(&self, pipe: u8, entry: EntryHandle) -> Option<&DirectEntry> {
        self.hdl_to_shdw.get(usize::from(pipe))?.get(&entry)
    }

    /// Update the value of a known direct entry on one pipe.
    pub(crate) fn direct_set_value(&mut self, pipe: u8, entry: EntryHandle, value: RegisterValue) {
        let width = self.width;
        if let Some(shadow) = self
            .hdl_to_shdw
            .get_mut(usize::from(pipe))
            .and_then(|map| map.get_mut(&entry))
        {
            shadow.value = value.masked(width);
        }
    }

    /// Drop a direct entry's shadow on `pipes`; returns whether any existed.
    pub(crate) fn direct_remove(&mut self, pipes: PipeBitmap, entry: EntryHandle) -> bool {
        let mut found = false;
        for pipe in pipes.iter() {
            if let Some(map) = self.hdl_to_shdw.get_mut(usize::from(pipe)) {
                found |= map.remove(&entry).is_some();
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use stful_codec::WidthClass;

    use super::*;
    use crate::{ChipFamily, DeviceConfig, StageSpec, TableHandle, TableSpec};

    fn table(width: WidthClass, direct: bool) -> StatefulTable {
        let spec = TableSpec::new(
            TableHandle(7),
            width,
            vec![
                StageSpec::new(4, 1, 2048, &[0, 1]),
                StageSpec::new(5, 1, 100, &[2]),
            ],
        )
        .with_direct(direct);
        StatefulTable::from_spec(&spec, &DeviceConfig::new(0, ChipFamily::Tofino2, 2)).unwrap()
    }

    #[test]
    fn test_write_through_then_read() {
        let mut t = table(WidthClass::Bit32, false);
        t.write_through(0, 1500, PipeBitmap::single(1), RegisterValue::new(0xfeed));
        assert_eq!(t.shadow_read(0, 1500, 1).unwrap(), RegisterValue::new(0xfeed));
        assert_eq!(t.shadow_read(0, 1500, 0).unwrap(), RegisterValue::ZERO);
        assert_eq!(t.shadow_read(0, 1501, 1).unwrap(), RegisterValue::ZERO);
    }

    #[test]
    fn test_skip_shadow_suppresses_update() {
        let mut t = table(WidthClass::Bit8, false);
        t.skip_shadow = true;
        t.write_through(1, 3, PipeBitmap::first(2), RegisterValue::new(9));
        assert_eq!(t.shadow_read(1, 3, 0).unwrap(), RegisterValue::ZERO);
    }

    #[test]
    fn test_block_seed_rows() {
        let mut t = table(WidthClass::Bit16x2, false);
        t.block_seed(0, 10..12, PipeBitmap::first(2), RegisterValue::dual(1, 2));
        // 4 entries per row: rows 10..12 hold indices 40..48
        assert_eq!(t.shadow_read(0, 39, 0).unwrap(), RegisterValue::ZERO);
        assert_eq!(t.shadow_read(0, 40, 0).unwrap(), RegisterValue::dual(1, 2));
        assert_eq!(t.shadow_read(0, 47, 1).unwrap(), RegisterValue::dual(1, 2));
        assert_eq!(t.shadow_read(0, 48, 1).unwrap(), RegisterValue::ZERO);
    }

    #[test]
    fn test_seed_covers_second_ram() {
        let mut t = table(WidthClass::Bit64x2, false);
        t.seed_shadow(RegisterValue::dual(3, 4));
        assert_eq!(t.shadow_read(0, 2047, 1).unwrap(), RegisterValue::dual(3, 4));
        assert_eq!(t.shadow_read(1, 99, 0).unwrap(), RegisterValue::dual(3, 4));
    }

    #[test]
    fn test_direct_map_lifecycle() {
        let mut t = table(WidthClass::Bit32, true);
        let entry = EntryHandle(42);
        t.direct_write_through(PipeBitmap::first(2), entry, 1, 5, RegisterValue::new(77));
        assert_eq!(t.direct_entry(1, entry).unwrap().value, RegisterValue::new(77));
        t.direct_set_value(0, entry, RegisterValue::new(78));
        assert_eq!(t.direct_entry(0, entry).unwrap().value, RegisterValue::new(78));
        assert_eq!(t.direct_entry(1, entry).unwrap().value, RegisterValue::new(77));
        assert!(t.direct_remove(PipeBitmap::first(2), entry));
        assert!(t.direct_entry(0, entry).is_none());
        assert!(!t.direct_remove(PipeBitmap::first(2), entry));
    }
}
