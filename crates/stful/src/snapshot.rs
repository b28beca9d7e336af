//! Table state log and restore.
//!
//! A snapshot lists, per pipe and stage, the entries whose value differs from
//! the table's initial value. One-bit tables are logged as runs of flipped
//! bits within a row. Direct tables log every entry with its match-entry
//! handle and stage-local index, since restore has to recreate the entry map.

use serde::{Deserialize, Serialize};
use stful_codec::{ROW_BITS, RegisterValue, WidthClass, decode, decompose_index};
use tracing::{debug, info};

use crate::io::DeviceIo;
use crate::table::WriteScope;
use crate::transport::Transport;
use crate::{EntryHandle, PipeBitmap, Result, StatefulTable, StfulError, TableHandle};

/// One logged entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    /// Table index for indirect tables, stage-local index for direct tables.
    pub index: u32,
    pub value: RegisterValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntryHandle>,
}

/// Consecutive bits of one row of a one-bit table that differ from the
/// initial value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitRun {
    /// Stage row.
    pub row: u32,
    pub offset: u32,
    pub len: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage_id: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntrySnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bit_runs: Vec<BitRun>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeSnapshot {
    pub pipe: u8,
    pub stages: Vec<StageSnapshot>,
}

/// Logged state of one table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub handle: TableHandle,
    pub width: WidthClass,
    pub symmetric: bool,
    #[serde(default)]
    pub scopes: Vec<PipeBitmap>,
    pub pipes: Vec<PipeSnapshot>,
}

impl TableSnapshot {
    /// Number of logged entries and flipped bits over all pipes.
    #[must_use]
    pub fn logged_values(&self) -> usize {
        self.pipes
            .iter()
            .flat_map(|p| &p.stages)
            .map(|s| s.entries.len() + s.bit_runs.iter().map(|r| r.len as usize).sum::<usize>())
            .sum()
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns an error if `json` is not a valid snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Runs of bits in `row` that differ from `initial`.
fn bit_runs(row_idx: u32, row: &[u8; 16], initial: bool, limit: u32) -> Vec<BitRun> {
    let bits = u128::from_le_bytes(*row);
    let flipped = if initial { !bits } else { bits };
    let mut runs = Vec::new();
    let mut offset = 0;
    while offset < limit {
        if flipped >> offset & 1 == 0 {
            offset += 1;
            continue;
        }
        let start = offset;
        while offset < limit && flipped >> offset & 1 == 1 {
            offset += 1;
        }
        runs.push(BitRun {
            row: row_idx,
            offset: start,
            len: offset - start,
        });
    }
    runs
}

impl StatefulTable {
    /// Indirect stages log only entries that differ from the initial value.
    /// Direct stages log every entry, defaults included, since restore has
    /// to recreate the entry map and not just the values.
    fn log_stage(&self, pipe: u8, stage_idx: usize) -> Result<StageSnapshot> {
        let stage = &self.stages[stage_idx];
        let mut snap = StageSnapshot {
            stage_id: stage.stage_id,
            entries: Vec::new(),
            bit_runs: Vec::new(),
        };

        if self.direct {
            if let Some(map) = self.hdl_to_shdw.get(usize::from(pipe)) {
                snap.entries = map
                    .iter()
                    .filter(|(_, shadow)| shadow.stage_idx == stage_idx)
                    .map(|(&entry, shadow)| EntrySnapshot {
                        index: shadow.index,
                        value: shadow.value,
                        entry: Some(entry),
                    })
                    .collect();
                snap.entries.sort_by_key(|e| (e.index, e.entry));
            }
            return Ok(snap);
        }

        if self.width == WidthClass::Bit1 {
            let initial = self.initial.is_set();
            for row in 0..stage.rows_used(self.width) {
                let Some(data) = stage.shadow_row(pipe, row) else {
                    return Err(StfulError::unexpected(format!(
                        "no shadow row {row} for pipe {pipe}"
                    )));
                };
                let limit = (stage.num_entries - row * ROW_BITS).min(ROW_BITS);
                snap.bit_runs.extend(bit_runs(row, data, initial, limit));
            }
            return Ok(snap);
        }

        for local in 0..stage.num_entries {
            let parts = decompose_index(self.width, local);
            let Some(data) = stage.shadow_row(pipe, parts.row()) else {
                return Err(StfulError::unexpected(format!(
                    "no shadow row {} for pipe {pipe}",
                    parts.row()
                )));
            };
            let value = decode(self.width, parts.subword, data);
            if !value.same_as(self.initial, self.width) {
                snap.entries.push(EntrySnapshot {
                    index: stage.base + local,
                    value,
                    entry: None,
                });
            }
        }
        Ok(snap)
    }

    /// Log the shadow of every pipe of the table.
    pub(crate) fn log_state(&self) -> Result<TableSnapshot> {
        let mut pipes = Vec::with_capacity(self.pipes.count() as usize);
        for pipe in self.pipes.iter() {
            let stages = (0..self.stages.len())
                .map(|stage_idx| self.log_stage(pipe, stage_idx))
                .collect::<Result<Vec<_>>>()?;
            pipes.push(PipeSnapshot { pipe, stages });
        }
        let snapshot = TableSnapshot {
            handle: self.handle,
            width: self.width,
            symmetric: self.symmetric,
            scopes: if self.symmetric {
                Vec::new()
            } else {
                self.scopes.clone()
            },
            pipes,
        };
        debug!(dev = self.dev, tbl = %self.handle, values = snapshot.logged_values(), "logged table state");
        Ok(snapshot)
    }

    /// Replay a snapshot: reconcile the mode, then write every logged entry
    /// to its pipe.
    pub(crate) fn restore_state<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        snapshot: &TableSnapshot,
    ) -> Result<()> {
        if snapshot.handle != self.handle || snapshot.width != self.width {
            return Err(StfulError::invalid(format!(
                "snapshot of table {} ({}-bit) does not match table {} ({}-bit)",
                snapshot.handle, snapshot.width, self.handle, self.width
            )));
        }
        for pipe_snap in &snapshot.pipes {
            if !self.pipes.contains(pipe_snap.pipe) {
                return Err(StfulError::invalid(format!(
                    "snapshot names pipe {} which table {} does not use",
                    pipe_snap.pipe, self.handle
                )));
            }
            for stage_snap in &pipe_snap.stages {
                self.stage_index_of(stage_snap.stage_id)?;
            }
        }

        self.set_symmetric_mode(io, snapshot.symmetric, &snapshot.scopes)?;
        info!(dev = self.dev, tbl = %self.handle, values = snapshot.logged_values(), "restoring table state");

        for pipe_snap in &snapshot.pipes {
            let pipe = pipe_snap.pipe;
            let scope = WriteScope::SinglePipe(pipe);
            for stage_snap in &pipe_snap.stages {
                let stage_idx = self.stage_index_of(stage_snap.stage_id)?;
                for entry in &stage_snap.entries {
                    self.restore_entry(io, pipe, stage_idx, entry)?;
                }
                let flipped = RegisterValue::bit(!self.initial.is_set());
                for run in &stage_snap.bit_runs {
                    for bit in run.offset..run.offset + run.len {
                        let local = run.row * ROW_BITS + bit;
                        if local >= self.stages[stage_idx].num_entries {
                            return Err(StfulError::IndexOutOfRange {
                                handle: self.handle,
                                index: local,
                                size: self.stages[stage_idx].num_entries,
                            });
                        }
                        self.write_one_stage(io, stage_idx, local, scope, flipped)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn restore_entry<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        pipe: u8,
        stage_idx: usize,
        entry: &EntrySnapshot,
    ) -> Result<()> {
        let stage_id = self.stages[stage_idx].stage_id;
        if self.direct {
            let handle = entry.entry.ok_or_else(|| {
                StfulError::invalid("direct table snapshot entry without an entry handle")
            })?;
            let location = crate::DirectLocation::new(stage_id, entry.index);
            return self.restore_direct(io, pipe, handle, location, entry.value);
        }

        let (located, local) = self.locate(entry.index)?;
        if located != stage_idx {
            return Err(StfulError::invalid(format!(
                "snapshot index {} is not in stage {stage_id}",
                entry.index
            )));
        }
        self.write_one_stage(io, stage_idx, local, WriteScope::SinglePipe(pipe), entry.value)
    }
}
