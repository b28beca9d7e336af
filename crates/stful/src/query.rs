//! Entry queries.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use stful_codec::{Instruction, RegisterValue, Row, decode, decompose_index};
use tracing::debug;

use crate::io::{DeviceIo, RowRead};
use crate::transport::Transport;
use crate::{PipeBitmap, PipeTarget, Result, StatefulTable, StfulError};

/// Where a query takes its values from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFrom {
    #[default]
    Shadow,
    /// Read the rows from hardware and refresh the shadow with them.
    Hardware,
}

/// Value of an entry on one pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeValue {
    pub pipe: u8,
    pub value: RegisterValue,
}

/// Values of one table index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexValues {
    pub index: u32,
    pub values: Vec<PipeValue>,
}

/// Hardware rows keyed by `(pipe, stage index, row)`.
pub(crate) type RowMap = FxHashMap<(u8, usize, u32), Row>;

impl StatefulTable {
    /// Whether a query must go to hardware.
    pub(crate) fn from_hardware<T: Transport>(&self, io: &DeviceIo<'_, T>, from: ReadFrom) -> bool {
        !io.is_virtual() && (from == ReadFrom::Hardware || self.skip_shadow)
    }

    /// Read distinct `(stage index, row)` pairs on every pipe of `pipes`.
    pub(crate) fn read_hw_rows<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        rows: &[(usize, u32)],
        pipes: PipeBitmap,
    ) -> Result<RowMap> {
        let mut reads = Vec::new();
        reads
            .try_reserve_exact(rows.len() * pipes.count() as usize)
            .map_err(|e| StfulError::ResourceExhausted(format!("read list: {e}")))?;
        for pipe in pipes.iter() {
            for &(stage_idx, row) in rows {
                let stage = &self.stages[stage_idx];
                let addr = stage.row_addr(row).ok_or_else(|| {
                    StfulError::unexpected(format!(
                        "row {row} beyond the RAMs of stage {}",
                        stage.stage_id
                    ))
                })?;
                reads.push(RowRead {
                    pipe,
                    stage: stage.stage_id,
                    instr: Instruction::VirtualRead {
                        log_tbl: stage.log_tbl,
                        addr,
                    },
                });
            }
        }

        let mut map = RowMap::default();
        for completion in io.read_rows(&reads)? {
            let Some(stage_idx) = self
                .stages
                .iter()
                .position(|s| s.stage_id == completion.stage && s.log_tbl == completion.log_tbl)
            else {
                return Err(StfulError::unexpected(format!(
                    "read completion for stage {} not used by table {}",
                    completion.stage, self.handle
                )));
            };
            let Some(row) = self.stages[stage_idx].row_of_addr(completion.addr) else {
                return Err(StfulError::unexpected(format!(
                    "read completion for unknown row address {:#x}",
                    completion.addr
                )));
            };
            self.store_row(stage_idx, completion.pipe, row, &completion.data);
            map.insert((completion.pipe, stage_idx, row), completion.data);
        }
        Ok(map)
    }

    fn value_from(&self, rows: &RowMap, pipe: u8, stage_idx: usize, local: u32) -> Result<RegisterValue> {
        let parts = decompose_index(self.width, local);
        rows.get(&(pipe, stage_idx, parts.row()))
            .map(|row| decode(self.width, parts.subword, row))
            .ok_or_else(|| {
                StfulError::unexpected(format!(
                    "no read data for row {} on pipe {pipe}",
                    parts.row()
                ))
            })
    }

    /// Value of one indirect entry on every pipe `target` resolves to.
    pub(crate) fn ent_query<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        index: u32,
        from: ReadFrom,
    ) -> Result<Vec<PipeValue>> {
        Ok(self
            .ent_query_range(io, target, index, 1, from)?
            .into_iter()
            .next()
            .map(|iv| iv.values)
            .unwrap_or_default())
    }

    /// Values of indices `start..start + count`.
    pub(crate) fn ent_query_range<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        start: u32,
        count: u32,
        from: ReadFrom,
    ) -> Result<Vec<IndexValues>> {
        self.check_direct(false)?;
        let pipes = self.resolve_read(target)?;
        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.num_entries_real)
            .ok_or(StfulError::IndexOutOfRange {
                handle: self.handle,
                index: start.saturating_add(count.saturating_sub(1)),
                size: self.num_entries_real,
            })?;

        let mut located = Vec::new();
        located
            .try_reserve_exact(count as usize)
            .map_err(|e| StfulError::ResourceExhausted(format!("query buffer: {e}")))?;
        for index in start..end {
            let (stage_idx, local) = self.locate(index)?;
            located.push((index, stage_idx, local));
        }

        let hw = if self.from_hardware(io, from) {
            let mut rows: Vec<(usize, u32)> = located
                .iter()
                .map(|&(_, stage_idx, local)| (stage_idx, decompose_index(self.width, local).row()))
                .collect();
            rows.dedup();
            debug!(dev = self.dev, tbl = %self.handle, start, count, rows = rows.len(), "query from hardware");
            Some(self.read_hw_rows(io, &rows, pipes)?)
        } else {
            None
        };

        located
            .into_iter()
            .map(|(index, stage_idx, local)| {
                let values = pipes
                    .iter()
                    .map(|pipe| {
                        let value = match &hw {
                            Some(rows) => self.value_from(rows, pipe, stage_idx, local)?,
                            None => self.shadow_read(stage_idx, local, pipe)?,
                        };
                        Ok(PipeValue { pipe, value })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(IndexValues { index, values })
            })
            .collect()
    }
}
