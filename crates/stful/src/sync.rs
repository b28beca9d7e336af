//! Shadow sync from hardware.
//!
//! A table sync reads every used row of every stage on the targeted pipes
//! and overwrites those pipes' shadow with the result. Only one table-level
//! sync may be outstanding per table; per-entry syncs are blocking and do not
//! take part in that serialization.

use std::fmt;

use rustc_hash::FxHashMap;
use stful_codec::{Instruction, decode, decompose_index};
use tracing::debug;

use crate::io::{DeviceIo, RowRead};
use crate::query::PipeValue;
use crate::transport::{ReadCompletion, ReadCookie, Transport};
use crate::{EntryHandle, PipeBitmap, PipeTarget, Result, StatefulTable, StfulError, metrics};

/// Completion callback of an asynchronous sync.
pub type SyncCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Direct-table rows being read: `(pipe, stage index, row)` to the entries
/// living in that row.
pub(crate) type DirectRows = FxHashMap<(u8, usize, u32), Vec<EntryHandle>>;

pub(crate) struct PendingSync {
    pub(crate) cookie: ReadCookie,
    pub(crate) outstanding: usize,
    pub(crate) direct: Option<DirectRows>,
    pub(crate) callback: Option<SyncCallback>,
}

impl fmt::Debug for PendingSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSync")
            .field("cookie", &self.cookie)
            .field("outstanding", &self.outstanding)
            .field("direct", &self.direct.as_ref().map(FxHashMap::len))
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) enum SyncState {
    #[default]
    Idle,
    Syncing(PendingSync),
}

/// Outcome of starting a sync.
pub(crate) enum SyncStart {
    /// Nothing to read; the callback (if any) is handed back to be fired.
    Complete(Option<SyncCallback>),
    /// Reads were pushed under this cookie.
    Pending { cookie: ReadCookie, outstanding: usize },
}

impl StatefulTable {
    fn sync_reads(&self, pipes: PipeBitmap) -> (Vec<RowRead>, Option<DirectRows>) {
        let mut reads = Vec::new();
        if self.direct {
            let mut rows = DirectRows::default();
            for pipe in pipes.iter() {
                let Some(map) = self.hdl_to_shdw.get(usize::from(pipe)) else {
                    continue;
                };
                for (&entry, shadow) in map {
                    let row = decompose_index(self.width, shadow.index).row();
                    rows.entry((pipe, shadow.stage_idx, row))
                        .or_default()
                        .push(entry);
                }
            }
            for &(pipe, stage_idx, row) in rows.keys() {
                if let Some(read) = self.row_read(pipe, stage_idx, row) {
                    reads.push(read);
                }
            }
            return (reads, Some(rows));
        }

        for pipe in pipes.iter() {
            for (stage_idx, stage) in self.stages.iter().enumerate() {
                for row in 0..stage.rows_used(self.width) {
                    if let Some(read) = self.row_read(pipe, stage_idx, row) {
                        reads.push(read);
                    }
                }
            }
        }
        (reads, None)
    }

    fn row_read(&self, pipe: u8, stage_idx: usize, row: u32) -> Option<RowRead> {
        let stage = &self.stages[stage_idx];
        Some(RowRead {
            pipe,
            stage: stage.stage_id,
            instr: Instruction::VirtualRead {
                log_tbl: stage.log_tbl,
                addr: stage.row_addr(row)?,
            },
        })
    }

    /// Push the reads of a sync of the pipes `target` resolves to and enter
    /// the syncing state.
    pub(crate) fn begin_sync<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        direct: bool,
        target: PipeTarget,
        callback: Option<SyncCallback>,
    ) -> Result<SyncStart> {
        self.check_direct(direct)?;
        if self.is_syncing() {
            return Err(StfulError::SyncInProgress(self.handle));
        }
        let pipes = self.resolve_read(target)?;
        let kind = if direct { "direct" } else { "table" };
        if io.is_virtual() {
            debug!(dev = self.dev, tbl = %self.handle, kind, "sync on virtual device is a no-op");
            return Ok(SyncStart::Complete(callback));
        }

        let (reads, rows) = self.sync_reads(pipes);
        metrics::record_sync(kind);
        if reads.is_empty() {
            debug!(dev = self.dev, tbl = %self.handle, kind, "nothing to sync");
            return Ok(SyncStart::Complete(callback));
        }
        let cookie = io.submit_reads(&reads)?;
        let outstanding = reads.len();
        debug!(dev = self.dev, tbl = %self.handle, kind, rows = outstanding, cookie = cookie.0, "sync started");
        self.sync = SyncState::Syncing(PendingSync {
            cookie,
            outstanding,
            direct: rows,
            callback,
        });
        Ok(SyncStart::Pending {
            cookie,
            outstanding,
        })
    }

    /// Fold one completion of the outstanding sync into the shadow. Returns
    /// whether the sync is now complete.
    pub(crate) fn apply_sync_completion(&mut self, completion: &ReadCompletion) -> Result<bool> {
        if self.sync_cookie() != Some(completion.cookie) {
            return Err(StfulError::unexpected(format!(
                "read completion {} does not belong to a sync of table {}",
                completion.cookie.0, self.handle
            )));
        }
        let stage_idx = self
            .stages
            .iter()
            .position(|s| s.stage_id == completion.stage && s.log_tbl == completion.log_tbl)
            .ok_or_else(|| {
                StfulError::unexpected(format!(
                    "read completion for stage {} not used by table {}",
                    completion.stage, self.handle
                ))
            })?;
        let row = self.stages[stage_idx]
            .row_of_addr(completion.addr)
            .ok_or_else(|| {
                StfulError::unexpected(format!(
                    "read completion for unknown row address {:#x}",
                    completion.addr
                ))
            })?;

        let SyncState::Syncing(pending) = &mut self.sync else {
            return Err(StfulError::unexpected("sync state changed while applying a completion"));
        };
        pending.outstanding = pending.outstanding.saturating_sub(1);
        let done = pending.outstanding == 0;
        let entries = pending
            .direct
            .as_mut()
            .map(|rows| rows.remove(&(completion.pipe, stage_idx, row)).unwrap_or_default());

        match entries {
            Some(entries) => {
                for entry in entries {
                    let Some(shadow) = self.direct_entry(completion.pipe, entry).copied() else {
                        continue;
                    };
                    let subword = decompose_index(self.width, shadow.index).subword;
                    let value = decode(self.width, subword, &completion.data);
                    self.direct_set_value(completion.pipe, entry, value);
                }
            }
            None => self.store_row(stage_idx, completion.pipe, row, &completion.data),
        }
        Ok(done)
    }

    /// Leave the syncing state, handing back the callback.
    pub(crate) fn finish_sync(&mut self) -> Option<SyncCallback> {
        match std::mem::take(&mut self.sync) {
            SyncState::Syncing(pending) => {
                debug!(dev = self.dev, tbl = %self.handle, cookie = pending.cookie.0, "sync complete");
                pending.callback
            }
            SyncState::Idle => None,
        }
    }

    /// Cookie of the outstanding sync.
    pub(crate) const fn sync_cookie(&self) -> Option<ReadCookie> {
        match &self.sync {
            SyncState::Syncing(pending) => Some(pending.cookie),
            SyncState::Idle => None,
        }
    }

    /// Blocking refresh of one indirect entry's row on every resolved pipe.
    pub(crate) fn ent_sync<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        index: u32,
    ) -> Result<Vec<PipeValue>> {
        self.check_direct(false)?;
        let pipes = self.resolve_read(target)?;
        let (stage_idx, local) = self.locate(index)?;
        if io.is_virtual() {
            return pipes
                .iter()
                .map(|pipe| {
                    Ok(PipeValue {
                        pipe,
                        value: self.shadow_read(stage_idx, local, pipe)?,
                    })
                })
                .collect();
        }
        let parts = decompose_index(self.width, local);
        let rows = self.read_hw_rows(io, &[(stage_idx, parts.row())], pipes)?;
        pipes
            .iter()
            .map(|pipe| {
                let data = rows
                    .get(&(pipe, stage_idx, parts.row()))
                    .ok_or_else(|| StfulError::unexpected("entry sync returned no data"))?;
                Ok(PipeValue {
                    pipe,
                    value: decode(self.width, parts.subword, data),
                })
            })
            .collect()
    }

    /// Blocking refresh of one direct entry on every resolved pipe.
    pub(crate) fn direct_ent_sync<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        entry: EntryHandle,
    ) -> Result<Vec<PipeValue>> {
        self.direct_ent_query(io, target, entry, crate::ReadFrom::Hardware)
    }
}
