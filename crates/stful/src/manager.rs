//! Public entry point.
//!
//! [`StfulManager`] owns the registered devices, their tables and the
//! transport. Every operation looks the table up by `(device, handle)`,
//! borrows a [`DeviceIo`] for the device and runs to completion, except
//! asynchronous syncs, which finish in [`StfulManager::service_reads`].

use stful_codec::RegisterValue;
use tracing::{info, warn};

use crate::io::{DeviceIo, ReadTracker};
use crate::query::{IndexValues, PipeValue, ReadFrom};
use crate::snapshot::TableSnapshot;
use crate::store::TableStore;
use crate::sync::{SyncCallback, SyncStart};
use crate::table::IndirectPtr;
use crate::transport::Transport;
use crate::write::OpList;
use crate::{
    DevId, DevTarget, DeviceConfig, DirectLocation, EntryHandle, ParamHandle, PipeBitmap,
    PipeTarget, Result, StatefulTable, StfulError, TableHandle, TableSpec,
};

/// Stateful table manager.
#[derive(Debug)]
pub struct StfulManager<T: Transport> {
    transport: T,
    store: TableStore,
    reads: ReadTracker,
}

impl<T: Transport> StfulManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            store: TableStore::new(),
            reads: ReadTracker::default(),
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub const fn store(&self) -> &TableStore {
        &self.store
    }

    fn table_io(&mut self, dev: DevId, handle: TableHandle) -> Result<(&mut StatefulTable, DeviceIo<'_, T>)> {
        let config = self.store.device(dev)?;
        let table = self.store.get_mut(dev, handle)?;
        Ok((
            table,
            DeviceIo {
                transport: &mut self.transport,
                dev: config,
                reads: &mut self.reads,
            },
        ))
    }

    // ------------------------------------------------------------------
    // Devices and tables
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails if the device is already registered or malformed.
    pub fn add_device(&mut self, config: DeviceConfig) -> Result<()> {
        self.store.add_device(config)?;
        info!(
            dev = config.dev_id,
            family = ?config.family,
            pipes = config.num_pipes,
            virtual_device = config.virtual_device,
            "device added"
        );
        Ok(())
    }

    /// Delete every table of `dev` and forget the device.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDevice` if the device is not registered.
    pub fn remove_device(&mut self, dev: DevId) -> Result<()> {
        self.store.device(dev)?;
        for handle in self.store.handles(dev) {
            self.table_del(dev, handle)?;
        }
        self.reads.take_stashed(dev);
        self.store.remove_device(dev);
        info!(dev, "device removed");
        Ok(())
    }

    /// Add a table and seed its shadow and hardware with the initial value.
    ///
    /// # Errors
    ///
    /// Fails if the handle is taken or `spec` does not fit the device.
    /// Seeding failures from the transport are returned as well.
    pub fn table_add(&mut self, dev: DevId, spec: &TableSpec) -> Result<()> {
        let config = self.store.device(dev)?;
        if self.store.contains(dev, spec.handle) {
            return Err(StfulError::TableExists {
                dev,
                handle: spec.handle,
            });
        }
        let mut table = StatefulTable::from_spec(spec, &config)?;
        let mut io = DeviceIo {
            transport: &mut self.transport,
            dev: config,
            reads: &mut self.reads,
        };
        table.seed(&mut io)?;
        let params: Vec<ParamHandle> = table.params.iter().map(|p| p.handle).collect();
        for param in params {
            table.param_set(&mut io, PipeTarget::All, param, 0, true)?;
        }
        info!(
            dev,
            tbl = %spec.handle,
            name = %spec.name,
            width = %spec.width,
            direct = spec.direct,
            stages = spec.stages.len(),
            entries = table.num_entries(),
            "table added"
        );
        self.store.insert(table)
    }

    /// Delete a table. An outstanding asynchronous sync is completed with
    /// `TableNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if there is no such table.
    pub fn table_del(&mut self, dev: DevId, handle: TableHandle) -> Result<()> {
        let mut table = self.store.remove(dev, handle)?;
        if let Some(cookie) = table.sync_cookie() {
            self.reads.pending.remove(&cookie);
            warn!(dev, tbl = %handle, cookie = cookie.0, "table deleted with a sync outstanding");
        }
        if let Some(callback) = table.finish_sync() {
            callback(Err(StfulError::TableNotFound { dev, handle }));
        }
        info!(dev, tbl = %handle, "table deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `TableNotFound` if there is no such table.
    pub fn table(&self, dev: DevId, handle: TableHandle) -> Result<&StatefulTable> {
        self.store.get(dev, handle)
    }

    /// Switch between symmetric and asymmetric mode.
    ///
    /// # Errors
    ///
    /// Fails on invalid scopes, while a sync is outstanding, or if the reset
    /// that follows a change cannot be enqueued.
    pub fn set_symmetric_mode(
        &mut self,
        dev: DevId,
        handle: TableHandle,
        symmetric: bool,
        scopes: &[PipeBitmap],
    ) -> Result<()> {
        let (table, mut io) = self.table_io(dev, handle)?;
        table.set_symmetric_mode(&mut io, symmetric, scopes)?;
        Ok(())
    }

    /// Current mode and scopes.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if there is no such table.
    pub fn symmetric_mode(&self, dev: DevId, handle: TableHandle) -> Result<(bool, Vec<PipeBitmap>)> {
        let table = self.store.get(dev, handle)?;
        Ok((table.is_symmetric(), table.scopes().to_vec()))
    }

    /// Stop (or resume) updating the shadow of a table; queries then go to
    /// hardware.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if there is no such table.
    pub fn set_skip_shadow(&mut self, dev: DevId, handle: TableHandle, skip: bool) -> Result<()> {
        self.store.get_mut(dev, handle)?.skip_shadow = skip;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails for direct tables, out-of-range indices or invalid instructions.
    pub fn indirect_ptr(&self, dev: DevId, handle: TableHandle, index: u32, instr: u8) -> Result<IndirectPtr> {
        self.store.get(dev, handle)?.indirect_ptr(index, instr)
    }

    // ------------------------------------------------------------------
    // Writes and resets
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails on an invalid target or index, or if the write cannot be
    /// enqueued.
    pub fn ent_write(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        index: u32,
        value: RegisterValue,
    ) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.ent_write(&mut io, target.pipe, index, value)
    }

    /// # Errors
    ///
    /// Fails on an invalid target or location, or if the write cannot be
    /// enqueued.
    pub fn direct_word_write(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        entry: EntryHandle,
        location: DirectLocation,
        value: RegisterValue,
    ) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.direct_word_write(&mut io, target.pipe, entry, location, value)
    }

    /// Reset every entry to the initial value.
    ///
    /// # Errors
    ///
    /// Fails on an invalid target or if the writes cannot be enqueued.
    pub fn table_reset(&mut self, target: DevTarget, handle: TableHandle) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.table_reset(&mut io, target.pipe)
    }

    /// Reset indices `start..start + count` to `value`, or to the table's
    /// initial value when `value` is `None`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid target or range, or if the writes cannot be
    /// enqueued.
    pub fn table_reset_range(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        start: u32,
        count: u32,
        value: Option<RegisterValue>,
    ) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.table_reset_range(&mut io, target.pipe, start, count, value)
    }

    /// Apply a deferred operation list in order.
    ///
    /// # Errors
    ///
    /// Returns the first failing operation's error; earlier operations stay
    /// applied.
    pub fn process_ops(&mut self, dev: DevId, handle: TableHandle, ops: &OpList) -> Result<()> {
        let (table, mut io) = self.table_io(dev, handle)?;
        table.process_ops(&mut io, ops)
    }

    // ------------------------------------------------------------------
    // Direct entries
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails on an invalid target or location.
    pub fn direct_ent_add(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        entry: EntryHandle,
        location: DirectLocation,
    ) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.direct_ent_add(&mut io, target.pipe, entry, location)
    }

    /// # Errors
    ///
    /// Returns `EntryNotFound` if the entry has no state.
    pub fn direct_ent_del(&mut self, target: DevTarget, handle: TableHandle, entry: EntryHandle) -> Result<()> {
        let (table, _) = self.table_io(target.dev, handle)?;
        table.direct_ent_del(target.pipe, entry)
    }

    /// # Errors
    ///
    /// Fails if the entry has no state or the new location is invalid.
    pub fn direct_ent_move(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        entry: EntryHandle,
        to: DirectLocation,
    ) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.direct_ent_move(&mut io, target.pipe, entry, to)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails on an invalid target or index, or if a hardware read fails.
    pub fn ent_query(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        index: u32,
        from: ReadFrom,
    ) -> Result<Vec<PipeValue>> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.ent_query(&mut io, target.pipe, index, from)
    }

    /// # Errors
    ///
    /// Fails on an invalid target or range, or if a hardware read fails.
    pub fn ent_query_range(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        start: u32,
        count: u32,
        from: ReadFrom,
    ) -> Result<Vec<IndexValues>> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.ent_query_range(&mut io, target.pipe, start, count, from)
    }

    /// # Errors
    ///
    /// Fails if the entry has no state or a hardware read fails.
    pub fn direct_ent_query(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        entry: EntryHandle,
        from: ReadFrom,
    ) -> Result<Vec<PipeValue>> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.direct_ent_query(&mut io, target.pipe, entry, from)
    }

    // ------------------------------------------------------------------
    // FIFO
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails if the table is not a CPU-pushed FIFO or lacks room.
    pub fn fifo_enqueue(&mut self, target: DevTarget, handle: TableHandle, values: &[RegisterValue]) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.fifo_enqueue(&mut io, target.pipe, values)
    }

    /// # Errors
    ///
    /// Fails if the table is not a CPU-popped FIFO or the read fails.
    pub fn fifo_dequeue(&mut self, target: DevTarget, handle: TableHandle, max: u32) -> Result<Vec<RegisterValue>> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.fifo_dequeue(&mut io, target.pipe, max)
    }

    /// # Errors
    ///
    /// Fails if the table is not a FIFO or the counter cannot be read.
    pub fn fifo_occupancy(&mut self, target: DevTarget, handle: TableHandle) -> Result<u32> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.fifo_occupancy(&mut io, target.pipe)
    }

    /// # Errors
    ///
    /// Fails if the table is not a FIFO.
    pub fn fifo_reset(&mut self, target: DevTarget, handle: TableHandle) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.fifo_reset(&mut io, target.pipe)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    fn start_sync(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        direct: bool,
        callback: Option<SyncCallback>,
    ) -> Result<()> {
        let blocking = callback.is_none();
        let dev = target.dev;
        let (table, mut io) = self.table_io(dev, handle)?;
        match table.begin_sync(&mut io, direct, target.pipe, callback)? {
            SyncStart::Complete(callback) => {
                if let Some(callback) = callback {
                    callback(Ok(()));
                }
                Ok(())
            }
            SyncStart::Pending {
                cookie,
                outstanding,
            } if blocking => {
                let result = io.wait_for(cookie, outstanding).and_then(|completions| {
                    for completion in &completions {
                        table.apply_sync_completion(completion)?;
                    }
                    Ok(())
                });
                table.finish_sync();
                result
            }
            SyncStart::Pending { cookie, .. } => {
                io.reads.pending.insert(cookie, (dev, handle));
                Ok(())
            }
        }
    }

    /// Refresh the shadow of an indirect table from hardware on the pipes
    /// `target` names: every pipe, one pipe of a symmetric table, or the
    /// pipes of one scope. Without a callback the call blocks; with one it
    /// returns once the reads are pushed and the callback runs from
    /// [`Self::service_reads`]. When there is nothing to read the callback
    /// runs before this returns.
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` if a sync of the table is outstanding, or
    /// `InvalidArgument` if `target` names a pipe the table does not use.
    pub fn sync(&mut self, target: DevTarget, handle: TableHandle, callback: Option<SyncCallback>) -> Result<()> {
        self.start_sync(target, handle, false, callback)
    }

    /// [`Self::sync`] for direct tables.
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` if a sync of the table is outstanding.
    pub fn direct_sync(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        callback: Option<SyncCallback>,
    ) -> Result<()> {
        self.start_sync(target, handle, true, callback)
    }

    /// Blocking refresh of one indirect entry.
    ///
    /// # Errors
    ///
    /// Fails on an invalid target or index, or if the read fails.
    pub fn ent_sync(&mut self, target: DevTarget, handle: TableHandle, index: u32) -> Result<Vec<PipeValue>> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.ent_sync(&mut io, target.pipe, index)
    }

    /// Blocking refresh of one direct entry.
    ///
    /// # Errors
    ///
    /// Fails if the entry has no state or the read fails.
    pub fn direct_ent_sync(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        entry: EntryHandle,
    ) -> Result<Vec<PipeValue>> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.direct_ent_sync(&mut io, target.pipe, entry)
    }

    /// Drain read completions of `dev` into outstanding syncs and run the
    /// callbacks of those that finished. Returns how many finished.
    ///
    /// # Errors
    ///
    /// Fails if the device is unknown or the transport fails.
    pub fn service_reads(&mut self, dev: DevId) -> Result<usize> {
        self.store.device(dev)?;
        let mut completions = self.reads.take_stashed(dev);
        if self.reads.pending.values().any(|&(d, _)| d == dev) {
            completions.extend(self.transport.complete_all_reads(dev)?);
        }

        let mut finished = Vec::new();
        for completion in completions {
            let Some(&(owner, handle)) = self.reads.pending.get(&completion.cookie) else {
                warn!(dev, cookie = completion.cookie.0, "dropping read completion with no owner");
                continue;
            };
            let Ok(table) = self.store.get_mut(owner, handle) else {
                self.reads.pending.remove(&completion.cookie);
                continue;
            };
            match table.apply_sync_completion(&completion) {
                Ok(false) => {}
                Ok(true) => {
                    self.reads.pending.remove(&completion.cookie);
                    finished.push((table.finish_sync(), Ok(())));
                }
                Err(err) => {
                    warn!(dev, tbl = %handle, error = %err, "sync failed");
                    self.reads.pending.remove(&completion.cookie);
                    finished.push((table.finish_sync(), Err(err)));
                }
            }
        }

        let count = finished.len();
        for (callback, result) in finished {
            if let Some(callback) = callback {
                callback(result);
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Log / restore
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns `TableNotFound` if there is no such table.
    pub fn log_state(&self, dev: DevId, handle: TableHandle) -> Result<TableSnapshot> {
        self.store.get(dev, handle)?.log_state()
    }

    /// # Errors
    ///
    /// Fails if the snapshot does not match the table or the writes cannot be
    /// enqueued.
    pub fn restore_state(&mut self, dev: DevId, snapshot: &TableSnapshot) -> Result<()> {
        let (table, mut io) = self.table_io(dev, snapshot.handle)?;
        table.restore_state(&mut io, snapshot)
    }

    // ------------------------------------------------------------------
    // Register parameters
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails for unknown parameters, one-bit tables or out-of-range values.
    pub fn param_set(
        &mut self,
        target: DevTarget,
        handle: TableHandle,
        param: ParamHandle,
        value: i64,
        reset: bool,
    ) -> Result<()> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.param_set(&mut io, target.pipe, param, value, reset)
    }

    /// # Errors
    ///
    /// Fails for unknown parameters or when pipes disagree.
    pub fn param_get(&mut self, target: DevTarget, handle: TableHandle, param: ParamHandle) -> Result<i64> {
        let (table, mut io) = self.table_io(target.dev, handle)?;
        table.param_get(&mut io, target.pipe, param)
    }
}
