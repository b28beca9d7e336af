//! Symmetric / asymmetric mode changes.

use tracing::info;

use crate::io::DeviceIo;
use crate::table::normalize_scopes;
use crate::transport::Transport;
use crate::{PipeBitmap, PipeTarget, Result, StatefulTable, StfulError};

impl StatefulTable {
    /// Switch the table between one shared instance and per-scope instances.
    ///
    /// Asking for the current mode and scopes changes nothing. Otherwise the
    /// instances are rebuilt and, on hardware devices, every entry is reset
    /// to the initial value. Returns whether anything changed.
    pub(crate) fn set_symmetric_mode<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        symmetric: bool,
        scopes: &[PipeBitmap],
    ) -> Result<bool> {
        let scopes = normalize_scopes(self.pipes, symmetric, scopes)?;
        if symmetric == self.symmetric && scopes == self.scopes {
            return Ok(false);
        }
        if self.is_syncing() {
            return Err(StfulError::SyncInProgress(self.handle));
        }
        info!(
            dev = self.dev,
            tbl = %self.handle,
            symmetric,
            scopes = scopes.len(),
            "changing table mode"
        );
        self.rebuild_instances(symmetric, scopes)?;
        if !io.is_virtual() {
            self.table_reset(io, PipeTarget::All)?;
        }
        Ok(true)
    }
}
