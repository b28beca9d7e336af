//! Saved table state.
//!
//! A state file is the JSON form of [`StateFile`]; files whose name ends in
//! `.zst` are zstd-compressed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use stful::sim::SimTransport;
use stful::{DevId, StfulManager, TableSnapshot};
use tracing::debug;

use crate::CliError;

const VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

/// One logged table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    pub dev: DevId,
    pub snapshot: TableSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub tables: Vec<TableState>,
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

impl StateFile {
    /// Log every table of every device in `devs`, in handle order.
    ///
    /// # Errors
    ///
    /// Returns the manager's error if a table cannot be logged.
    pub fn capture(mgr: &StfulManager<SimTransport>, devs: &[DevId]) -> Result<Self, CliError> {
        let mut tables = Vec::new();
        for &dev in devs {
            for handle in mgr.store().handles(dev) {
                tables.push(TableState {
                    dev,
                    snapshot: mgr.log_state(dev, handle)?,
                });
            }
        }
        Ok(Self {
            version: VERSION,
            tables,
        })
    }

    /// Restore every table in the file.
    ///
    /// # Errors
    ///
    /// Returns the manager's error for the first table that fails.
    pub fn restore(&self, mgr: &mut StfulManager<SimTransport>) -> Result<(), CliError> {
        for table in &self.tables {
            mgr.restore_state(table.dev, &table.snapshot)?;
        }
        Ok(())
    }

    /// Logged entries and bits over all tables.
    #[must_use]
    pub fn logged_values(&self) -> usize {
        self.tables.iter().map(|t| t.snapshot.logged_values()).sum()
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let file = File::create(path).map_err(|e| CliError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let json = serde_json::to_vec_pretty(self).map_err(|e| CliError::json(path, e))?;

        if is_compressed(path) {
            let mut encoder =
                zstd::stream::Encoder::new(&mut writer, ZSTD_LEVEL).map_err(|e| CliError::io(path, e))?;
            encoder.write_all(&json).map_err(|e| CliError::io(path, e))?;
            encoder.finish().map_err(|e| CliError::io(path, e))?;
        } else {
            writer.write_all(&json).map_err(|e| CliError::io(path, e))?;
        }
        writer.flush().map_err(|e| CliError::io(path, e))?;
        debug!(path = %path.display(), tables = self.tables.len(), "state saved");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a state file, or
    /// has an unsupported version.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let file = File::open(path).map_err(|e| CliError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut json = Vec::new();
        if is_compressed(path) {
            let mut decoder = zstd::stream::Decoder::new(reader).map_err(|e| CliError::io(path, e))?;
            decoder.read_to_end(&mut json).map_err(|e| CliError::io(path, e))?;
        } else {
            reader.read_to_end(&mut json).map_err(|e| CliError::io(path, e))?;
        }

        let state: Self = serde_json::from_slice(&json).map_err(|e| CliError::json(path, e))?;
        if state.version != VERSION {
            return Err(CliError::StateFile(format!(
                "unsupported version {} (expected {VERSION})",
                state.version
            )));
        }
        debug!(path = %path.display(), tables = state.tables.len(), "state loaded");
        Ok(state)
    }
}
