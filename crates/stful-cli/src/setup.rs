//! Setup files.
//!
//! A setup file lists devices, the register tables to add to them and a
//! script of operations to run:
//!
//! ```json
//! {
//!   "devices": [{ "dev_id": 0, "family": "tofino2", "num_pipes": 2 }],
//!   "tables": [{ "dev": 0, "handle": 16, "width": "bit16", "size": 2048, "stages": [...] }],
//!   "steps": [
//!     { "op": "write", "table": 16, "index": 1025, "value": { "lo": 7 } },
//!     { "op": "query", "table": 16, "index": 1025 }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use stful::sim::SimTransport;
use stful::{
    DevId, DevTarget, DeviceConfig, DirectLocation, EntryHandle, IndexValues, ParamHandle,
    PipeBitmap, PipeTarget, PipeValue, ReadFrom, RegisterValue, StfulError, StfulManager,
    TableHandle, TableSpec,
};
use tracing::{debug, info};

use crate::CliError;

/// A table and the device it goes on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSetup {
    #[serde(default)]
    pub dev: DevId,
    #[serde(flatten)]
    pub spec: TableSpec,
}

/// Table and pipe a step operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub dev: DevId,
    pub table: TableHandle,
    #[serde(default)]
    pub pipe: PipeTarget,
}

impl Target {
    const fn dev_target(self) -> DevTarget {
        DevTarget {
            dev: self.dev,
            pipe: self.pipe,
        }
    }
}

/// One scripted operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Write {
        #[serde(flatten)]
        at: Target,
        index: u32,
        value: RegisterValue,
    },
    Reset {
        #[serde(flatten)]
        at: Target,
    },
    ResetRange {
        #[serde(flatten)]
        at: Target,
        start: u32,
        count: u32,
        /// Defaults to the table's initial value.
        #[serde(default)]
        value: Option<RegisterValue>,
    },
    Query {
        #[serde(flatten)]
        at: Target,
        index: u32,
        #[serde(default = "one")]
        count: u32,
        #[serde(default)]
        from: ReadFrom,
    },
    FifoEnqueue {
        #[serde(flatten)]
        at: Target,
        values: Vec<RegisterValue>,
    },
    FifoDequeue {
        #[serde(flatten)]
        at: Target,
        max: u32,
    },
    FifoOccupancy {
        #[serde(flatten)]
        at: Target,
    },
    FifoReset {
        #[serde(flatten)]
        at: Target,
    },
    DirectAdd {
        #[serde(flatten)]
        at: Target,
        entry: EntryHandle,
        location: DirectLocation,
    },
    DirectWrite {
        #[serde(flatten)]
        at: Target,
        entry: EntryHandle,
        location: DirectLocation,
        value: RegisterValue,
    },
    DirectMove {
        #[serde(flatten)]
        at: Target,
        entry: EntryHandle,
        to: DirectLocation,
    },
    DirectDel {
        #[serde(flatten)]
        at: Target,
        entry: EntryHandle,
    },
    DirectQuery {
        #[serde(flatten)]
        at: Target,
        entry: EntryHandle,
        #[serde(default)]
        from: ReadFrom,
    },
    Sync {
        #[serde(flatten)]
        at: Target,
    },
    DirectSync {
        #[serde(flatten)]
        at: Target,
    },
    ParamSet {
        #[serde(flatten)]
        at: Target,
        param: ParamHandle,
        #[serde(default)]
        value: i64,
        #[serde(default)]
        reset: bool,
    },
    ParamGet {
        #[serde(flatten)]
        at: Target,
        param: ParamHandle,
    },
    SetMode {
        #[serde(flatten)]
        at: Target,
        symmetric: bool,
        #[serde(default)]
        scopes: Vec<PipeBitmap>,
    },
}

const fn one() -> u32 {
    1
}

impl Step {
    /// Operation name as written in setup files.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Write { .. } => "write",
            Self::Reset { .. } => "reset",
            Self::ResetRange { .. } => "reset_range",
            Self::Query { .. } => "query",
            Self::FifoEnqueue { .. } => "fifo_enqueue",
            Self::FifoDequeue { .. } => "fifo_dequeue",
            Self::FifoOccupancy { .. } => "fifo_occupancy",
            Self::FifoReset { .. } => "fifo_reset",
            Self::DirectAdd { .. } => "direct_add",
            Self::DirectWrite { .. } => "direct_write",
            Self::DirectMove { .. } => "direct_move",
            Self::DirectDel { .. } => "direct_del",
            Self::DirectQuery { .. } => "direct_query",
            Self::Sync { .. } => "sync",
            Self::DirectSync { .. } => "direct_sync",
            Self::ParamSet { .. } => "param_set",
            Self::ParamGet { .. } => "param_get",
            Self::SetMode { .. } => "set_mode",
        }
    }

    #[must_use]
    pub const fn target(&self) -> Target {
        match self {
            Self::Write { at, .. }
            | Self::Reset { at }
            | Self::ResetRange { at, .. }
            | Self::Query { at, .. }
            | Self::FifoEnqueue { at, .. }
            | Self::FifoDequeue { at, .. }
            | Self::FifoOccupancy { at }
            | Self::FifoReset { at }
            | Self::DirectAdd { at, .. }
            | Self::DirectWrite { at, .. }
            | Self::DirectMove { at, .. }
            | Self::DirectDel { at, .. }
            | Self::DirectQuery { at, .. }
            | Self::Sync { at }
            | Self::DirectSync { at }
            | Self::ParamSet { at, .. }
            | Self::ParamGet { at, .. }
            | Self::SetMode { at, .. } => *at,
        }
    }

    /// Run the step against `mgr`.
    ///
    /// # Errors
    ///
    /// Returns the manager's error for the operation.
    pub fn execute(&self, mgr: &mut StfulManager<SimTransport>) -> Result<StepOutput, StfulError> {
        let at = self.target();
        let t = at.dev_target();
        let h = at.table;
        let out = match self {
            Self::Write { index, value, .. } => {
                mgr.ent_write(t, h, *index, *value)?;
                StepOutput::Done
            }
            Self::Reset { .. } => {
                mgr.table_reset(t, h)?;
                StepOutput::Done
            }
            Self::ResetRange {
                start, count, value, ..
            } => {
                mgr.table_reset_range(t, h, *start, *count, *value)?;
                StepOutput::Done
            }
            Self::Query {
                index, count, from, ..
            } => StepOutput::Values(mgr.ent_query_range(t, h, *index, *count, *from)?),
            Self::FifoEnqueue { values, .. } => {
                mgr.fifo_enqueue(t, h, values)?;
                StepOutput::Done
            }
            Self::FifoDequeue { max, .. } => StepOutput::Popped(mgr.fifo_dequeue(t, h, *max)?),
            Self::FifoOccupancy { .. } => StepOutput::Count(mgr.fifo_occupancy(t, h)?),
            Self::FifoReset { .. } => {
                mgr.fifo_reset(t, h)?;
                StepOutput::Done
            }
            Self::DirectAdd {
                entry, location, ..
            } => {
                mgr.direct_ent_add(t, h, *entry, *location)?;
                StepOutput::Done
            }
            Self::DirectWrite {
                entry,
                location,
                value,
                ..
            } => {
                mgr.direct_word_write(t, h, *entry, *location, *value)?;
                StepOutput::Done
            }
            Self::DirectMove { entry, to, .. } => {
                mgr.direct_ent_move(t, h, *entry, *to)?;
                StepOutput::Done
            }
            Self::DirectDel { entry, .. } => {
                mgr.direct_ent_del(t, h, *entry)?;
                StepOutput::Done
            }
            Self::DirectQuery { entry, from, .. } => {
                StepOutput::Pipes(mgr.direct_ent_query(t, h, *entry, *from)?)
            }
            Self::Sync { .. } => {
                mgr.sync(t, h, None)?;
                StepOutput::Done
            }
            Self::DirectSync { .. } => {
                mgr.direct_sync(t, h, None)?;
                StepOutput::Done
            }
            Self::ParamSet {
                param,
                value,
                reset,
                ..
            } => {
                mgr.param_set(t, h, *param, *value, *reset)?;
                StepOutput::Done
            }
            Self::ParamGet { param, .. } => StepOutput::Param(mgr.param_get(t, h, *param)?),
            Self::SetMode {
                symmetric, scopes, ..
            } => {
                mgr.set_symmetric_mode(at.dev, h, *symmetric, scopes)?;
                StepOutput::Done
            }
        };
        Ok(out)
    }
}

/// Result of one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum StepOutput {
    Done,
    Values(Vec<IndexValues>),
    Pipes(Vec<PipeValue>),
    Popped(Vec<RegisterValue>),
    Count(u32),
    Param(i64),
}

/// Contents of a setup file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub tables: Vec<TableSetup>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Setup {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| CliError::json(path, e))
    }

    /// Manager over a fresh simulated ASIC with every device and table added.
    ///
    /// # Errors
    ///
    /// Returns the first device or table the manager rejects.
    pub fn build(&self) -> Result<StfulManager<SimTransport>, CliError> {
        let sim = SimTransport::new();
        let mut mgr = StfulManager::new(sim.clone());
        for dev in &self.devices {
            mgr.add_device(*dev)?;
        }
        for table in &self.tables {
            sim.asic().load_programs(table.dev, &table.spec);
            mgr.table_add(table.dev, &table.spec)?;
        }
        info!(
            devices = self.devices.len(),
            tables = self.tables.len(),
            "setup loaded"
        );
        Ok(mgr)
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Step`] naming the failing step.
    pub fn run_steps(&self, mgr: &mut StfulManager<SimTransport>) -> Result<Vec<StepOutput>, CliError> {
        let mut outputs = Vec::with_capacity(self.steps.len());
        for (step, op) in self.steps.iter().enumerate() {
            debug!(step, op = op.name(), "running step");
            let out = op.execute(mgr).map_err(|source| CliError::Step {
                step,
                op: op.name(),
                source,
            })?;
            outputs.push(out);
        }
        Ok(outputs)
    }
}
