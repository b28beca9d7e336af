//! Stateful (register) table manager.
//!
//! Keeps a host shadow of every register table on a switch ASIC, turns table
//! operations into hardware instructions for a [`Transport`], and reads state
//! back for queries, syncs, FIFO dequeues and state logs.
//!
//! # Example
//!
//! ```ignore
//! use stful::{DeviceConfig, ChipFamily, DevTarget, StfulManager, TableSpec, StageSpec};
//! use stful::sim::SimTransport;
//!
//! let mut mgr = StfulManager::new(SimTransport::new());
//! mgr.add_device(DeviceConfig::new(0, ChipFamily::Tofino2, 4))?;
//! mgr.table_add(0, &TableSpec::new(handle, WidthClass::Bit32, stages))?;
//! mgr.ent_write(DevTarget::all(0), handle, 17, RegisterValue::new(5))?;
//! ```

pub use stful_codec::{RegisterValue, WidthClass};

mod config;
mod direct;
mod error;
mod fifo;
mod io;
mod manager;
pub mod metrics;
mod mode;
mod param;
mod pipe;
mod query;
mod shadow;
pub mod sim;
mod snapshot;
mod store;
mod sync;
mod table;
mod transport;
mod write;

pub use config::{
    ChipFamily, DevId, DeviceConfig, EntryHandle, FifoDirection, FifoSpec, ParamHandle, RamSpec,
    RegisterParamSpec, StageSpec, TableHandle, TableKind, TableSpec,
};
pub use direct::DirectLocation;
pub use error::{ErrorKind, Result, StfulError, TransportError};
pub use fifo::FifoCursor;
pub use manager::StfulManager;
pub use pipe::{DevTarget, MAX_PIPES, PipeBitmap, PipeTarget};
pub use query::{IndexValues, PipeValue, ReadFrom};
pub use shadow::DirectEntry;
pub use snapshot::{BitRun, EntrySnapshot, PipeSnapshot, StageSnapshot, TableSnapshot};
pub use store::TableStore;
pub use sync::SyncCallback;
pub use table::{IndirectPtr, RamUnit, StageInfo, StatefulTable, TableInstance};
pub use transport::{ReadCompletion, ReadCookie, Transport};
pub use write::{OpList, Operation};
