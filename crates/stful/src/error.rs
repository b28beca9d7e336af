use thiserror::Error;

use crate::{DevId, EntryHandle, ParamHandle, TableHandle};

/// Failures reported by the transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("device {0} is not attached")]
    NoDevice(DevId),
    #[error("instruction rejected: {0}")]
    Rejected(String),
    #[error("register {addr:#x} on pipe {pipe} is not readable")]
    RegisterRead { pipe: u8, addr: u32 },
    #[error("transport failure: {0}")]
    Io(String),
}

/// Status class of a [`StfulError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    ObjectNotFound,
    ResourceExhausted,
    AlreadyInProgress,
    HardwareCommFailure,
    Unexpected,
}

/// Stateful table manager errors.
#[derive(Error, Debug)]
pub enum StfulError {
    #[error("device {0} is not registered")]
    UnknownDevice(DevId),
    #[error("table {handle} not found on device {dev}")]
    TableNotFound { dev: DevId, handle: TableHandle },
    #[error("table {handle} already exists on device {dev}")]
    TableExists { dev: DevId, handle: TableHandle },
    #[error("stage {stage} is not used by table {handle}")]
    StageNotFound { handle: TableHandle, stage: u8 },
    #[error("entry {entry} has no stateful location in table {handle}")]
    EntryNotFound {
        handle: TableHandle,
        entry: EntryHandle,
    },
    #[error("register parameter {param} not found in table {handle}")]
    ParamNotFound {
        handle: TableHandle,
        param: ParamHandle,
    },
    #[error("index {index} out of range for table {handle} ({size} entries)")]
    IndexOutOfRange {
        handle: TableHandle,
        index: u32,
        size: u32,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("fifo on table {handle} has room for {free} entries, {requested} requested")]
    FifoFull {
        handle: TableHandle,
        free: u32,
        requested: u32,
    },
    #[error("out of resources: {0}")]
    ResourceExhausted(String),
    #[error("a sync of table {0} is already in progress")]
    SyncInProgress(TableHandle),
    #[error("malformed snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("hardware access failed: {0}")]
    Transport(#[from] TransportError),
    #[error("internal inconsistency: {0}")]
    Unexpected(String),
}

impl StfulError {
    /// Status class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDevice(_)
            | Self::IndexOutOfRange { .. }
            | Self::InvalidArgument(_)
            | Self::Snapshot(_)
            | Self::TableExists { .. } => ErrorKind::InvalidArgument,
            Self::TableNotFound { .. }
            | Self::StageNotFound { .. }
            | Self::EntryNotFound { .. }
            | Self::ParamNotFound { .. } => ErrorKind::ObjectNotFound,
            Self::FifoFull { .. } | Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::SyncInProgress(_) => ErrorKind::AlreadyInProgress,
            Self::Transport(_) => ErrorKind::HardwareCommFailure,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Invariant violation: asserts in debug builds, reported in release.
    pub(crate) fn unexpected(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        debug_assert!(false, "{msg}");
        Self::Unexpected(msg)
    }
}

pub type Result<T> = std::result::Result<T, StfulError>;
