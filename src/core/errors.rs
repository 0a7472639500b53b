// src/core/errors.rs

//! Defines the primary error type for the client engine, plus the numeric
//! detail codes attached to task outcomes.

use std::collections::TryReserveError;
use std::sync::Arc;
use thiserror::Error;

/// Detail codes reported alongside a task-level result. These are plain errno
/// values so that they compose with the codes returned by `unlink`/`rmdir`.
pub mod detail {
    /// The playground is still active, or reclaiming it made no progress.
    pub const BUSY: i32 = libc::EBUSY;
    /// The task was cancelled before it could finish.
    pub const INTERRUPTED: i32 = libc::EINTR;
    /// The channel broke while a transaction was outstanding.
    pub const COMMUNICATION: i32 = libc::ECONNABORTED;
    /// The daemon sent a reply that could not be decoded.
    pub const PROTOCOL: i32 = libc::EPROTO;
    /// Local allocation failed.
    pub const NO_MEMORY: i32 = libc::ENOMEM;
}

/// The main error enum for every local failure inside the engine.
///
/// Remote and per-record failures are not errors in this sense: they are
/// reported through task outcomes and `BatchRecord::error` respectively.
#[derive(Error, Debug)]
pub enum FileSealError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// A local allocation failed. The affected work was never queued.
    #[error("Out of memory while preparing a request")]
    OutOfMemory,

    /// The batch already holds its maximum number of records.
    #[error("Batch is full ({capacity} records)")]
    BatchFull { capacity: usize },

    /// The transaction channel could not be opened.
    #[error("Transaction channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl FileSealError {
    /// Returns true if the error means the work never left this process
    /// because local resources ran out.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, FileSealError::OutOfMemory)
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for FileSealError {
    fn clone(&self) -> Self {
        match self {
            FileSealError::Io(e) => FileSealError::Io(Arc::clone(e)),
            FileSealError::OutOfMemory => FileSealError::OutOfMemory,
            FileSealError::BatchFull { capacity } => FileSealError::BatchFull {
                capacity: *capacity,
            },
            FileSealError::ChannelUnavailable(s) => FileSealError::ChannelUnavailable(s.clone()),
            FileSealError::MalformedReply(s) => FileSealError::MalformedReply(s.clone()),
            FileSealError::InvalidRequest(s) => FileSealError::InvalidRequest(s.clone()),
            FileSealError::Internal(s) => FileSealError::Internal(s.clone()),
        }
    }
}

impl PartialEq for FileSealError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FileSealError::Io(e1), FileSealError::Io(e2)) => e1.to_string() == e2.to_string(),
            (FileSealError::BatchFull { capacity: c1 }, FileSealError::BatchFull { capacity: c2 }) => {
                c1 == c2
            }
            (FileSealError::ChannelUnavailable(s1), FileSealError::ChannelUnavailable(s2)) => {
                s1 == s2
            }
            (FileSealError::MalformedReply(s1), FileSealError::MalformedReply(s2)) => s1 == s2,
            (FileSealError::InvalidRequest(s1), FileSealError::InvalidRequest(s2)) => s1 == s2,
            (FileSealError::Internal(s1), FileSealError::Internal(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FileSealError {
    fn from(e: std::io::Error) -> Self {
        FileSealError::Io(Arc::new(e))
    }
}

impl From<TryReserveError> for FileSealError {
    fn from(_: TryReserveError) -> Self {
        FileSealError::OutOfMemory
    }
}
