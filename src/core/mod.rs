// src/core/mod.rs

//! The central module containing the batching index, the transaction seam and
//! the polled tasks built on top of them.

pub mod batch;
pub mod errors;
pub mod fs;
pub mod identity;
pub mod metrics;
pub mod protocol;
pub mod tasks;

pub use batch::{BatchRecord, BatchRequest, RequestIndex};
pub use errors::FileSealError;
pub use identity::Identity;
pub use protocol::{Opcode, OperationKind};
