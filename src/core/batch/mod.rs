// src/core/batch/mod.rs

//! Grouping of per-file operations into bounded batches, one per
//! (operation, identity) pair.

pub mod index;
pub mod record;
pub mod request;

pub use index::RequestIndex;
pub use record::BatchRecord;
pub use request::{BatchRequest, DEFAULT_BATCH_CAPACITY};
