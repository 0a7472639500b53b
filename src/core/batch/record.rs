// src/core/batch/record.rs

use bytes::Bytes;
use std::path::{Path, PathBuf};

/// A single per-file operation inside a `BatchRequest`.
///
/// `error` is `0` while the record is pending and after it succeeded. Any other
/// value is either a local preparation failure recorded before submission, the
/// daemon's per-record outcome, or the failure of the whole sub-request the
/// record was submitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    path: PathBuf,
    payload: Option<Bytes>,
    slot: u32,
    error: i32,
    sent: bool,
}

impl BatchRecord {
    pub(crate) fn new(slot: u32, path: PathBuf, payload: Option<Bytes>) -> Self {
        Self {
            path,
            payload,
            slot,
            error: 0,
            sent: false,
        }
    }

    /// A record that failed local preparation. It is never submitted.
    pub(crate) fn failed(slot: u32, path: PathBuf, error: i32) -> Self {
        Self {
            path,
            payload: None,
            slot,
            error,
            sent: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The digest or signature bytes. For lookups this is replaced by the
    /// daemon's answer once the owning transaction completed.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn error(&self) -> i32 {
        self.error
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn is_ok(&self) -> bool {
        self.error == 0
    }

    /// Returns true if the record still has to go out in a transaction.
    pub fn is_pending(&self) -> bool {
        !self.sent && self.error == 0
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    pub(crate) fn set_error(&mut self, error: i32) {
        self.error = error;
    }

    pub(crate) fn set_payload(&mut self, payload: Option<Bytes>) {
        self.payload = payload;
    }
}
