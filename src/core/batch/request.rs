// src/core/batch/request.rs

use super::record::BatchRecord;
use crate::core::FileSealError;
use crate::core::identity::Identity;
use crate::core::metrics;
use crate::core::protocol::payload::{MAX_PATH_LEN, MAX_PAYLOAD_LEN};
use crate::core::protocol::{BatchReplyEntry, Opcode};
use std::os::unix::ffi::OsStrExt;
use bytes::Bytes;
use std::path::PathBuf;
use tracing::{debug, warn};

/// The default maximum number of records in one `BatchRequest`.
pub const DEFAULT_BATCH_CAPACITY: usize = 1000;

// Storage reserved at creation; larger requests grow as records arrive.
const INITIAL_RESERVATION: usize = DEFAULT_BATCH_CAPACITY;

/// A set of per-file operations of one kind, owned by one identity, submitted
/// together in a single transaction.
///
/// Records are only ever appended. A record's slot is assigned at insertion
/// and is never reused for the lifetime of the request.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    opcode: Opcode,
    identity: Identity,
    records: Vec<BatchRecord>,
    capacity: usize,
    next_slot: u32,
}

impl BatchRequest {
    /// Creates an empty request. Storage for up to `DEFAULT_BATCH_CAPACITY`
    /// records is reserved up front; beyond that the request grows fallibly, so
    /// running out of memory surfaces as `OutOfMemory` rather than an abort.
    pub fn create(
        opcode: Opcode,
        identity: Identity,
        capacity: usize,
    ) -> Result<Self, FileSealError> {
        if !opcode.is_batch() {
            return Err(FileSealError::InvalidRequest(format!(
                "{opcode} does not carry per-file records"
            )));
        }
        if capacity == 0 {
            return Err(FileSealError::InvalidRequest(
                "batch capacity cannot be 0".to_string(),
            ));
        }
        if opcode.is_signature() && !identity.is_key() {
            return Err(FileSealError::InvalidRequest(format!(
                "{opcode} requires a key identity, got {identity}"
            )));
        }
        let mut records = Vec::new();
        records.try_reserve_exact(capacity.min(INITIAL_RESERVATION))?;
        Ok(Self {
            opcode,
            identity,
            records,
            capacity,
            next_slot: 0,
        })
    }

    /// Appends a record and returns its slot.
    ///
    /// Fails with `BatchFull` once `capacity` records are held; the caller must
    /// start another request for the overflow. A path or payload too large to
    /// encode fails with `InvalidRequest`, leaving the caller free to queue the
    /// file through `add_error` instead.
    pub fn add(
        &mut self,
        path: impl Into<PathBuf>,
        payload: Option<Bytes>,
    ) -> Result<u32, FileSealError> {
        let path = path.into();
        let path_len = path.as_os_str().as_bytes().len();
        if path_len == 0 {
            return Err(FileSealError::InvalidRequest("empty path".to_string()));
        }
        if path_len > MAX_PATH_LEN {
            return Err(FileSealError::InvalidRequest(format!(
                "path length {path_len} exceeds {MAX_PATH_LEN}"
            )));
        }
        if let Some(payload) = &payload
            && payload.len() > MAX_PAYLOAD_LEN
        {
            return Err(FileSealError::InvalidRequest(format!(
                "payload length {} for {:?} exceeds {MAX_PAYLOAD_LEN}",
                payload.len(),
                path
            )));
        }
        if matches!(self.opcode, Opcode::AddDigest | Opcode::AddSignature) && payload.is_none() {
            return Err(FileSealError::InvalidRequest(format!(
                "{} for {:?} needs a payload",
                self.opcode, path
            )));
        }
        let slot = self.reserve_slot()?;
        self.records.push(BatchRecord::new(slot, path, payload));
        Ok(slot)
    }

    /// Appends a record that already failed local preparation, so that the rest
    /// of the batch can still be submitted. Returns its slot.
    pub fn add_error(&mut self, path: impl Into<PathBuf>, code: i32) -> Result<u32, FileSealError> {
        if code == 0 {
            return Err(FileSealError::InvalidRequest(
                "an error record needs a non-zero code".to_string(),
            ));
        }
        let path = path.into();
        let slot = self.reserve_slot()?;
        debug!(
            "Queued pre-failed record {} ({:?}) in {} batch for {}: code {}",
            slot, path, self.opcode, self.identity, code
        );
        metrics::RECORD_ERRORS_TOTAL
            .with_label_values(&["local"])
            .inc();
        self.records.push(BatchRecord::failed(slot, path, code));
        Ok(slot)
    }

    fn reserve_slot(&mut self) -> Result<u32, FileSealError> {
        if self.records.len() >= self.capacity {
            return Err(FileSealError::BatchFull {
                capacity: self.capacity,
            });
        }
        self.records.try_reserve(1)?;
        let slot = self.next_slot;
        self.next_slot = slot
            .checked_add(1)
            .ok_or_else(|| FileSealError::Internal("slot counter exhausted".to_string()))?;
        Ok(slot)
    }

    /// The record for `slot`, to read its outcome once the owning task is done.
    pub fn find_record(&self, slot: u32) -> Option<&BatchRecord> {
        // Slots are dense and records are never removed, so the slot is the position.
        self.records
            .get(slot as usize)
            .filter(|record| record.slot() == slot)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Returns true if at least one record still has to be submitted.
    pub fn has_pending(&self) -> bool {
        self.records.iter().any(BatchRecord::is_pending)
    }

    pub fn pending_records(&self) -> impl ExactSizeIterator<Item = &BatchRecord> {
        // Collected so the encoder knows the record count up front.
        self.records
            .iter()
            .filter(|record| record.is_pending())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Returns true if any record carries a non-zero code.
    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|record| !record.is_ok())
    }

    pub fn failed_records(&self) -> impl Iterator<Item = &BatchRecord> {
        self.records.iter().filter(|record| !record.is_ok())
    }

    pub(crate) fn matches(&self, opcode: Opcode, identity: &Identity) -> bool {
        self.opcode == opcode && self.identity == *identity
    }

    /// Marks the given slots as sent.
    pub(crate) fn mark_sent(&mut self, slots: &[u32]) {
        for &slot in slots {
            if let Some(record) = self.records.get_mut(slot as usize) {
                record.mark_sent();
            }
        }
        metrics::RECORDS_SUBMITTED_TOTAL.inc_by(slots.len() as f64);
    }

    /// Writes the same failure code into every record in `slots`. Used when a
    /// whole sub-request failed.
    pub(crate) fn fail_records(&mut self, slots: &[u32], code: i32) {
        for &slot in slots {
            if let Some(record) = self.records.get_mut(slot as usize) {
                record.set_error(code);
            }
        }
    }

    /// Merges the per-record outcomes of a completed transaction.
    ///
    /// Only records submitted in that transaction (`slots`) are touched; an entry
    /// naming any other slot is ignored.
    pub(crate) fn apply_reply(&mut self, slots: &[u32], entries: Vec<BatchReplyEntry>) {
        let keep_payload = self.opcode.returns_payload();
        for entry in entries {
            if slots.binary_search(&entry.slot).is_err() {
                warn!(
                    "Ignoring reply entry for unsubmitted slot {} in {} batch for {}",
                    entry.slot, self.opcode, self.identity
                );
                continue;
            }
            let Some(record) = self.records.get_mut(entry.slot as usize) else {
                continue;
            };
            record.set_error(entry.code);
            if entry.code != 0 {
                debug!(
                    "Daemon reported code {} for {:?} ({} for {})",
                    entry.code,
                    record.path(),
                    self.opcode,
                    self.identity
                );
                metrics::RECORD_ERRORS_TOTAL
                    .with_label_values(&["remote"])
                    .inc();
            } else if keep_payload {
                record.set_payload(entry.payload);
            }
        }
    }
}
