// src/core/batch/index.rs

use super::request::{BatchRequest, DEFAULT_BATCH_CAPACITY};
use crate::config::BatchConfig;
use crate::core::FileSealError;
use crate::core::identity::{Identity, IdentityHashFn, default_identity_hash};
use crate::core::protocol::Opcode;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// An ordered, collision-safe index of `BatchRequest`s keyed by
/// (hash(identity), identity).
///
/// Requests are placed in a bucket by the derived hash of their identity and
/// matched inside the bucket by exact (opcode, identity) equality, so two
/// identities whose hashes collide never share a request. Iteration visits
/// buckets in hash order and requests within a bucket in creation order.
///
/// The index is not synchronized; shared use needs external locking.
#[derive(Debug)]
pub struct RequestIndex {
    buckets: BTreeMap<u32, Vec<BatchRequest>>,
    hasher: IdentityHashFn,
    capacity: usize,
    len: usize,
}

impl Default for RequestIndex {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CAPACITY)
    }
}

impl RequestIndex {
    /// Creates an index whose requests hold at most `capacity` records each.
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, default_identity_hash)
    }

    /// Creates an index using a custom identity hash. The function is fixed
    /// for the lifetime of the index.
    pub fn with_hasher(capacity: usize, hasher: IdentityHashFn) -> Self {
        Self {
            buckets: BTreeMap::new(),
            hasher,
            capacity,
            len: 0,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.capacity)
    }

    /// The per-request record capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn find(&self, opcode: Opcode, identity: &Identity) -> Option<&BatchRequest> {
        self.buckets
            .get(&(self.hasher)(identity))?
            .iter()
            .find(|request| request.matches(opcode, identity))
    }

    pub fn find_mut(&mut self, opcode: Opcode, identity: &Identity) -> Option<&mut BatchRequest> {
        let hash = (self.hasher)(identity);
        self.buckets
            .get_mut(&hash)?
            .iter_mut()
            .find(|request| request.matches(opcode, identity))
    }

    /// Returns the request for (opcode, identity), creating it if needed.
    pub fn find_or_create(
        &mut self,
        opcode: Opcode,
        identity: Identity,
    ) -> Result<&mut BatchRequest, FileSealError> {
        let hash = (self.hasher)(&identity);
        let existing = self.buckets.get(&hash).and_then(|bucket| {
            bucket
                .iter()
                .position(|request| request.matches(opcode, &identity))
        });

        let pos = match existing {
            Some(pos) => pos,
            None => self.insert(hash, BatchRequest::create(opcode, identity, self.capacity)?)?,
        };
        self.buckets
            .get_mut(&hash)
            .and_then(|bucket| bucket.get_mut(pos))
            .ok_or_else(|| FileSealError::Internal(format!("bucket {hash:#010x} vanished")))
    }

    /// Places a freshly created request in its bucket and returns its position.
    fn insert(&mut self, hash: u32, request: BatchRequest) -> Result<usize, FileSealError> {
        let bucket = self.buckets.entry(hash).or_default();
        if let Some(other) = bucket.iter().find(|r| r.identity() != request.identity()) {
            debug!(
                "Identity hash collision on {:#010x}: {} and {}",
                hash,
                other.identity(),
                request.identity()
            );
        }
        bucket.try_reserve(1)?;
        debug!(
            "Created {} batch for {} (hash {:#010x})",
            request.opcode(),
            request.identity(),
            hash
        );
        bucket.push(request);
        self.len += 1;
        Ok(bucket.len() - 1)
    }

    /// Queues a record under (opcode, identity) and returns its slot.
    pub fn add(
        &mut self,
        opcode: Opcode,
        identity: Identity,
        path: impl Into<PathBuf>,
        payload: Option<Bytes>,
    ) -> Result<u32, FileSealError> {
        self.find_or_create(opcode, identity)?.add(path, payload)
    }

    /// Queues a pre-failed record under (opcode, identity) and returns its slot.
    pub fn add_error(
        &mut self,
        opcode: Opcode,
        identity: Identity,
        path: impl Into<PathBuf>,
        code: i32,
    ) -> Result<u32, FileSealError> {
        self.find_or_create(opcode, identity)?.add_error(path, code)
    }

    /// Removes and returns the request for (opcode, identity).
    pub fn remove(&mut self, opcode: Opcode, identity: &Identity) -> Option<BatchRequest> {
        let hash = (self.hasher)(identity);
        let bucket = self.buckets.get_mut(&hash)?;
        let pos = bucket
            .iter()
            .position(|request| request.matches(opcode, identity))?;
        let request = bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        Some(request)
    }

    /// Iterates over all requests in index order.
    pub fn iter(&self) -> impl Iterator<Item = &BatchRequest> {
        self.buckets.values().flatten()
    }

    /// Removes and returns all requests in index order.
    pub fn drain(&mut self) -> impl Iterator<Item = BatchRequest> + use<> {
        self.len = 0;
        std::mem::take(&mut self.buckets).into_values().flatten()
    }

    /// Destroys every request held by the index.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
