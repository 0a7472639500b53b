// src/core/tasks/batch_transaction.rs

//! Drives a digest batch and its key-bound signature counterpart through the
//! transaction channel, one sub-request at a time.

use super::async_task::{AsyncTask, TaskCore, TaskOutcome, TaskResult, TaskState};
use crate::core::FileSealError;
use crate::core::batch::{BatchRecord, BatchRequest};
use crate::core::errors::detail;
use crate::core::identity::Identity;
use crate::core::metrics;
use crate::core::protocol::payload::{decode_batch_reply, encode_batch_request};
use crate::core::protocol::{
    OperationKind, Transaction, TransactionChannel, TransactionStatus,
};
use bytes::Bytes;
use std::path::PathBuf;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which of the two sub-requests a record or transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RequestSide {
    Digest,
    Signature,
}

/// The phases of a `BatchTransactionTask`, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchPhase {
    Init,
    SendingDigest,
    SendingSignature,
    Done,
}

impl BatchPhase {
    fn next(self) -> BatchPhase {
        match self {
            BatchPhase::Init => BatchPhase::SendingDigest,
            BatchPhase::SendingDigest => BatchPhase::SendingSignature,
            BatchPhase::SendingSignature | BatchPhase::Done => BatchPhase::Done,
        }
    }

    fn side(self) -> Option<RequestSide> {
        match self {
            BatchPhase::SendingDigest => Some(RequestSide::Digest),
            BatchPhase::SendingSignature => Some(RequestSide::Signature),
            _ => None,
        }
    }
}

/// The one outstanding transaction and the slots it carries.
struct InFlight<T> {
    transaction: T,
    side: RequestSide,
    slots: Vec<u32>,
}

/// Submits up to two `BatchRequest`s sequentially: the plain digest request
/// first, then the signature request. At most one transaction is outstanding.
///
/// Per-record outcomes never fail the task; they are written into the
/// matching `BatchRecord`. The task fails only if a submitted transaction
/// failed as a whole, and the first such failure ends it.
pub struct BatchTransactionTask<C: TransactionChannel> {
    core: TaskCore,
    channel: C,
    phase: BatchPhase,
    digest: Option<BatchRequest>,
    signature: Option<BatchRequest>,
    in_flight: Option<InFlight<C::Transaction>>,
}

impl<C: TransactionChannel> BatchTransactionTask<C> {
    /// Builds the requests for `kind`: the digest request under `owner`, and the
    /// signature request under `key` if one is given and the kind has a
    /// key-bound form.
    pub fn new(
        channel: C,
        kind: OperationKind,
        owner: Identity,
        key: Option<Identity>,
        capacity: usize,
    ) -> Result<Self, FileSealError> {
        let digest = BatchRequest::create(kind.digest_opcode(), owner, capacity)?;
        let signature = match (key, kind.signature_opcode()) {
            (Some(key), Some(opcode)) => Some(BatchRequest::create(opcode, key, capacity)?),
            (Some(key), None) => {
                return Err(FileSealError::InvalidRequest(format!(
                    "{kind} has no signature form, cannot bind it to {key}"
                )));
            }
            (None, _) => None,
        };
        Ok(Self::with_requests(channel, Some(digest), signature))
    }

    /// Takes over requests built elsewhere, typically removed from a
    /// `RequestIndex`. At least one request is required; a signature request
    /// must carry the counterpart opcode of the digest request.
    pub fn from_requests(
        channel: C,
        digest: Option<BatchRequest>,
        signature: Option<BatchRequest>,
    ) -> Result<Self, FileSealError> {
        if let Some(request) = &digest
            && request.opcode().is_signature()
        {
            return Err(FileSealError::InvalidRequest(format!(
                "{} cannot be sent as the digest sub-request",
                request.opcode()
            )));
        }
        if let Some(request) = &signature
            && !request.opcode().is_signature()
        {
            return Err(FileSealError::InvalidRequest(format!(
                "{} cannot be sent as the signature sub-request",
                request.opcode()
            )));
        }
        match (&digest, &signature) {
            (None, None) => {
                return Err(FileSealError::InvalidRequest(
                    "a batch transaction needs at least one request".to_string(),
                ));
            }
            (Some(d), Some(s)) if d.opcode().signature_counterpart() != Some(s.opcode()) => {
                return Err(FileSealError::InvalidRequest(format!(
                    "{} does not pair with {}",
                    d.opcode(),
                    s.opcode()
                )));
            }
            _ => {}
        }
        Ok(Self::with_requests(channel, digest, signature))
    }

    fn with_requests(
        channel: C,
        digest: Option<BatchRequest>,
        signature: Option<BatchRequest>,
    ) -> Self {
        Self {
            core: TaskCore::default(),
            channel,
            phase: BatchPhase::Init,
            digest,
            signature,
            in_flight: None,
        }
    }

    /// Queues a record in the digest request.
    pub fn add(&mut self, path: impl Into<PathBuf>, payload: Option<Bytes>) -> Result<u32, FileSealError> {
        self.request_for_queueing(RequestSide::Digest)?
            .add(path, payload)
    }

    /// Queues a record in the signature request.
    pub fn add_signature(
        &mut self,
        path: impl Into<PathBuf>,
        signature: Option<Bytes>,
    ) -> Result<u32, FileSealError> {
        self.request_for_queueing(RequestSide::Signature)?
            .add(path, signature)
    }

    /// Queues a record that failed local preparation.
    pub fn add_error(
        &mut self,
        side: RequestSide,
        path: impl Into<PathBuf>,
        code: i32,
    ) -> Result<u32, FileSealError> {
        self.request_for_queueing(side)?.add_error(path, code)
    }

    fn request_for_queueing(&mut self, side: RequestSide) -> Result<&mut BatchRequest, FileSealError> {
        if self.phase != BatchPhase::Init {
            return Err(FileSealError::InvalidRequest(format!(
                "cannot queue records while {}",
                self.phase
            )));
        }
        let request = match side {
            RequestSide::Digest => self.digest.as_mut(),
            RequestSide::Signature => self.signature.as_mut(),
        };
        request.ok_or_else(|| FileSealError::InvalidRequest(format!("no {side} request configured")))
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn request(&self, side: RequestSide) -> Option<&BatchRequest> {
        match side {
            RequestSide::Digest => self.digest.as_ref(),
            RequestSide::Signature => self.signature.as_ref(),
        }
    }

    pub fn digest_request(&self) -> Option<&BatchRequest> {
        self.digest.as_ref()
    }

    pub fn signature_request(&self) -> Option<&BatchRequest> {
        self.signature.as_ref()
    }

    /// The record in `slot` of the given sub-request, to read its per-file
    /// outcome once the task is done.
    pub fn find_record(&self, side: RequestSide, slot: u32) -> Option<&BatchRecord> {
        self.request(side)?.find_record(slot)
    }

    /// Returns true if any record in either request carries an error.
    pub fn has_record_errors(&self) -> bool {
        self.digest.iter().chain(&self.signature).any(BatchRequest::has_errors)
    }

    /// Returns true while a transaction is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Hands back the requests with their per-record outcomes.
    pub fn into_requests(self) -> (Option<BatchRequest>, Option<BatchRequest>) {
        (self.digest, self.signature)
    }

    fn finish(&mut self, outcome: TaskOutcome) -> TaskState {
        self.phase = BatchPhase::Done;
        if outcome.is_success() {
            debug!("Batch transaction task finished: {}", outcome);
        } else {
            info!("Batch transaction task failed: {}", outcome);
        }
        self.core.finish(outcome)
    }

    /// Opens a transaction for the pending records of `side`, if there are any.
    /// Returns `Ok(false)` when there was nothing to send.
    fn start_transaction(&mut self, side: RequestSide) -> Result<bool, TaskOutcome> {
        let request = match side {
            RequestSide::Digest => self.digest.as_mut(),
            RequestSide::Signature => self.signature.as_mut(),
        };
        let Some(request) = request else {
            return Ok(false);
        };
        if !request.has_pending() {
            debug!("No pending {} records for {}, skipping", side, request.identity());
            return Ok(false);
        }

        let slots: Vec<u32> = request.pending_records().map(BatchRecord::slot).collect();
        let started = encode_batch_request(request.pending_records()).and_then(|payload| {
            self.channel
                .start(request.opcode(), Some(request.identity()), payload)
        });

        match started {
            Ok(transaction) => {
                let label: &'static str = request.opcode().into();
                metrics::TRANSACTIONS_STARTED_TOTAL
                    .with_label_values(&[label])
                    .inc();
                debug!(
                    "Started {} transaction for {} with {} records",
                    request.opcode(),
                    request.identity(),
                    slots.len()
                );
                request.mark_sent(&slots);
                self.in_flight = Some(InFlight {
                    transaction,
                    side,
                    slots,
                });
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "Could not start {} transaction for {}: {}",
                    request.opcode(),
                    request.identity(),
                    e
                );
                let outcome = TaskOutcome::from(&e);
                request.fail_records(&slots, outcome.detail.unwrap_or(libc::EIO));
                metrics::TRANSACTIONS_FAILED_TOTAL
                    .with_label_values(&[failure_label(outcome.result)])
                    .inc();
                Err(outcome)
            }
        }
    }

    /// Merges the result of a finished transaction into its request.
    fn complete_transaction(
        &mut self,
        in_flight: InFlight<C::Transaction>,
    ) -> Result<(), TaskOutcome> {
        let InFlight {
            transaction,
            side,
            slots,
        } = in_flight;
        let request = match side {
            RequestSide::Digest => self.digest.as_mut(),
            RequestSide::Signature => self.signature.as_mut(),
        };
        let Some(request) = request else {
            return Err(TaskOutcome::failure(TaskResult::LocalError, libc::EIO));
        };

        let failure = match transaction.status() {
            TransactionStatus::Completed => {
                match decode_batch_reply(transaction.reply_payload()) {
                    Ok(entries) => {
                        debug!(
                            "{} transaction for {} completed with {} reply entries",
                            request.opcode(),
                            request.identity(),
                            entries.len()
                        );
                        request.apply_reply(&slots, entries);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(
                            "Undecodable reply to {} for {}: {}",
                            request.opcode(),
                            request.identity(),
                            e
                        );
                        TaskOutcome::failure(TaskResult::RemoteError, detail::PROTOCOL)
                    }
                }
            }
            TransactionStatus::Rejected(code) => {
                warn!(
                    "Daemon rejected {} for {}: code {}",
                    request.opcode(),
                    request.identity(),
                    code
                );
                TaskOutcome::failure(TaskResult::RemoteError, code)
            }
            TransactionStatus::Broken | TransactionStatus::Pending => {
                warn!(
                    "Channel broke during {} for {}",
                    request.opcode(),
                    request.identity()
                );
                TaskOutcome::failure(TaskResult::CommunicationError, detail::COMMUNICATION)
            }
        };

        request.fail_records(&slots, failure.detail.unwrap_or(libc::EIO));
        metrics::TRANSACTIONS_FAILED_TOTAL
            .with_label_values(&[failure_label(failure.result)])
            .inc();
        Err(failure)
    }
}

fn failure_label(result: TaskResult) -> &'static str {
    match result {
        TaskResult::Success => "none",
        TaskResult::OutOfMemory => "out_of_memory",
        TaskResult::CommunicationError => "communication",
        TaskResult::LocalError => "local",
        TaskResult::RemoteError => "remote",
    }
}

impl<C: TransactionChannel> AsyncTask for BatchTransactionTask<C> {
    fn poll(&mut self, cancel: &CancellationToken) -> TaskState {
        if self.core.state().is_done() {
            return self.core.state();
        }
        self.core.start();

        loop {
            // Drain the outstanding transaction before anything else, even when
            // cancellation was requested.
            if let Some(in_flight) = &self.in_flight {
                if !in_flight.transaction.is_done() {
                    return self.core.state();
                }
                if let Some(in_flight) = self.in_flight.take()
                    && let Err(outcome) = self.complete_transaction(in_flight)
                {
                    return self.finish(outcome);
                }
                self.phase = self.phase.next();
                continue;
            }

            // Phase boundary.
            if cancel.is_cancelled() {
                info!("Batch transaction task cancelled during {}", self.phase);
                return self.finish(TaskOutcome::interrupted());
            }

            match self.phase {
                BatchPhase::Init => {
                    self.phase = self.phase.next();
                }
                BatchPhase::SendingDigest | BatchPhase::SendingSignature => {
                    let Some(side) = self.phase.side() else {
                        return self.finish(TaskOutcome::failure(TaskResult::LocalError, libc::EIO));
                    };
                    match self.start_transaction(side) {
                        // Loop around to check whether it completed immediately.
                        Ok(true) => {}
                        Ok(false) => self.phase = self.phase.next(),
                        Err(outcome) => return self.finish(outcome),
                    }
                }
                BatchPhase::Done => return self.finish(TaskOutcome::success()),
            }
        }
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn reset(&mut self) {
        if self.in_flight.is_some() {
            warn!("Ignoring reset of a batch transaction task with a transaction in flight");
            return;
        }
        self.core.reset();
        self.phase = BatchPhase::Init;
    }
}
