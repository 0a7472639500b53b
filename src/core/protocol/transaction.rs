// src/core/protocol/transaction.rs

//! The seam between the engine and the transport: a channel that starts
//! request/reply exchanges, and the exchanges themselves.

use super::Opcode;
use crate::core::FileSealError;
use crate::core::identity::Identity;
use bytes::Bytes;

/// The state of a single request/reply exchange with the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No reply yet.
    Pending,
    /// The daemon processed the request. Per-record outcomes, if any, are in
    /// the reply payload.
    Completed,
    /// The daemon rejected the whole exchange with the given detail code.
    Rejected(i32),
    /// The channel broke before a reply arrived.
    Broken,
}

/// One request/reply exchange. Implementations must never block.
pub trait Transaction {
    /// Returns the current status without waiting.
    fn status(&self) -> TransactionStatus;

    /// The reply body. Only meaningful once the status is `Completed`.
    fn reply_payload(&self) -> Bytes;

    fn is_done(&self) -> bool {
        self.status() != TransactionStatus::Pending
    }
}

/// A channel to the daemon on which transactions are started.
pub trait TransactionChannel {
    type Transaction: Transaction;

    /// Starts a new exchange.
    ///
    /// Fails with `FileSealError::OutOfMemory` when the transaction could not be
    /// allocated locally, and `FileSealError::ChannelUnavailable` when the channel
    /// could not be opened. Every other failure is reported through the
    /// returned transaction's status.
    fn start(
        &mut self,
        opcode: Opcode,
        identity: Option<&Identity>,
        payload: Bytes,
    ) -> Result<Self::Transaction, FileSealError>;
}
