// src/core/protocol/mod.rs

//! Everything the engine exchanges with the daemon: opcodes, the transaction
//! seam, and the payload layouts carried inside a transaction.

pub mod opcode;
pub mod payload;
pub mod transaction;

pub use opcode::{Opcode, OperationKind};
pub use payload::{BatchReplyEntry, InventoryEntry};
pub use transaction::{Transaction, TransactionChannel, TransactionStatus};
