// src/core/protocol/opcode.rs

//! Operation codes understood by the daemon, abstracted from the wire format.

use strum_macros::{Display, EnumIter, IntoStaticStr};

/// One operation code per kind of exchange. Every `BatchRequest` carries exactly
/// one of the batch opcodes; the playground opcodes are only used by queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    GetDigest,
    AddDigest,
    DeleteDigest,
    GetSignature,
    AddSignature,
    DeleteSignature,
    ListDigests,
    PlaygroundActivity,
    PlaygroundFiles,
}

impl Opcode {
    /// The numeric code sent on the wire.
    pub fn code(self) -> u16 {
        match self {
            Opcode::GetDigest => 1,
            Opcode::AddDigest => 2,
            Opcode::DeleteDigest => 3,
            Opcode::GetSignature => 4,
            Opcode::AddSignature => 5,
            Opcode::DeleteSignature => 6,
            Opcode::ListDigests => 7,
            Opcode::PlaygroundActivity => 32,
            Opcode::PlaygroundFiles => 33,
        }
    }

    /// Returns true if the opcode carries a batch of per-file records.
    pub fn is_batch(self) -> bool {
        !matches!(self, Opcode::PlaygroundActivity | Opcode::PlaygroundFiles)
    }

    /// Returns true for the key-bound signature forms.
    pub fn is_signature(self) -> bool {
        matches!(
            self,
            Opcode::GetSignature | Opcode::AddSignature | Opcode::DeleteSignature
        )
    }

    /// Returns true if a successful reply carries data back for each record.
    pub fn returns_payload(self) -> bool {
        matches!(
            self,
            Opcode::GetDigest | Opcode::GetSignature | Opcode::ListDigests
        )
    }

    /// The key-bound signature form paired with a plain digest opcode.
    pub fn signature_counterpart(self) -> Option<Opcode> {
        match self {
            Opcode::GetDigest => Some(Opcode::GetSignature),
            Opcode::AddDigest => Some(Opcode::AddSignature),
            Opcode::DeleteDigest => Some(Opcode::DeleteSignature),
            _ => None,
        }
    }
}

/// The kind of per-file work a caller wants done, independent of whether it
/// is carried out under a uid, a key, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Get,
    Add,
    Delete,
    List,
}

impl OperationKind {
    pub fn digest_opcode(self) -> Opcode {
        match self {
            OperationKind::Get => Opcode::GetDigest,
            OperationKind::Add => Opcode::AddDigest,
            OperationKind::Delete => Opcode::DeleteDigest,
            OperationKind::List => Opcode::ListDigests,
        }
    }

    /// `None` for kinds that have no key-bound form.
    pub fn signature_opcode(self) -> Option<Opcode> {
        self.digest_opcode().signature_counterpart()
    }
}
