// src/core/identity.rs

//! The owning principal under which a digest or signature is registered.

use bytes::Bytes;
use crc::{CRC_32_ISO_HDLC, Crc};
use std::fmt;

/// The CRC32 variant used to derive the grouping hash of an identity.
const IDENTITY_HASH_ALGO: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const UID_TAG: u8 = 0x01;
const KEY_ID_TAG: u8 = 0x02;

/// A function deriving the grouping hash of an identity. The index keeps the
/// same function for its whole lifetime.
pub type IdentityHashFn = fn(&Identity) -> u32;

/// A user id, or the id of a public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Uid(u32),
    KeyId(Bytes),
}

impl Identity {
    /// Builds a key identity from raw key-id bytes.
    pub fn key_id(id: impl Into<Bytes>) -> Self {
        Identity::KeyId(id.into())
    }

    pub fn is_key(&self) -> bool {
        matches!(self, Identity::KeyId(_))
    }

    /// The derived hash used for placement in a `RequestIndex`.
    ///
    /// A tag byte is mixed in first so that a uid and a key id with the same
    /// value bytes do not hash identically by construction.
    pub fn derived_hash(&self) -> u32 {
        let mut digest = IDENTITY_HASH_ALGO.digest();
        match self {
            Identity::Uid(uid) => {
                digest.update(&[UID_TAG]);
                digest.update(&uid.to_be_bytes());
            }
            Identity::KeyId(id) => {
                digest.update(&[KEY_ID_TAG]);
                digest.update(id);
            }
        }
        digest.finalize()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Uid(uid) => write!(f, "uid:{uid}"),
            Identity::KeyId(id) => write!(f, "key:{}", hex::encode(id)),
        }
    }
}

/// The default `IdentityHashFn`.
pub fn default_identity_hash(identity: &Identity) -> u32 {
    identity.derived_hash()
}
