//! 32-byte content hashes.
//!
//! Every record id and carrier transaction id is the double SHA-256 of the
//! record's canonical bytes, so ids are stable across serializations and
//! independent of the transaction that carried the record.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32-byte double-SHA-256 digest.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid 32-byte hex hash")]
pub struct ParseHashError;

impl FromStr for Hash256 {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ParseHashError)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| ParseHashError)?;
        Ok(Self(bytes))
    }
}

/// Content id of a market record.
pub type ObjectId = Hash256;

/// Id of the transaction that carried a record.
pub type Txid = Hash256;

/// A 20-byte key id (hash160 of a compressed secp256k1 public key).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct KeyId(pub [u8; 20]);

impl KeyId {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Double SHA-256 of `bytes`, first byte first.
pub fn double_sha256(bytes: &[u8]) -> Hash256 {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    Hash256(second.into())
}
