//! Contracts for the surrounding node.
//!
//! The core never builds blockchain transactions or touches keys itself:
//! it hands canonical payloads and payout instructions to a
//! [`TransactionBuilder`] and stamps records with the key id of a
//! [`Signer`]. Implementations live in the enclosing node and wallet.

use thiserror::Error;

use crate::types::{KeyId, PayoutTransaction, Txid};

#[derive(Debug, Error)]
#[error("transaction builder: {0}")]
pub struct BuilderError(pub String);

/// Embeds opaque script payloads in transactions and broadcasts them.
pub trait TransactionBuilder {
    /// Wrap `payload` in a transaction output script and broadcast,
    /// returning the carrier transaction id.
    fn broadcast_payload(&self, payload: &[u8])
        -> Result<Txid, BuilderError>;

    /// Build and broadcast the settlement transaction for a closed voting
    /// period.
    fn broadcast_payout(
        &self,
        payout: &PayoutTransaction,
    ) -> Result<Txid, BuilderError>;
}

#[derive(Debug, Error)]
#[error("signer: {0}")]
pub struct SignerError(pub String);

/// A compact 64-byte secp256k1 signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompactSignature(pub [u8; 64]);

/// Signs 32-byte digests with a compressed secp256k1 key.
pub trait Signer {
    /// The 20-byte id (hash160 of the compressed public key) stamped into
    /// records authored by this signer.
    fn key_id(&self) -> KeyId;

    fn sign(
        &self,
        digest: &[u8; 32],
    ) -> Result<CompactSignature, SignerError>;
}
