//! Signing capability interface.
//!
//! All Palisade signatures go through this trait. Keys are addressed by a
//! (protocol id, key id, counterparty) triple rather than raw key material,
//! so a certificate signature can be re-verified later from nothing but the
//! certificate itself: the protocol id is a constant, the key id is the
//! serial number, and the counterparty is the subject on the record.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Protocol identifier for certificate issuance signatures.
pub const PROTOCOL_CERTIFICATE: &str = "certificate signing";

/// Protocol identifier for session nonce signatures.
pub const PROTOCOL_SESSION: &str = "session auth";

/// Protocol identifier for audit trail entry signatures.
pub const PROTOCOL_AUDIT: &str = "audit trail";

/// Protocol identifier for identity key lookups.
pub const PROTOCOL_IDENTITY: &str = "identity";

/// Errors raised by a signing capability.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Key derivation failed: {reason}")]
    Derivation { reason: String },

    #[error("Signing failed: {reason}")]
    Signing { reason: String },

    #[error("Signer unavailable: {reason}")]
    Unavailable { reason: String },
}

pub type SignerResult<T> = Result<T, SignerError>;

/// Signing capability consumed by the trust layer.
///
/// Implementations must be safe to share across tasks. Callers wrap every
/// invocation in a timeout and treat failures as recoverable.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs `data` with the key addressed by the derivation triple.
    async fn sign(
        &self,
        data: &[u8],
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SignerResult<Vec<u8>>;

    /// Verifies `signature` over `data` for the same derivation triple.
    ///
    /// A malformed or mismatched signature yields `Ok(false)`; `Err` is
    /// reserved for capability failures.
    async fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SignerResult<bool>;

    /// Returns the hex-encoded public key for the derivation triple.
    async fn get_public_key(
        &self,
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SignerResult<String>;

    /// The stable identity key of this signer.
    async fn identity_key(&self) -> SignerResult<String> {
        self.get_public_key(PROTOCOL_IDENTITY, "self", None).await
    }
}

/// Shared handle to a signing capability.
pub type SignerHandle = Arc<dyn Signer>;
