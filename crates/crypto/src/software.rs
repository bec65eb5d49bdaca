//! Software-backed signing capability.
//!
//! `SoftwareSigner` derives one Ed25519 key per (protocol, key id,
//! counterparty) path from a single 32-byte root secret using BLAKE3 key
//! derivation. Derivation is deterministic, so a signature made for a path
//! can always be re-verified by re-deriving the same key.
//!
//! For production use the root secret should be loaded from secure storage;
//! `generate()` exists for development and tests.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::signer::{Signer, SignerError, SignerResult};

pub struct SoftwareSigner {
    root_secret: [u8; 32],
}

impl SoftwareSigner {
    /// Creates a signer with a fresh random root secret.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let signer = Self {
            root_secret: secret,
        };
        secret.zeroize();
        signer
    }

    /// Creates a signer from an existing 32-byte root secret.
    ///
    /// # Security
    /// The caller's copy of the secret should be zeroized after use.
    pub fn from_secret(secret: &[u8]) -> SignerResult<Self> {
        if secret.len() != 32 {
            return Err(SignerError::Derivation {
                reason: format!("invalid root secret length: {} (expected 32)", secret.len()),
            });
        }

        let mut root = [0u8; 32];
        root.copy_from_slice(secret);
        Ok(Self { root_secret: root })
    }

    fn derivation_context(protocol_id: &str, key_id: &str, counterparty: Option<&str>) -> String {
        format!(
            "palisade {} {} {}",
            protocol_id,
            key_id,
            counterparty.unwrap_or("self")
        )
    }

    fn derive_signing_key(
        &self,
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SigningKey {
        let context = Self::derivation_context(protocol_id, key_id, counterparty);
        let mut child = blake3::derive_key(&context, &self.root_secret);
        let key = SigningKey::from_bytes(&child);
        child.zeroize();
        key
    }
}

impl Drop for SoftwareSigner {
    fn drop(&mut self) {
        self.root_secret.zeroize();
    }
}

#[async_trait]
impl Signer for SoftwareSigner {
    async fn sign(
        &self,
        data: &[u8],
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SignerResult<Vec<u8>> {
        let key = self.derive_signing_key(protocol_id, key_id, counterparty);
        let signature = key.sign(data);
        Ok(signature.to_bytes().to_vec())
    }

    async fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SignerResult<bool> {
        let parsed = match Signature::from_slice(signature) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(false),
        };

        let key = self.derive_signing_key(protocol_id, key_id, counterparty);
        Ok(key.verifying_key().verify(data, &parsed).is_ok())
    }

    async fn get_public_key(
        &self,
        protocol_id: &str,
        key_id: &str,
        counterparty: Option<&str>,
    ) -> SignerResult<String> {
        let key = self.derive_signing_key(protocol_id, key_id, counterparty);
        Ok(hex::encode(key.verifying_key().to_bytes()))
    }
}
