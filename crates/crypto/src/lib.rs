//! Cryptographic capability interfaces for the Palisade trust layer.
//!
//! This crate defines the two external capabilities every other Palisade
//! component depends on, plus default software implementations for
//! development and testing:
//!
//! - **Signing capability** (`Signer`): sign, verify, and derive public
//!   keys addressed by (protocol, key id, counterparty). The production
//!   backing may be a local keyring, an HSM, or a multi-party threshold
//!   signer; the trust layer only ever calls this interface.
//! - **Ledger capability** (`LedgerClient`): publish commitment bytes to
//!   an external append-only ledger and query revocation outpoints.
//!
//! # Security Principles
//!
//! - Never roll custom cryptographic primitives
//! - All signatures must be verified before trust
//! - Secrets must never be logged or hardcoded
//! - Root key material is zeroized on drop

pub mod ledger;
pub mod signer;
pub mod software;

pub use ledger::{
    LedgerClient, LedgerError, LedgerHandle, LedgerResult, MemoryLedger, Publication,
};
pub use signer::{
    Signer, SignerError, SignerHandle, SignerResult, PROTOCOL_AUDIT, PROTOCOL_CERTIFICATE,
    PROTOCOL_IDENTITY, PROTOCOL_SESSION,
};
pub use software::SoftwareSigner;
