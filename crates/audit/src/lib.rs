//! Tamper-evident audit facilities for agent actions.
//!
//! Two complementary structures cover the accountability story:
//!
//! - [`SignedAuditTrail`]: one hash-linked, signed chain per agent,
//!   anchored externally every `anchor_interval` entries
//! - [`AnchorChain`]: one lightweight chain per session, committed as a
//!   single Merkle root at session close
//!
//! Both hash sensitive content before recording it and both verify by
//! recomputation, so a serialized chain is as checkable as a live one.

pub mod anchor;
pub mod merkle;
pub mod trail;

pub use anchor::{
    AnchorChain, AnchorError, AnchorPoint, AnchorResult, AnchorType, RootVerification,
    SessionCommit,
};
pub use merkle::{merkle_root, verify_proof, MerkleError, MerkleProof, MerkleResult, MerkleTree};
pub use trail::{
    verify_entries, verify_entry, AuditEntry, AuditError, AuditEvent, AuditResult,
    BlockchainAnchor, ChainVerification, ChainViolation, SignedAuditTrail, TrailConfig,
    TrailExport, TrailMetrics, ViolationKind,
};
