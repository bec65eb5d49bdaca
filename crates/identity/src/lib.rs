//! Certificate-based identity for the Palisade trust layer.
//!
//! This crate provides the certificate lifecycle (issuance, revocation,
//! verification) and the identity gate consulted before every privileged
//! operation the protected agent performs. Every inbound interaction must
//! present a certificate rooted in a trusted certifier before tool
//! execution, inference, or data access proceeds.
//!
//! # Core Concepts
//!
//! - **Certificate**: signed, time-bounded attestation binding an identity
//!   key to typed attributes
//! - **Certificate Authority**: issues and revokes certificates; sole
//!   source of truth for what it has issued
//! - **Identity Gate**: the mandatory verification choke-point with a
//!   TTL-bounded result cache
//! - **Revocation**: one-way invalidation, propagated through a swappable
//!   checker capability
//!
//! # Security Model
//!
//! All verification paths must be:
//! - Fail-closed: any check failure denies access with a typed reason
//! - Ordered cheapest-first: trust set, revocation, validity window, then
//!   the signature check
//! - Revocation-responsive: cached failures expire faster than cached
//!   successes, and revocations evict eagerly

pub mod authority;
pub mod certificate;
pub mod gate;
pub mod revocation;

pub use authority::{
    AuthorityError, AuthorityMetrics, AuthorityResult, CertificateAuthority, CertificateRequest,
    CertificateStatus, IssuedCertificate,
};
pub use certificate::{
    Certificate, CertificateError, CertificateFields, CertificateProfile, CertificateType,
    VerifyFailure, MAX_EXTENSIONS,
};
pub use gate::{
    GateConfig, GateError, GateMetrics, IdentityGate, VerificationKind, VerificationOutcome,
};
pub use revocation::{
    InMemoryRevocationList, OutpointRevocationChecker, RevocationChecker, RevocationError,
    RevocationHandle, RevocationListener, RevocationResult,
};
