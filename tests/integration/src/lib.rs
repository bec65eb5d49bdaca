//! Cross-crate integration tests for the trust layer
//!
//! This test suite validates:
//! - The full gated-agent lifecycle: issuance, gate verification, session
//!   auth, gated operations, audit entries, session commitment
//! - Revocation propagation from authority to ledger to gate cache
//! - Audit export/import and external Merkle verification

pub mod test_utils;

#[cfg(test)]
mod lifecycle_tests;

#[cfg(test)]
mod revocation_tests;

#[cfg(test)]
mod audit_export_tests;
