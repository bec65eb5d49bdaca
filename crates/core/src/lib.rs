//! Core functionality for the Palisade trust layer.
//!
//! This crate provides the fundamental building blocks shared across the
//! Palisade workspace: canonical JSON serialization for signing
//! interoperability, BLAKE3 hashing helpers, timestamp utilities,
//! configuration loading, and logging initialization.

pub mod canonical;
pub mod config;
pub mod hash;
pub mod logging;
pub mod time;

pub use canonical::{sort_json_value, to_canonical_json, to_canonical_vec, CanonicalError};
pub use config::{AuditSection, Config, GateSection, SessionSection};
pub use hash::{hash_bytes, hash_hex, parse_hash_hex, Hash32, GENESIS_HASH};
pub use time::now_ms;
