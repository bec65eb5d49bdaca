//! BLAKE3 hashing helpers shared across the trust layer.

/// A BLAKE3 hash represented as a 32-byte array.
pub type Hash32 = [u8; 32];

/// Sentinel previous-hash for the first record in a chain.
pub const GENESIS_HASH: Hash32 = [0u8; 32];

/// Computes the BLAKE3 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    *blake3::hash(data).as_bytes()
}

/// Computes the BLAKE3 hash of a byte slice and renders it as lowercase hex.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}

/// Parses a 64-character hex string back into a 32-byte hash.
pub fn parse_hash_hex(value: &str) -> Option<Hash32> {
    let bytes = hex::decode(value).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Some(hash)
}

/// Serde adapter for `Hash32` fields rendered as hex strings in JSON.
pub mod serde_hex {
    use super::Hash32;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_hash_hex(&value)
            .ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}
