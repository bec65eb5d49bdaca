//! Configuration management for Palisade.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gate: GateSection,
    pub session: SessionSection,
    pub audit: AuditSection,
}

/// Identity gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSection {
    /// How long a successful verification stays cached, in milliseconds.
    pub success_ttl_ms: u64,
    /// How long a failed verification stays cached, in milliseconds.
    pub failure_ttl_ms: u64,
    /// When false, unknown public keys pass verification as `unverified`.
    pub require_certificate: bool,
    /// Timeout for calls into the signing and revocation capabilities.
    pub capability_timeout_ms: u64,
}

/// Session manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    pub session_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    pub max_drift_ms: u64,
    pub max_future_ms: u64,
    pub max_past_ms: u64,
    pub capability_timeout_ms: u64,
}

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    /// Number of entries between blockchain anchors.
    pub anchor_interval: usize,
    pub capability_timeout_ms: u64,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            gate: GateSection {
                success_ttl_ms: 60_000,
                failure_ttl_ms: 10_000,
                require_certificate: true,
                capability_timeout_ms: 5_000,
            },
            session: SessionSection {
                session_ttl_ms: 86_400_000,
                sweep_interval_ms: 60_000,
                max_drift_ms: 500,
                max_future_ms: 1_000,
                max_past_ms: 60_000,
                capability_timeout_ms: 5_000,
            },
            audit: AuditSection {
                anchor_interval: 100,
                capability_timeout_ms: 5_000,
            },
        }
    }
}
