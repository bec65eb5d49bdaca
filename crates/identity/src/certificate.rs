//! Certificate data model and wire format.
//!
//! Certificates serialize with camelCase keys; signatures cover the
//! canonical (recursively key-sorted) JSON of every field except
//! `signature` itself, so interoperating implementations must produce
//! byte-identical signing payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use palisade_core::{sort_json_value, CanonicalError};

/// Upper bound on custom extension entries per certificate.
pub const MAX_EXTENSIONS: usize = 32;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Invalid certificate field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Certificate category, mirrored by the profile payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Operator,
    Agent,
    Service,
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateType::Operator => write!(f, "operator"),
            CertificateType::Agent => write!(f, "agent"),
            CertificateType::Service => write!(f, "service"),
        }
    }
}

/// Typed per-category attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CertificateProfile {
    #[serde(rename_all = "camelCase")]
    Operator {
        display_name: String,
        organization: String,
    },
    #[serde(rename_all = "camelCase")]
    Agent {
        agent_name: String,
        /// Identity key of the operator responsible for this agent.
        operator_key: String,
    },
    #[serde(rename_all = "camelCase")]
    Service { service_name: String },
}

impl CertificateProfile {
    pub fn certificate_type(&self) -> CertificateType {
        match self {
            CertificateProfile::Operator { .. } => CertificateType::Operator,
            CertificateProfile::Agent { .. } => CertificateType::Agent,
            CertificateProfile::Service { .. } => CertificateType::Service,
        }
    }
}

/// Signed certificate attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateFields {
    /// Not valid before (Unix milliseconds)
    pub valid_from: u64,
    /// Not valid after (Unix milliseconds)
    pub valid_until: u64,
    /// Category-specific attributes
    pub profile: CertificateProfile,
    /// Custom attributes, ordered by name
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

/// Identity certificate binding a subject key to typed attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Certificate category
    #[serde(rename = "type")]
    pub cert_type: CertificateType,
    /// Globally unique, immutable serial number
    pub serial_number: String,
    /// Identity key being certified
    pub subject: String,
    /// Identity key of the issuing certifier
    pub certifier: String,
    /// External-ledger reference spent on revocation (`txid:vout`)
    pub revocation_outpoint: String,
    /// Signed attributes
    pub fields: CertificateFields,
    /// Certifier signature over the canonical payload (hex)
    pub signature: String,
}

impl Certificate {
    /// Validates structural invariants at the trust boundary.
    pub fn validate(&self) -> Result<(), CertificateError> {
        if self.serial_number.is_empty() {
            return Err(CertificateError::InvalidField {
                field: "serialNumber".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.subject.is_empty() {
            return Err(CertificateError::InvalidField {
                field: "subject".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.certifier.is_empty() {
            return Err(CertificateError::InvalidField {
                field: "certifier".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.fields.valid_from > self.fields.valid_until {
            return Err(CertificateError::InvalidField {
                field: "validFrom".to_string(),
                reason: "validity window is inverted".to_string(),
            });
        }
        if self.cert_type != self.fields.profile.certificate_type() {
            return Err(CertificateError::InvalidField {
                field: "type".to_string(),
                reason: "does not match profile kind".to_string(),
            });
        }
        if self.fields.extensions.len() > MAX_EXTENSIONS {
            return Err(CertificateError::InvalidField {
                field: "extensions".to_string(),
                reason: format!("more than {} entries", MAX_EXTENSIONS),
            });
        }
        if self.fields.extensions.keys().any(|name| name.is_empty()) {
            return Err(CertificateError::InvalidField {
                field: "extensions".to_string(),
                reason: "extension names must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Canonical bytes the certifier signs: every field except `signature`,
    /// keys recursively sorted.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CertificateError> {
        let mut value = serde_json::to_value(self).map_err(|e| CanonicalError::Serialization {
            reason: e.to_string(),
        })?;
        if let Value::Object(ref mut map) = value {
            map.remove("signature");
        }
        let sorted = sort_json_value(value);
        serde_json::to_vec(&sorted).map_err(|e| {
            CanonicalError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.fields.valid_until
    }

    pub fn is_not_yet_valid(&self, now: u64) -> bool {
        now < self.fields.valid_from
    }
}

/// Reasons a certificate fails verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyFailure {
    #[error("Certifier {certifier} is not trusted")]
    UntrustedCertifier { certifier: String },

    #[error("Certificate {serial} has been revoked")]
    CertificateRevoked { serial: String },

    #[error("Certificate {serial} expired at {valid_until}")]
    CertificateExpired { serial: String, valid_until: u64 },

    #[error("Certificate {serial} is not valid until {valid_from}")]
    CertificateNotYetValid { serial: String, valid_from: u64 },

    #[error("Certificate signature is invalid")]
    InvalidSignature,

    #[error("No certificate registered for {public_key}")]
    CertificateMissing { public_key: String },

    #[error("Verification capability unavailable: {reason}")]
    CapabilityUnavailable { reason: String },
}
