//! Certificate authority: issuance and one-way revocation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use palisade_core::{hash_hex, now_ms, to_canonical_vec};
use palisade_crypto::{LedgerClient, LedgerHandle, Signer, SignerHandle, PROTOCOL_CERTIFICATE};

use crate::certificate::{
    Certificate, CertificateError, CertificateFields, CertificateProfile, VerifyFailure,
};

pub const DEFAULT_VALIDITY_DAYS: u64 = 365;
const DEFAULT_CAPABILITY_TIMEOUT_MS: u64 = 5_000;
const SERIAL_SUFFIX_BYTES: usize = 8;
const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Certificate {serial} not found")]
    CertificateNotFound { serial: String },

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("Signing capability failed: {reason}")]
    SigningFailed { reason: String },

    #[error("Capability call exceeded {timeout_ms}ms")]
    CapabilityTimeout { timeout_ms: u64 },

    #[error("Revocation recorded locally but propagation failed: {reason}")]
    RevocationPropagationFailed { reason: String },
}

pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Issuance request, built with defaults and refined through the builders.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub subject_public_key: String,
    pub profile: CertificateProfile,
    pub validity_days: u64,
    pub extensions: BTreeMap<String, String>,
}

impl CertificateRequest {
    pub fn new(subject_public_key: impl Into<String>, profile: CertificateProfile) -> Self {
        Self {
            subject_public_key: subject_public_key.into(),
            profile,
            validity_days: DEFAULT_VALIDITY_DAYS,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_validity_days(mut self, days: u64) -> Self {
        self.validity_days = days;
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }
}

/// CA-side record: the certificate plus issuance and revocation metadata.
///
/// `revoked` flips one way only. `revocation_propagated` is false while an
/// external revocation notice is still owed; re-invoking revocation retries
/// the publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub issued_at: u64,
    pub revoked: bool,
    pub revoked_at: Option<u64>,
    pub revocation_reason: Option<String>,
    pub revoked_by: Option<String>,
    pub revocation_propagated: bool,
}

/// Verification verdict with the failure classified for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatus {
    pub valid: bool,
    pub revoked: bool,
    pub expired: bool,
    pub not_yet_valid: bool,
    pub failure: Option<VerifyFailure>,
}

impl CertificateStatus {
    fn passing() -> Self {
        Self {
            valid: true,
            revoked: false,
            expired: false,
            not_yet_valid: false,
            failure: None,
        }
    }

    pub fn from_failure(failure: VerifyFailure) -> Self {
        Self {
            valid: false,
            revoked: matches!(failure, VerifyFailure::CertificateRevoked { .. }),
            expired: matches!(failure, VerifyFailure::CertificateExpired { .. }),
            not_yet_valid: matches!(failure, VerifyFailure::CertificateNotYetValid { .. }),
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityMetrics {
    pub certificates_issued_total: u64,
    pub certificates_revoked_total: u64,
    pub revocation_propagation_failures_total: u64,
}

/// Issues and revokes identity certificates; the sole source of truth for
/// what it has issued.
pub struct CertificateAuthority {
    signer: SignerHandle,
    ledger: Option<LedgerHandle>,
    certifier_key: String,
    capability_timeout: Duration,
    certificates: HashMap<String, IssuedCertificate>,
    metrics: AuthorityMetrics,
}

impl CertificateAuthority {
    /// Creates an authority whose certifier key comes from the signing
    /// capability.
    pub async fn new(signer: SignerHandle) -> AuthorityResult<Self> {
        let capability_timeout = Duration::from_millis(DEFAULT_CAPABILITY_TIMEOUT_MS);
        let certifier_key = match timeout(capability_timeout, signer.identity_key()).await {
            Ok(Ok(key)) => key,
            Ok(Err(err)) => {
                return Err(AuthorityError::SigningFailed {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(AuthorityError::CapabilityTimeout {
                    timeout_ms: capability_timeout.as_millis() as u64,
                })
            }
        };

        info!(certifier = %certifier_key, "Certificate authority initialized");

        Ok(Self {
            signer,
            ledger: None,
            certifier_key,
            capability_timeout,
            certificates: HashMap::new(),
            metrics: AuthorityMetrics::default(),
        })
    }

    /// Attaches a ledger for publishing revocation notices.
    pub fn with_ledger(mut self, ledger: LedgerHandle) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_capability_timeout(mut self, timeout_ms: u64) -> Self {
        self.capability_timeout = Duration::from_millis(timeout_ms);
        self
    }

    /// Identity key under which this authority signs certificates.
    pub fn certifier_key(&self) -> &str {
        &self.certifier_key
    }

    /// Issues a certificate: generates the serial and revocation outpoint,
    /// signs the canonical payload under a key path derived from the serial.
    pub async fn issue_certificate(
        &mut self,
        request: CertificateRequest,
    ) -> AuthorityResult<IssuedCertificate> {
        let now = now_ms();
        let serial = generate_serial(now);
        let cert_type = request.profile.certificate_type();

        let mut certificate = Certificate {
            cert_type,
            serial_number: serial.clone(),
            subject: request.subject_public_key,
            certifier: self.certifier_key.clone(),
            revocation_outpoint: revocation_outpoint(&serial),
            fields: CertificateFields {
                valid_from: now,
                valid_until: now.saturating_add(request.validity_days.saturating_mul(DAY_MS)),
                profile: request.profile,
                extensions: request.extensions,
            },
            signature: String::new(),
        };
        certificate.validate()?;

        let payload = certificate.signing_payload()?;
        let signature = match timeout(
            self.capability_timeout,
            self.signer
                .sign(&payload, PROTOCOL_CERTIFICATE, &serial, Some(&certificate.subject)),
        )
        .await
        {
            Ok(Ok(signature)) => signature,
            Ok(Err(err)) => {
                return Err(AuthorityError::SigningFailed {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(AuthorityError::CapabilityTimeout {
                    timeout_ms: self.capability_timeout.as_millis() as u64,
                })
            }
        };
        certificate.signature = hex::encode(signature);

        let issued = IssuedCertificate {
            certificate,
            issued_at: now,
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
            revoked_by: None,
            revocation_propagated: false,
        };
        self.certificates.insert(serial.clone(), issued.clone());
        self.metrics.certificates_issued_total += 1;

        info!(
            serial = %serial,
            subject = %issued.certificate.subject,
            cert_type = %issued.certificate.cert_type,
            "Issued certificate"
        );

        Ok(issued)
    }

    /// Revokes a certificate. Idempotent: revoking an already-revoked serial
    /// whose notice was published is a no-op.
    ///
    /// The local flag flips before propagation, so the certificate is dead
    /// locally even if the external publish fails; that failure is returned
    /// as `RevocationPropagationFailed` and retried on the next invocation.
    pub async fn revoke_certificate(
        &mut self,
        serial: &str,
        reason: impl Into<String>,
        revoked_by: Option<&str>,
    ) -> AuthorityResult<()> {
        let now = now_ms();
        let reason = reason.into();

        let (outpoint, newly_revoked) = {
            let record = self.certificates.get_mut(serial).ok_or_else(|| {
                AuthorityError::CertificateNotFound {
                    serial: serial.to_string(),
                }
            })?;

            if record.revoked && record.revocation_propagated {
                debug!(serial, "Certificate already revoked and propagated");
                return Ok(());
            }

            let newly_revoked = !record.revoked;
            if newly_revoked {
                record.revoked = true;
                record.revoked_at = Some(now);
                record.revocation_reason = Some(reason.clone());
                record.revoked_by = revoked_by.map(|key| key.to_string());
            }
            (record.certificate.revocation_outpoint.clone(), newly_revoked)
        };

        if newly_revoked {
            self.metrics.certificates_revoked_total += 1;
            warn!(serial, reason = %reason, "Certificate revoked");
        }

        let propagation_error = match &self.ledger {
            None => None,
            Some(ledger) => {
                let notice = serde_json::json!({
                    "revokedSerial": serial,
                    "outpoint": outpoint,
                    "reason": reason,
                    "revokedAt": now,
                });
                let bytes = to_canonical_vec(&notice).map_err(CertificateError::from)?;

                match timeout(self.capability_timeout, ledger.publish(&bytes)).await {
                    Ok(Ok(tx_id)) => {
                        info!(serial, tx_id = %tx_id, "Revocation notice published");
                        None
                    }
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(_) => Some(format!(
                        "publish timed out after {}ms",
                        self.capability_timeout.as_millis()
                    )),
                }
            }
        };

        let record = self.certificates.get_mut(serial).ok_or_else(|| {
            AuthorityError::CertificateNotFound {
                serial: serial.to_string(),
            }
        })?;
        match propagation_error {
            None => {
                record.revocation_propagated = true;
                Ok(())
            }
            Some(reason) => {
                record.revocation_propagated = false;
                self.metrics.revocation_propagation_failures_total += 1;
                error!(
                    serial,
                    reason = %reason,
                    "Revocation flagged locally but propagation failed"
                );
                Err(AuthorityError::RevocationPropagationFailed { reason })
            }
        }
    }

    /// Verifies a certificate against the current clock.
    pub async fn verify_certificate(&self, certificate: &Certificate) -> CertificateStatus {
        self.verify_certificate_at(certificate, now_ms()).await
    }

    /// Verification checks in fixed order, short-circuiting on the first
    /// failure: trusted certifier, revocation, validity window, signature.
    pub async fn verify_certificate_at(
        &self,
        certificate: &Certificate,
        now: u64,
    ) -> CertificateStatus {
        if certificate.certifier != self.certifier_key {
            return CertificateStatus::from_failure(VerifyFailure::UntrustedCertifier {
                certifier: certificate.certifier.clone(),
            });
        }

        if self.is_revoked(&certificate.serial_number) {
            return CertificateStatus::from_failure(VerifyFailure::CertificateRevoked {
                serial: certificate.serial_number.clone(),
            });
        }

        if certificate.is_not_yet_valid(now) {
            return CertificateStatus::from_failure(VerifyFailure::CertificateNotYetValid {
                serial: certificate.serial_number.clone(),
                valid_from: certificate.fields.valid_from,
            });
        }
        if certificate.is_expired(now) {
            return CertificateStatus::from_failure(VerifyFailure::CertificateExpired {
                serial: certificate.serial_number.clone(),
                valid_until: certificate.fields.valid_until,
            });
        }

        let payload = match certificate.signing_payload() {
            Ok(payload) => payload,
            Err(err) => {
                return CertificateStatus::from_failure(VerifyFailure::CapabilityUnavailable {
                    reason: err.to_string(),
                })
            }
        };
        let signature = match hex::decode(&certificate.signature) {
            Ok(signature) => signature,
            Err(_) => return CertificateStatus::from_failure(VerifyFailure::InvalidSignature),
        };

        let verified = match timeout(
            self.capability_timeout,
            self.signer.verify(
                &payload,
                &signature,
                PROTOCOL_CERTIFICATE,
                &certificate.serial_number,
                Some(&certificate.subject),
            ),
        )
        .await
        {
            Ok(Ok(verified)) => verified,
            Ok(Err(err)) => {
                return CertificateStatus::from_failure(VerifyFailure::CapabilityUnavailable {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return CertificateStatus::from_failure(VerifyFailure::CapabilityUnavailable {
                    reason: format!(
                        "signature check timed out after {}ms",
                        self.capability_timeout.as_millis()
                    ),
                })
            }
        };
        if !verified {
            return CertificateStatus::from_failure(VerifyFailure::InvalidSignature);
        }

        CertificateStatus::passing()
    }

    /// Returns the newest certificate issued to `public_key` that still
    /// verifies, so rotated credentials coexist during a grace period.
    pub async fn has_valid_certificate(&self, public_key: &str) -> Option<Certificate> {
        let mut candidates: Vec<&IssuedCertificate> = self
            .certificates
            .values()
            .filter(|issued| issued.certificate.subject == public_key)
            .collect();
        candidates.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));

        for issued in candidates {
            if self.verify_certificate(&issued.certificate).await.valid {
                return Some(issued.certificate.clone());
            }
        }
        None
    }

    pub fn is_revoked(&self, serial: &str) -> bool {
        self.certificates
            .get(serial)
            .map(|record| record.revoked)
            .unwrap_or(false)
    }

    pub fn get_certificate(&self, serial: &str) -> Option<&IssuedCertificate> {
        self.certificates.get(serial)
    }

    pub fn list_certificates(&self) -> Vec<&IssuedCertificate> {
        self.certificates.values().collect()
    }

    pub fn metrics(&self) -> AuthorityMetrics {
        self.metrics.clone()
    }
}

/// Issuance timestamp plus a CSPRNG suffix. Real deployments must back this
/// with a persistence-layer uniqueness constraint.
fn generate_serial(now: u64) -> String {
    let mut suffix = [0u8; SERIAL_SUFFIX_BYTES];
    OsRng.fill_bytes(&mut suffix);
    format!("{}-{}", now, hex::encode(suffix))
}

fn revocation_outpoint(serial: &str) -> String {
    let tx_id = hash_hex(format!("revocation {serial}").as_bytes());
    format!("{tx_id}:0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_crypto::{MemoryLedger, SoftwareSigner};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn operator_profile(name: &str) -> CertificateProfile {
        CertificateProfile::Operator {
            display_name: name.to_string(),
            organization: "Example Corp".to_string(),
        }
    }

    async fn create_test_authority() -> CertificateAuthority {
        let signer = Arc::new(SoftwareSigner::from_secret(&[7u8; 32]).unwrap());
        CertificateAuthority::new(signer).await.unwrap()
    }

    #[tokio::test]
    async fn test_issue_certificate() {
        let mut ca = create_test_authority().await;

        let issued = ca
            .issue_certificate(
                CertificateRequest::new("alice-key", operator_profile("Alice"))
                    .with_validity_days(30)
                    .with_extension("department", "ops"),
            )
            .await
            .unwrap();

        assert_eq!(issued.certificate.subject, "alice-key");
        assert_eq!(issued.certificate.certifier, ca.certifier_key());
        assert!(issued.certificate.revocation_outpoint.ends_with(":0"));
        assert_eq!(
            issued.certificate.fields.extensions.get("department"),
            Some(&"ops".to_string())
        );
        assert!(!issued.revoked);
        assert_eq!(ca.metrics().certificates_issued_total, 1);
    }

    #[tokio::test]
    async fn test_verify_issued_certificate() {
        let mut ca = create_test_authority().await;
        let issued = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();

        let status = ca.verify_certificate(&issued.certificate).await;
        assert!(status.valid);
        assert!(status.failure.is_none());
    }

    #[tokio::test]
    async fn test_verify_rejects_tampered_subject() {
        let mut ca = create_test_authority().await;
        let issued = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();

        let mut tampered = issued.certificate.clone();
        tampered.subject = "mallory-key".to_string();

        let status = ca.verify_certificate(&tampered).await;
        assert!(!status.valid);
        assert_eq!(status.failure, Some(VerifyFailure::InvalidSignature));
    }

    #[tokio::test]
    async fn test_verify_reports_expired() {
        let mut ca = create_test_authority().await;
        let issued = ca
            .issue_certificate(
                CertificateRequest::new("alice-key", operator_profile("Alice"))
                    .with_validity_days(30),
            )
            .await
            .unwrap();

        let after_window = issued.certificate.fields.valid_until + 1;
        let status = ca
            .verify_certificate_at(&issued.certificate, after_window)
            .await;

        assert!(!status.valid);
        assert!(status.expired);
        assert!(!status.revoked);
    }

    #[tokio::test]
    async fn test_verify_reports_not_yet_valid() {
        let mut ca = create_test_authority().await;
        let issued = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();

        let before_window = issued.certificate.fields.valid_from - 1;
        let status = ca
            .verify_certificate_at(&issued.certificate, before_window)
            .await;

        assert!(!status.valid);
        assert!(status.not_yet_valid);
    }

    #[tokio::test]
    async fn test_untrusted_certifier_rejected() {
        let mut issuing_ca = create_test_authority().await;
        let issued = issuing_ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();

        let other_signer = Arc::new(SoftwareSigner::from_secret(&[9u8; 32]).unwrap());
        let other_ca = CertificateAuthority::new(other_signer).await.unwrap();

        let status = other_ca.verify_certificate(&issued.certificate).await;
        assert!(matches!(
            status.failure,
            Some(VerifyFailure::UntrustedCertifier { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let mut ca = create_test_authority().await;
        let issued = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();
        let serial = issued.certificate.serial_number.clone();

        ca.revoke_certificate(&serial, "key compromise", Some("admin-key"))
            .await
            .unwrap();
        ca.revoke_certificate(&serial, "key compromise", Some("admin-key"))
            .await
            .unwrap();

        assert!(ca.is_revoked(&serial));
        assert_eq!(ca.metrics().certificates_revoked_total, 1);

        let status = ca.verify_certificate(&issued.certificate).await;
        assert!(status.revoked);
        assert!(!status.valid);

        let record = ca.get_certificate(&serial).unwrap();
        assert_eq!(record.revocation_reason.as_deref(), Some("key compromise"));
        assert_eq!(record.revoked_by.as_deref(), Some("admin-key"));
    }

    #[tokio::test]
    async fn test_revoke_unknown_serial() {
        let mut ca = create_test_authority().await;

        let result = ca.revoke_certificate("no-such-serial", "testing", None).await;
        assert!(matches!(
            result,
            Err(AuthorityError::CertificateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_revocation_propagation_failure_then_retry() {
        let signer = Arc::new(SoftwareSigner::from_secret(&[7u8; 32]).unwrap());
        let ledger = Arc::new(MemoryLedger::new());
        let mut ca = CertificateAuthority::new(signer)
            .await
            .unwrap()
            .with_ledger(ledger.clone());

        let issued = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();
        let serial = issued.certificate.serial_number.clone();

        ledger.set_offline(true);
        let result = ca.revoke_certificate(&serial, "key compromise", None).await;
        assert!(matches!(
            result,
            Err(AuthorityError::RevocationPropagationFailed { .. })
        ));
        assert!(ca.is_revoked(&serial));
        assert!(!ca.get_certificate(&serial).unwrap().revocation_propagated);
        assert_eq!(ca.metrics().revocation_propagation_failures_total, 1);
        assert_eq!(ledger.publication_count(), 0);

        ledger.set_offline(false);
        ca.revoke_certificate(&serial, "key compromise", None)
            .await
            .unwrap();
        assert!(ca.get_certificate(&serial).unwrap().revocation_propagated);
        assert_eq!(ca.metrics().certificates_revoked_total, 1);
        assert_eq!(ledger.publication_count(), 1);
    }

    #[tokio::test]
    async fn test_rotation_falls_back_to_older_certificate() {
        let mut ca = create_test_authority().await;

        let first = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();
        let second = ca
            .issue_certificate(CertificateRequest::new("alice-key", operator_profile("Alice")))
            .await
            .unwrap();

        ca.revoke_certificate(&second.certificate.serial_number, "rotation test", None)
            .await
            .unwrap();

        let surviving = ca.has_valid_certificate("alice-key").await.unwrap();
        assert_eq!(surviving.serial_number, first.certificate.serial_number);

        ca.revoke_certificate(&first.certificate.serial_number, "rotation test", None)
            .await
            .unwrap();
        assert!(ca.has_valid_certificate("alice-key").await.is_none());
    }

    #[tokio::test]
    async fn test_serial_uniqueness() {
        let mut ca = create_test_authority().await;
        let mut serials = HashSet::new();

        for i in 0..10_000 {
            let issued = ca
                .issue_certificate(CertificateRequest::new(
                    format!("subject-{i}"),
                    operator_profile("Load"),
                ))
                .await
                .unwrap();
            serials.insert(issued.certificate.serial_number);
        }

        assert_eq!(serials.len(), 10_000);
    }
}
