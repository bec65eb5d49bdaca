//! Identity gate: the mandatory verification choke-point.
//!
//! Every privileged operation (tool execution, inference, data access,
//! message decryption) passes through [`IdentityGate::verify_identity`]
//! first. Results are cached per serial with asymmetric TTLs so revocation
//! becomes effective quickly while repeat successes stay cheap, and
//! revocation events evict their cache entries eagerly.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use palisade_core::config::GateSection;
use palisade_core::now_ms;
use palisade_crypto::{Signer, SignerHandle, PROTOCOL_CERTIFICATE};

use crate::certificate::{Certificate, VerifyFailure};
use crate::revocation::{RevocationChecker, RevocationHandle};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Access denied for {operation}: {failure}")]
    AccessDenied {
        operation: String,
        failure: VerifyFailure,
    },
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Cache TTL for successful verifications (ms)
    pub success_ttl_ms: u64,
    /// Cache TTL for failed verifications (ms), shorter so revocation bites fast
    pub failure_ttl_ms: u64,
    /// When false, unregistered keys pass as explicitly unverified (dev mode)
    pub require_certificate: bool,
    /// Timeout for signing-capability calls (ms)
    pub capability_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            success_ttl_ms: 60_000,
            failure_ttl_ms: 10_000,
            require_certificate: true,
            capability_timeout_ms: 5_000,
        }
    }
}

impl From<GateSection> for GateConfig {
    fn from(section: GateSection) -> Self {
        Self {
            success_ttl_ms: section.success_ttl_ms,
            failure_ttl_ms: section.failure_ttl_ms,
            require_certificate: section.require_certificate,
            capability_timeout_ms: section.capability_timeout_ms,
        }
    }
}

/// How an identity passed the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationKind {
    /// Backed by a verified certificate
    Certified,
    /// Dev-mode passthrough with no certificate
    Unverified,
}

/// Result of an identity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub identity_key: String,
    pub serial_number: Option<String>,
    pub kind: VerificationKind,
    pub failure: Option<VerifyFailure>,
}

impl VerificationOutcome {
    fn certified(certificate: &Certificate) -> Self {
        Self {
            verified: true,
            identity_key: certificate.subject.clone(),
            serial_number: Some(certificate.serial_number.clone()),
            kind: VerificationKind::Certified,
            failure: None,
        }
    }

    fn unverified(public_key: &str) -> Self {
        Self {
            verified: true,
            identity_key: public_key.to_string(),
            serial_number: None,
            kind: VerificationKind::Unverified,
            failure: None,
        }
    }

    fn denied(
        identity_key: &str,
        serial_number: Option<String>,
        failure: VerifyFailure,
    ) -> Self {
        Self {
            verified: false,
            identity_key: identity_key.to_string(),
            serial_number,
            kind: VerificationKind::Certified,
            failure: Some(failure),
        }
    }
}

struct CacheEntry {
    outcome: VerificationOutcome,
    certifier: String,
    expires_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateMetrics {
    pub verifications_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub denials_total: u64,
}

/// Verification choke-point with trusted-certifier registry, revocation
/// state, and a TTL-bounded result cache keyed by serial number.
pub struct IdentityGate {
    signer: SignerHandle,
    revocations: RevocationHandle,
    config: GateConfig,
    trusted_certifiers: Arc<RwLock<HashSet<String>>>,
    registered: Arc<RwLock<HashMap<String, Certificate>>>,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    revoked_overlay: Arc<RwLock<HashSet<String>>>,
    metrics: Arc<RwLock<GateMetrics>>,
}

impl IdentityGate {
    /// Builds the gate and subscribes to the revocation capability so
    /// revocation events evict cache entries immediately.
    pub fn new(signer: SignerHandle, revocations: RevocationHandle, config: GateConfig) -> Self {
        let cache: Arc<RwLock<HashMap<String, CacheEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let revoked_overlay: Arc<RwLock<HashSet<String>>> =
            Arc::new(RwLock::new(HashSet::new()));

        {
            let cache = Arc::clone(&cache);
            let overlay = Arc::clone(&revoked_overlay);
            revocations.subscribe_to_revocation(Box::new(move |serial| {
                overlay.write().unwrap().insert(serial.to_string());
                cache.write().unwrap().remove(serial);
                debug!(serial, "Revocation event evicted cached verification");
            }));
        }

        Self {
            signer,
            revocations,
            config,
            trusted_certifiers: Arc::new(RwLock::new(HashSet::new())),
            registered: Arc::new(RwLock::new(HashMap::new())),
            cache,
            revoked_overlay,
            metrics: Arc::new(RwLock::new(GateMetrics::default())),
        }
    }

    pub fn add_trusted_certifier(&self, certifier: impl Into<String>) {
        let certifier = certifier.into();
        info!(certifier = %certifier, "Trusted certifier added");
        self.trusted_certifiers.write().unwrap().insert(certifier);
    }

    /// Removes a certifier from the trusted set and evicts every cached
    /// result that was rooted in it.
    pub fn remove_trusted_certifier(&self, certifier: &str) {
        self.trusted_certifiers.write().unwrap().remove(certifier);
        self.cache
            .write()
            .unwrap()
            .retain(|_, entry| entry.certifier != certifier);
        info!(certifier, "Trusted certifier removed");
    }

    /// Registers a certificate for public-key lookups.
    pub fn register_certificate(&self, certificate: Certificate) {
        info!(
            subject = %certificate.subject,
            serial = %certificate.serial_number,
            "Certificate registered"
        );
        self.registered
            .write()
            .unwrap()
            .insert(certificate.subject.clone(), certificate);
    }

    /// Applies an externally delivered revocation batch idempotently,
    /// evicting cache entries for the named serials. Returns how many
    /// serials were new.
    pub fn sync_revocation_list(&self, serials: &[String]) -> usize {
        let mut applied = 0;
        {
            let mut overlay = self.revoked_overlay.write().unwrap();
            let mut cache = self.cache.write().unwrap();
            for serial in serials {
                if overlay.insert(serial.clone()) {
                    applied += 1;
                }
                cache.remove(serial);
            }
        }
        if applied > 0 {
            info!(applied, "Applied synced revocations");
        }
        applied
    }

    /// Verifies a certificate, serving from the cache when a live entry
    /// exists. Checks run cheapest-first: trusted certifier, revocation,
    /// validity window, then the signature.
    pub async fn verify_identity(&self, certificate: &Certificate) -> VerificationOutcome {
        let now = now_ms();
        self.metrics.write().unwrap().verifications_total += 1;

        let cached = {
            let cache = self.cache.read().unwrap();
            cache
                .get(&certificate.serial_number)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.outcome.clone())
        };
        if let Some(outcome) = cached {
            self.metrics.write().unwrap().cache_hits_total += 1;
            debug!(serial = %certificate.serial_number, "Verification cache hit");
            return outcome;
        }
        self.metrics.write().unwrap().cache_misses_total += 1;

        let outcome = self.check_certificate(certificate, now).await;

        let ttl = if outcome.verified {
            self.config.success_ttl_ms
        } else {
            self.config.failure_ttl_ms
        };
        self.cache.write().unwrap().insert(
            certificate.serial_number.clone(),
            CacheEntry {
                outcome: outcome.clone(),
                certifier: certificate.certifier.clone(),
                expires_at: now + ttl,
            },
        );

        if !outcome.verified {
            self.metrics.write().unwrap().denials_total += 1;
            if let Some(failure) = &outcome.failure {
                warn!(
                    serial = %certificate.serial_number,
                    %failure,
                    "Identity verification denied"
                );
            }
        }

        outcome
    }

    /// Looks up the registered certificate for a key and verifies it. With
    /// `require_certificate` off, unregistered keys pass as explicitly
    /// unverified; that escape hatch must stay disabled in production.
    pub async fn verify_by_public_key(&self, public_key: &str) -> VerificationOutcome {
        let registered = self.registered.read().unwrap().get(public_key).cloned();
        match registered {
            Some(certificate) => self.verify_identity(&certificate).await,
            None if !self.config.require_certificate => {
                debug!(public_key, "No certificate registered; passing as unverified");
                VerificationOutcome::unverified(public_key)
            }
            None => {
                self.metrics.write().unwrap().denials_total += 1;
                warn!(public_key, "No certificate registered; denied");
                VerificationOutcome::denied(
                    public_key,
                    None,
                    VerifyFailure::CertificateMissing {
                        public_key: public_key.to_string(),
                    },
                )
            }
        }
    }

    /// Verifies, then runs the operation; the operation never starts when
    /// verification fails.
    pub async fn gated_operation<T, F, Fut>(
        &self,
        certificate: &Certificate,
        operation_name: &str,
        operation: F,
    ) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = self.verify_identity(certificate).await;
        if !outcome.verified {
            let failure = outcome.failure.unwrap_or(VerifyFailure::InvalidSignature);
            warn!(operation = operation_name, %failure, "Gated operation denied");
            return Err(GateError::AccessDenied {
                operation: operation_name.to_string(),
                failure,
            });
        }

        debug!(
            operation = operation_name,
            identity = %outcome.identity_key,
            "Gated operation permitted"
        );
        Ok(operation().await)
    }

    async fn check_certificate(&self, certificate: &Certificate, now: u64) -> VerificationOutcome {
        let serial = certificate.serial_number.clone();

        if !self
            .trusted_certifiers
            .read()
            .unwrap()
            .contains(&certificate.certifier)
        {
            return VerificationOutcome::denied(
                &certificate.subject,
                Some(serial),
                VerifyFailure::UntrustedCertifier {
                    certifier: certificate.certifier.clone(),
                },
            );
        }

        // Locally synced revocations first, then the injected checker, which
        // carries its own lookup timeout.
        if self.revoked_overlay.read().unwrap().contains(&serial) {
            return VerificationOutcome::denied(
                &certificate.subject,
                Some(serial.clone()),
                VerifyFailure::CertificateRevoked { serial },
            );
        }
        match self.revocations.is_revoked(certificate).await {
            Ok(false) => {}
            Ok(true) => {
                self.revoked_overlay.write().unwrap().insert(serial.clone());
                return VerificationOutcome::denied(
                    &certificate.subject,
                    Some(serial.clone()),
                    VerifyFailure::CertificateRevoked { serial },
                );
            }
            // Fail closed when revocation state cannot be established.
            Err(err) => {
                return VerificationOutcome::denied(
                    &certificate.subject,
                    Some(serial),
                    VerifyFailure::CapabilityUnavailable {
                        reason: err.to_string(),
                    },
                )
            }
        }

        if certificate.is_not_yet_valid(now) {
            return VerificationOutcome::denied(
                &certificate.subject,
                Some(serial.clone()),
                VerifyFailure::CertificateNotYetValid {
                    serial,
                    valid_from: certificate.fields.valid_from,
                },
            );
        }
        if certificate.is_expired(now) {
            return VerificationOutcome::denied(
                &certificate.subject,
                Some(serial.clone()),
                VerifyFailure::CertificateExpired {
                    serial,
                    valid_until: certificate.fields.valid_until,
                },
            );
        }

        let payload = match certificate.signing_payload() {
            Ok(payload) => payload,
            Err(err) => {
                return VerificationOutcome::denied(
                    &certificate.subject,
                    Some(serial),
                    VerifyFailure::CapabilityUnavailable {
                        reason: err.to_string(),
                    },
                )
            }
        };
        let signature = match hex::decode(&certificate.signature) {
            Ok(signature) => signature,
            Err(_) => {
                return VerificationOutcome::denied(
                    &certificate.subject,
                    Some(serial),
                    VerifyFailure::InvalidSignature,
                )
            }
        };

        let verify_call = self.signer.verify(
            &payload,
            &signature,
            PROTOCOL_CERTIFICATE,
            &certificate.serial_number,
            Some(&certificate.subject),
        );
        match timeout(
            Duration::from_millis(self.config.capability_timeout_ms),
            verify_call,
        )
        .await
        {
            Ok(Ok(true)) => VerificationOutcome::certified(certificate),
            Ok(Ok(false)) => VerificationOutcome::denied(
                &certificate.subject,
                Some(serial),
                VerifyFailure::InvalidSignature,
            ),
            Ok(Err(err)) => VerificationOutcome::denied(
                &certificate.subject,
                Some(serial),
                VerifyFailure::CapabilityUnavailable {
                    reason: err.to_string(),
                },
            ),
            Err(_) => VerificationOutcome::denied(
                &certificate.subject,
                Some(serial),
                VerifyFailure::CapabilityUnavailable {
                    reason: format!(
                        "signature check timed out after {}ms",
                        self.config.capability_timeout_ms
                    ),
                },
            ),
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    pub fn metrics(&self) -> GateMetrics {
        self.metrics.read().unwrap().clone()
    }
}
