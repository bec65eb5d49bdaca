//! Revocation checking as a swappable capability.
//!
//! Verification logic depends only on `RevocationChecker`, so the mechanism
//! behind it (a locally synced list, a ledger outpoint-spent lookup) can
//! change without touching the gate.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};

use palisade_crypto::{LedgerClient, LedgerHandle};

use crate::certificate::Certificate;

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("Revocation lookup failed: {reason}")]
    LookupFailed { reason: String },
}

pub type RevocationResult<T> = Result<T, RevocationError>;

/// Callback invoked with a serial number when a revocation is observed.
pub type RevocationListener = Box<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait RevocationChecker: Send + Sync {
    /// Returns whether the certificate has been revoked.
    async fn is_revoked(&self, certificate: &Certificate) -> RevocationResult<bool>;

    /// Checks a batch of certificates, preserving order.
    async fn batch_check_revocations(
        &self,
        certificates: &[Certificate],
    ) -> RevocationResult<Vec<bool>> {
        let mut results = Vec::with_capacity(certificates.len());
        for certificate in certificates {
            results.push(self.is_revoked(certificate).await?);
        }
        Ok(results)
    }

    /// Registers a listener notified when this checker observes a new
    /// revocation. Checkers without a push channel may ignore this.
    fn subscribe_to_revocation(&self, listener: RevocationListener);
}

/// Shared handle to a revocation capability.
pub type RevocationHandle = Arc<dyn RevocationChecker>;

/// Serial-number revocation list fed by local revocations and external sync.
pub struct InMemoryRevocationList {
    revoked: RwLock<HashSet<String>>,
    listeners: RwLock<Vec<RevocationListener>>,
}

impl InMemoryRevocationList {
    pub fn new() -> Self {
        Self {
            revoked: RwLock::new(HashSet::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Marks a serial revoked and notifies listeners. Returns true when the
    /// serial was newly added.
    pub fn revoke_serial(&self, serial: &str) -> bool {
        let newly_added = self.revoked.write().unwrap().insert(serial.to_string());
        if newly_added {
            info!(serial, "Serial added to revocation list");
            for listener in self.listeners.read().unwrap().iter() {
                listener(serial);
            }
        }
        newly_added
    }

    /// Applies an externally delivered revocation batch. Idempotent; returns
    /// how many serials were new.
    pub fn sync_revocation_list(&self, serials: &[String]) -> usize {
        serials
            .iter()
            .filter(|serial| self.revoke_serial(serial))
            .count()
    }

    pub fn is_serial_revoked(&self, serial: &str) -> bool {
        self.revoked.read().unwrap().contains(serial)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.read().unwrap().len()
    }
}

impl Default for InMemoryRevocationList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevocationChecker for InMemoryRevocationList {
    async fn is_revoked(&self, certificate: &Certificate) -> RevocationResult<bool> {
        Ok(self.is_serial_revoked(&certificate.serial_number))
    }

    fn subscribe_to_revocation(&self, listener: RevocationListener) {
        self.listeners.write().unwrap().push(listener);
    }
}

/// Revocation-by-spend: a certificate is revoked once its revocation
/// outpoint has been spent on the external ledger.
pub struct OutpointRevocationChecker {
    ledger: LedgerHandle,
    lookup_timeout: Duration,
}

impl OutpointRevocationChecker {
    pub fn new(ledger: LedgerHandle) -> Self {
        Self {
            ledger,
            lookup_timeout: Duration::from_millis(5_000),
        }
    }

    pub fn with_lookup_timeout(mut self, timeout_ms: u64) -> Self {
        self.lookup_timeout = Duration::from_millis(timeout_ms);
        self
    }
}

#[async_trait]
impl RevocationChecker for OutpointRevocationChecker {
    async fn is_revoked(&self, certificate: &Certificate) -> RevocationResult<bool> {
        match timeout(
            self.lookup_timeout,
            self.ledger
                .is_outpoint_spent(&certificate.revocation_outpoint),
        )
        .await
        {
            Ok(Ok(spent)) => Ok(spent),
            Ok(Err(err)) => Err(RevocationError::LookupFailed {
                reason: err.to_string(),
            }),
            Err(_) => Err(RevocationError::LookupFailed {
                reason: format!(
                    "outpoint lookup timed out after {}ms",
                    self.lookup_timeout.as_millis()
                ),
            }),
        }
    }

    fn subscribe_to_revocation(&self, _listener: RevocationListener) {
        // Spend-based revocation has no push channel; state is observed per lookup.
        debug!("Outpoint revocation checker ignores subscription");
    }
}
