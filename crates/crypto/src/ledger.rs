//! External ledger capability.
//!
//! The trust layer publishes commitments (audit anchors, session roots,
//! revocation notices) to an append-only external ledger and looks up
//! revocation outpoints on it. Both operations go through `LedgerClient`;
//! the concrete backing chain is out of scope here.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use palisade_core::{hash_hex, now_ms};

/// Errors raised by a ledger capability.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Publish failed: {reason}")]
    PublishFailed { reason: String },

    #[error("Outpoint lookup failed: {reason}")]
    LookupFailed { reason: String },

    #[error("Ledger unavailable: {reason}")]
    Unavailable { reason: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger capability consumed by the trust layer.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Publishes opaque commitment bytes and returns the transaction id.
    async fn publish(&self, commitment: &[u8]) -> LedgerResult<String>;

    /// Returns whether a revocation outpoint (`txid:vout`) has been spent.
    async fn is_outpoint_spent(&self, outpoint: &str) -> LedgerResult<bool>;
}

/// Shared handle to a ledger capability.
pub type LedgerHandle = Arc<dyn LedgerClient>;

/// A commitment recorded by the in-memory ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub tx_id: String,
    pub commitment: Vec<u8>,
    pub published_at: u64,
}

/// In-memory ledger for development and tests.
///
/// Outpoints are marked spent by the test harness to simulate on-chain
/// revocation; `set_offline` simulates an outage so propagation and anchor
/// retry paths can be exercised.
pub struct MemoryLedger {
    publications: RwLock<Vec<Publication>>,
    spent_outpoints: RwLock<HashSet<String>>,
    offline: AtomicBool,
    next_tx: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            publications: RwLock::new(Vec::new()),
            spent_outpoints: RwLock::new(HashSet::new()),
            offline: AtomicBool::new(false),
            next_tx: AtomicU64::new(0),
        }
    }

    /// Marks an outpoint as spent, as an on-chain revocation would.
    pub fn mark_outpoint_spent(&self, outpoint: &str) {
        self.spent_outpoints
            .write()
            .unwrap()
            .insert(outpoint.to_string());
    }

    /// Toggles simulated unavailability.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn publication_count(&self) -> usize {
        self.publications.read().unwrap().len()
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.publications.read().unwrap().clone()
    }

    pub fn latest_publication(&self) -> Option<Publication> {
        self.publications.read().unwrap().last().cloned()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn publish(&self, commitment: &[u8]) -> LedgerResult<String> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                reason: "ledger offline".to_string(),
            });
        }

        let seq = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let digest = hash_hex(commitment);
        let tx_id = format!("memtx-{:08x}-{}", seq, &digest[..16]);

        self.publications.write().unwrap().push(Publication {
            tx_id: tx_id.clone(),
            commitment: commitment.to_vec(),
            published_at: now_ms(),
        });

        Ok(tx_id)
    }

    async fn is_outpoint_spent(&self, outpoint: &str) -> LedgerResult<bool> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                reason: "ledger offline".to_string(),
            });
        }

        Ok(self.spent_outpoints.read().unwrap().contains(outpoint))
    }
}
