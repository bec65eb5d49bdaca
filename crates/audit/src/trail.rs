//! Signed, hash-chained audit trail with periodic external anchoring.
//!
//! Every agent action is recorded as a signed entry referencing the hash of
//! its predecessor. Sensitive content (user keys, inputs, outputs) is
//! hashed before it enters an entry, so the trail proves chain-of-custody
//! without retaining payloads. Every `anchor_interval` entries, a Merkle
//! root over the hashes since the last anchor is published externally,
//! bounding tamper-evidence cost to O(log n) external writes.
//!
//! # Security Model
//!
//! - `previousEntryHash` is part of the signed payload, so one signature
//!   attests to the entry and the entire prefix before it
//! - Verification reports every violation found, not just the first
//! - An imported chain is re-verified before it replaces local state
//! - A failed anchor leaves the pending range in place for retry; local
//!   appends never depend on external availability

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use palisade_core::config::AuditSection;
use palisade_core::{
    hash_bytes, hash_hex, now_ms, parse_hash_hex, sort_json_value, to_canonical_vec,
    CanonicalError, Hash32, GENESIS_HASH,
};
use palisade_crypto::{LedgerClient, LedgerHandle, Signer, SignerHandle, PROTOCOL_AUDIT};

use crate::merkle::{merkle_root, MerkleError};

const ENTRY_ID_SUFFIX_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Signing capability failed: {reason}")]
    SigningFailed { reason: String },

    #[error("Capability call exceeded {timeout_ms}ms")]
    CapabilityTimeout { timeout_ms: u64 },

    #[error("Anchor publish failed: {reason}")]
    AnchorFailed { reason: String },

    #[error("Chain import rejected: {} violation(s) found", .report.violations.len())]
    ChainImportInvalid { report: ChainVerification },

    #[error("Export parse failed: {reason}")]
    ExportParse { reason: String },

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// An action to be recorded. Raw input/output bytes are hashed at append
/// time and never stored.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: String,
    pub user_public_key: String,
    pub input: Option<Vec<u8>>,
    pub output: Option<Vec<u8>>,
    pub metadata: BTreeMap<String, Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, user_public_key: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            user_public_key: user_public_key.into(),
            input: None,
            output: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One immutable link of the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entry_id: String,
    pub timestamp: u64,
    pub action: String,
    pub user_public_key_hash: String,
    pub agent_public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    /// Hash of the full prior entry; genesis hash for the first entry
    pub previous_entry_hash: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Agent signature over the canonical entry minus this field (hex)
    pub signature: String,
}

impl AuditEntry {
    /// Canonical bytes the agent signs: every field except `signature`,
    /// keys recursively sorted.
    pub fn signing_payload(&self) -> AuditResult<Vec<u8>> {
        let mut value = serde_json::to_value(self).map_err(|e| CanonicalError::Serialization {
            reason: e.to_string(),
        })?;
        if let Value::Object(ref mut map) = value {
            map.remove("signature");
        }
        let sorted = sort_json_value(value);
        Ok(
            serde_json::to_vec(&sorted).map_err(|e| CanonicalError::Serialization {
                reason: e.to_string(),
            })?,
        )
    }

    /// Hash of the full entry including its signature; the next entry
    /// links to this value.
    pub fn entry_hash(&self) -> AuditResult<Hash32> {
        Ok(hash_bytes(&to_canonical_vec(self)?))
    }
}

/// External checkpoint committing a Merkle root over a contiguous range of
/// entry hashes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainAnchor {
    pub tx_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    pub timestamp: u64,
    pub merkle_root: String,
    pub entry_hashes: Vec<String>,
    pub head_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    LinkageBroken,
    SignatureInvalid,
    HeadMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainViolation {
    pub index: usize,
    pub kind: ViolationKind,
    pub detail: String,
}

/// Full verification report; `violations` lists every defect found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    pub entries_verified: usize,
    pub violations: Vec<ChainViolation>,
}

/// Lossless export shape; any persistence layer must round-trip through
/// this for `verify_chain` to remain meaningful after reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrailExport {
    pub entries: Vec<AuditEntry>,
    pub head_hash: String,
    pub blockchain_anchors: Vec<BlockchainAnchor>,
}

#[derive(Debug, Clone)]
pub struct TrailConfig {
    /// Entries between automatic anchors
    pub anchor_interval: usize,
    /// Timeout for signing and ledger calls (ms)
    pub capability_timeout_ms: u64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            anchor_interval: 100,
            capability_timeout_ms: 5_000,
        }
    }
}

impl From<AuditSection> for TrailConfig {
    fn from(section: AuditSection) -> Self {
        Self {
            anchor_interval: section.anchor_interval,
            capability_timeout_ms: section.capability_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrailMetrics {
    pub entries_appended_total: u64,
    pub anchors_published_total: u64,
    pub anchor_failures_total: u64,
}

struct TrailState {
    entries: Vec<AuditEntry>,
    head_hash: Hash32,
    /// Entry hashes appended since the last successful anchor
    pending_hashes: Vec<Hash32>,
    anchors: Vec<BlockchainAnchor>,
    metrics: TrailMetrics,
}

/// Append-only signed audit chain with one head per agent.
///
/// Chain state lives behind a `tokio::sync::Mutex` held across the signing
/// await: concurrent appends from the same agent must serialize, because
/// each entry embeds the head the previous append produced.
pub struct SignedAuditTrail {
    signer: SignerHandle,
    ledger: Option<LedgerHandle>,
    config: TrailConfig,
    agent_public_key: String,
    state: Mutex<TrailState>,
}

impl SignedAuditTrail {
    /// Creates a trail whose agent key comes from the signing capability.
    pub async fn new(signer: SignerHandle, config: TrailConfig) -> AuditResult<Self> {
        let agent_public_key = match timeout(
            Duration::from_millis(config.capability_timeout_ms),
            signer.identity_key(),
        )
        .await
        {
            Ok(Ok(key)) => key,
            Ok(Err(err)) => {
                return Err(AuditError::SigningFailed {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(AuditError::CapabilityTimeout {
                    timeout_ms: config.capability_timeout_ms,
                })
            }
        };

        info!(agent = %agent_public_key, "Audit trail initialized");

        Ok(Self {
            signer,
            ledger: None,
            config,
            agent_public_key,
            state: Mutex::new(TrailState {
                entries: Vec::new(),
                head_hash: GENESIS_HASH,
                pending_hashes: Vec::new(),
                anchors: Vec::new(),
                metrics: TrailMetrics::default(),
            }),
        })
    }

    /// Attaches a ledger; without one, anchoring is disabled.
    pub fn with_ledger(mut self, ledger: LedgerHandle) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn agent_public_key(&self) -> &str {
        &self.agent_public_key
    }

    /// Hashes the event content, signs the canonical entry, appends it, and
    /// advances the head. Triggers an automatic anchor when the pending
    /// range reaches `anchor_interval`; an anchor failure is logged and the
    /// range retained, never an append failure.
    pub async fn create_entry(&self, event: AuditEvent) -> AuditResult<AuditEntry> {
        let mut state = self.state.lock().await;
        let now = now_ms();

        let mut entry = AuditEntry {
            entry_id: generate_entry_id(now),
            timestamp: now,
            action: event.action,
            user_public_key_hash: hash_hex(event.user_public_key.as_bytes()),
            agent_public_key: self.agent_public_key.clone(),
            input_hash: event.input.as_deref().map(hash_hex),
            output_hash: event.output.as_deref().map(hash_hex),
            previous_entry_hash: hex::encode(state.head_hash),
            metadata: event.metadata,
            signature: String::new(),
        };

        let payload = entry.signing_payload()?;
        let signature = match timeout(
            Duration::from_millis(self.config.capability_timeout_ms),
            self.signer
                .sign(&payload, PROTOCOL_AUDIT, &entry.entry_id, None),
        )
        .await
        {
            Ok(Ok(signature)) => signature,
            Ok(Err(err)) => {
                return Err(AuditError::SigningFailed {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(AuditError::CapabilityTimeout {
                    timeout_ms: self.config.capability_timeout_ms,
                })
            }
        };
        entry.signature = hex::encode(signature);

        let entry_hash = entry.entry_hash()?;
        state.entries.push(entry.clone());
        state.head_hash = entry_hash;
        state.pending_hashes.push(entry_hash);
        state.metrics.entries_appended_total += 1;
        debug!(entry_id = %entry.entry_id, action = %entry.action, "Audit entry appended");

        if self.ledger.is_some() && state.pending_hashes.len() >= self.config.anchor_interval {
            if let Err(err) = self.anchor_locked(&mut state).await {
                state.metrics.anchor_failures_total += 1;
                warn!(error = %err, "Automatic anchor failed; range retained for retry");
            }
        }

        Ok(entry)
    }

    /// Publishes a Merkle commitment over the pending range. Returns `None`
    /// when there is nothing to anchor or no ledger is attached.
    pub async fn anchor_to_blockchain(&self) -> AuditResult<Option<BlockchainAnchor>> {
        let mut state = self.state.lock().await;
        match self.anchor_locked(&mut state).await {
            Ok(anchor) => Ok(anchor),
            Err(err) => {
                state.metrics.anchor_failures_total += 1;
                Err(err)
            }
        }
    }

    async fn anchor_locked(&self, state: &mut TrailState) -> AuditResult<Option<BlockchainAnchor>> {
        let Some(ledger) = &self.ledger else {
            return Ok(None);
        };
        if state.pending_hashes.is_empty() {
            return Ok(None);
        }

        let root = merkle_root(&state.pending_hashes)?;
        let commitment = serde_json::json!({
            "merkleRoot": hex::encode(root),
            "entryCount": state.pending_hashes.len(),
            "headHash": hex::encode(state.head_hash),
            "timestamp": now_ms(),
        });
        let bytes = to_canonical_vec(&commitment)?;

        let tx_id = match timeout(
            Duration::from_millis(self.config.capability_timeout_ms),
            ledger.publish(&bytes),
        )
        .await
        {
            Ok(Ok(tx_id)) => tx_id,
            Ok(Err(err)) => {
                return Err(AuditError::AnchorFailed {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(AuditError::CapabilityTimeout {
                    timeout_ms: self.config.capability_timeout_ms,
                })
            }
        };

        let anchor = BlockchainAnchor {
            tx_id,
            block_height: None,
            timestamp: now_ms(),
            merkle_root: hex::encode(root),
            entry_hashes: state.pending_hashes.iter().map(hex::encode).collect(),
            head_hash: hex::encode(state.head_hash),
        };
        state.anchors.push(anchor.clone());
        state.pending_hashes.clear();
        state.metrics.anchors_published_total += 1;

        info!(
            tx_id = %anchor.tx_id,
            entries = anchor.entry_hashes.len(),
            "Audit range anchored"
        );
        Ok(Some(anchor))
    }

    /// Re-derives one entry's signed payload and checks its signature.
    pub async fn verify_entry(&self, entry: &AuditEntry) -> AuditResult<bool> {
        verify_entry(
            self.signer.as_ref(),
            entry,
            self.config.capability_timeout_ms,
        )
        .await
    }

    /// Verifies signatures and linkage end-to-end against the stored head.
    pub async fn verify_chain(&self) -> AuditResult<ChainVerification> {
        let (entries, head) = {
            let state = self.state.lock().await;
            (state.entries.clone(), state.head_hash)
        };
        verify_entries(
            self.signer.as_ref(),
            &entries,
            &head,
            self.config.capability_timeout_ms,
        )
        .await
    }

    pub async fn export_to_json(&self) -> AuditResult<String> {
        let state = self.state.lock().await;
        let export = TrailExport {
            entries: state.entries.clone(),
            head_hash: hex::encode(state.head_hash),
            blockchain_anchors: state.anchors.clone(),
        };
        serde_json::to_string_pretty(&export).map_err(|e| {
            CanonicalError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Re-verifies an exported chain and atomically replaces local state
    /// with it. Any violation rejects the whole import.
    pub async fn import_from_json(&self, json: &str) -> AuditResult<ChainVerification> {
        let export: TrailExport =
            serde_json::from_str(json).map_err(|e| AuditError::ExportParse {
                reason: e.to_string(),
            })?;
        let expected_head =
            parse_hash_hex(&export.head_hash).ok_or_else(|| AuditError::ExportParse {
                reason: "headHash is not a 32-byte hex hash".to_string(),
            })?;

        let report = verify_entries(
            self.signer.as_ref(),
            &export.entries,
            &expected_head,
            self.config.capability_timeout_ms,
        )
        .await?;
        if !report.valid {
            warn!(
                violations = report.violations.len(),
                "Rejected audit chain import"
            );
            return Err(AuditError::ChainImportInvalid { report });
        }

        // The pending range is the suffix not covered by imported anchors.
        let anchored: usize = export
            .blockchain_anchors
            .iter()
            .map(|anchor| anchor.entry_hashes.len())
            .sum();
        let mut pending = Vec::new();
        for entry in export.entries.iter().skip(anchored) {
            pending.push(entry.entry_hash()?);
        }

        let mut state = self.state.lock().await;
        state.entries = export.entries;
        state.head_hash = expected_head;
        state.anchors = export.blockchain_anchors;
        state.pending_hashes = pending;
        info!(entries = state.entries.len(), "Audit chain imported");

        Ok(report)
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn head_hash(&self) -> String {
        hex::encode(self.state.lock().await.head_hash)
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.entries.clone()
    }

    pub async fn anchors(&self) -> Vec<BlockchainAnchor> {
        self.state.lock().await.anchors.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending_hashes.len()
    }

    pub async fn metrics(&self) -> TrailMetrics {
        self.state.lock().await.metrics.clone()
    }
}

/// Checks one entry's signature against its canonical payload. `Ok(false)`
/// means the entry does not verify; `Err` is reserved for capability
/// failure.
pub async fn verify_entry(
    signer: &dyn Signer,
    entry: &AuditEntry,
    timeout_ms: u64,
) -> AuditResult<bool> {
    let payload = entry.signing_payload()?;
    let signature = match hex::decode(&entry.signature) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };

    match timeout(
        Duration::from_millis(timeout_ms),
        signer.verify(&payload, &signature, PROTOCOL_AUDIT, &entry.entry_id, None),
    )
    .await
    {
        Ok(Ok(verified)) => Ok(verified),
        Ok(Err(err)) => Err(AuditError::SigningFailed {
            reason: err.to_string(),
        }),
        Err(_) => Err(AuditError::CapabilityTimeout { timeout_ms }),
    }
}

/// Verifies a chain end-to-end: per-entry signatures, `previousEntryHash`
/// linkage, and the stored head. Reports every violation found.
///
/// A violated entry makes its successor's expected predecessor hash
/// unknowable, so the next linkage check resynchronizes on that entry's own
/// declared state instead of reporting a cascading violation. An entry
/// whose linkage is broken skips its signature check.
pub async fn verify_entries(
    signer: &dyn Signer,
    entries: &[AuditEntry],
    expected_head: &Hash32,
    timeout_ms: u64,
) -> AuditResult<ChainVerification> {
    let mut violations = Vec::new();
    let mut expected_prev = hex::encode(GENESIS_HASH);
    let mut running_head = GENESIS_HASH;
    let mut resync = false;
    let mut entries_verified = 0;

    for (index, entry) in entries.iter().enumerate() {
        let mut violated = false;

        if !resync && entry.previous_entry_hash != expected_prev {
            violations.push(ChainViolation {
                index,
                kind: ViolationKind::LinkageBroken,
                detail: format!(
                    "previousEntryHash {} does not match predecessor hash {}",
                    entry.previous_entry_hash, expected_prev
                ),
            });
            violated = true;
        }

        if !violated {
            match verify_entry(signer, entry, timeout_ms).await {
                Ok(true) => {}
                Ok(false) => {
                    violations.push(ChainViolation {
                        index,
                        kind: ViolationKind::SignatureInvalid,
                        detail: "signature does not verify over canonical entry content"
                            .to_string(),
                    });
                    violated = true;
                }
                Err(AuditError::Canonical(err)) => {
                    violations.push(ChainViolation {
                        index,
                        kind: ViolationKind::SignatureInvalid,
                        detail: format!("entry could not be canonicalized: {err}"),
                    });
                    violated = true;
                }
                Err(err) => return Err(err),
            }
        }

        match entry.entry_hash() {
            Ok(hash) => {
                expected_prev = hex::encode(hash);
                running_head = hash;
                resync = violated;
            }
            Err(_) => {
                resync = true;
            }
        }

        if !violated {
            entries_verified += 1;
        }
    }

    if running_head != *expected_head {
        violations.push(ChainViolation {
            index: entries.len().saturating_sub(1),
            kind: ViolationKind::HeadMismatch,
            detail: format!(
                "recomputed head {} does not match stored head {}",
                hex::encode(running_head),
                hex::encode(expected_head)
            ),
        });
    }

    Ok(ChainVerification {
        valid: violations.is_empty(),
        entries_verified,
        violations,
    })
}

fn generate_entry_id(now: u64) -> String {
    let mut suffix = [0u8; ENTRY_ID_SUFFIX_BYTES];
    OsRng.fill_bytes(&mut suffix);
    format!("{}-{}", now, hex::encode(suffix))
}
