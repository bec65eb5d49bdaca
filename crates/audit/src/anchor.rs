//! Per-session anchor chains with a single Merkle commitment.
//!
//! Where the audit trail is one long-lived chain per agent, an anchor
//! chain is scoped to a single session: each notable step (session start,
//! tool use, memory write, payment, session end) appends a hash-linked
//! anchor point, and at session close the whole chain is committed
//! externally as one Merkle root. An auditor holding the serialized chain
//! can recompute the root and compare it against the published value.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::info;

use palisade_core::{
    hash_bytes, hash_hex, now_ms, to_canonical_vec, CanonicalError, Hash32, GENESIS_HASH,
};
use palisade_crypto::{LedgerClient, LedgerHandle};

use crate::merkle::{merkle_root, MerkleError};
use crate::trail::{ChainVerification, ChainViolation, ViolationKind};

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("Session {session_id} is already committed")]
    AlreadyCommitted { session_id: String },

    #[error("Anchor chain is empty")]
    EmptyChain,

    #[error("Commit publish failed: {reason}")]
    CommitFailed { reason: String },

    #[error("Capability call exceeded {timeout_ms}ms")]
    CapabilityTimeout { timeout_ms: u64 },

    #[error("Anchor chain parse failed: {reason}")]
    Parse { reason: String },

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

pub type AnchorResult<T> = Result<T, AnchorError>;

/// Category of session event an anchor records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnchorType {
    SessionStart,
    ToolUse,
    MemoryWrite,
    Payment,
    SessionEnd,
}

impl fmt::Display for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnchorType::SessionStart => "session_start",
            AnchorType::ToolUse => "tool_use",
            AnchorType::MemoryWrite => "memory_write",
            AnchorType::Payment => "payment",
            AnchorType::SessionEnd => "session_end",
        };
        write!(f, "{name}")
    }
}

/// One hash-linked step in a session. Event data is hashed before it is
/// recorded; only the short human-readable summary is kept in the clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPoint {
    #[serde(rename = "type")]
    pub anchor_type: AnchorType,
    pub timestamp: u64,
    pub data_hash: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Record hash of the prior anchor; genesis hash for the first
    pub previous_hash: String,
}

impl AnchorPoint {
    /// Hash of the canonical full record; the next anchor links to it and
    /// it is the Merkle leaf for this anchor.
    pub fn record_hash(&self) -> AnchorResult<Hash32> {
        Ok(hash_bytes(&to_canonical_vec(self)?))
    }
}

/// Receipt for a published session commitment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCommit {
    pub tx_id: String,
    pub merkle_root: String,
    pub committed_at: u64,
}

/// Outcome of comparing a recomputed root against the published one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootVerification {
    Verified,
    Mismatch { expected: String, actual: String },
}

/// Hash-linked record of one session, committed once at close.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorChain {
    pub session_id: String,
    pub anchors: Vec<AnchorPoint>,
    #[serde(with = "palisade_core::hash::serde_hex")]
    pub head_hash: Hash32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<SessionCommit>,
}

impl AnchorChain {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            anchors: Vec::new(),
            head_hash: GENESIS_HASH,
            commit: None,
        }
    }

    /// Appends an anchor linked to the current head. Rejected once the
    /// session is committed.
    pub fn add_anchor(
        &mut self,
        anchor_type: AnchorType,
        data: &[u8],
        summary: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> AnchorResult<AnchorPoint> {
        if self.commit.is_some() {
            return Err(AnchorError::AlreadyCommitted {
                session_id: self.session_id.clone(),
            });
        }

        let anchor = AnchorPoint {
            anchor_type,
            timestamp: now_ms(),
            data_hash: hash_hex(data),
            summary: summary.into(),
            metadata,
            previous_hash: hex::encode(self.head_hash),
        };
        self.head_hash = anchor.record_hash()?;
        self.anchors.push(anchor.clone());
        Ok(anchor)
    }

    /// Checks hash linkage across the chain and the stored head. Anchors
    /// carry no signatures; integrity rests entirely on the links and the
    /// committed root.
    pub fn verify(&self) -> AnchorResult<ChainVerification> {
        let mut violations = Vec::new();
        let mut expected_prev = hex::encode(GENESIS_HASH);
        let mut running_head = GENESIS_HASH;
        let mut resync = false;
        let mut entries_verified = 0;

        for (index, anchor) in self.anchors.iter().enumerate() {
            let mut violated = false;

            if !resync && anchor.previous_hash != expected_prev {
                violations.push(ChainViolation {
                    index,
                    kind: ViolationKind::LinkageBroken,
                    detail: format!(
                        "previousHash {} does not match predecessor record hash {}",
                        anchor.previous_hash, expected_prev
                    ),
                });
                violated = true;
            }

            let hash = anchor.record_hash()?;
            expected_prev = hex::encode(hash);
            running_head = hash;
            resync = violated;

            if !violated {
                entries_verified += 1;
            }
        }

        if running_head != self.head_hash {
            violations.push(ChainViolation {
                index: self.anchors.len().saturating_sub(1),
                kind: ViolationKind::HeadMismatch,
                detail: format!(
                    "recomputed head {} does not match stored head {}",
                    hex::encode(running_head),
                    hex::encode(self.head_hash)
                ),
            });
        }

        Ok(ChainVerification {
            valid: violations.is_empty(),
            entries_verified,
            violations,
        })
    }

    /// Merkle root over the record hashes of every anchor, in order.
    pub fn merkle_root(&self) -> AnchorResult<Hash32> {
        if self.anchors.is_empty() {
            return Err(AnchorError::EmptyChain);
        }
        let mut leaves = Vec::with_capacity(self.anchors.len());
        for anchor in &self.anchors {
            leaves.push(anchor.record_hash()?);
        }
        Ok(merkle_root(&leaves)?)
    }

    /// Publishes the session commitment. One commit per session; a second
    /// call is rejected without touching the ledger.
    pub async fn commit_merkle_root(
        &mut self,
        ledger: &LedgerHandle,
        timeout_ms: u64,
    ) -> AnchorResult<SessionCommit> {
        if self.commit.is_some() {
            return Err(AnchorError::AlreadyCommitted {
                session_id: self.session_id.clone(),
            });
        }
        let root = self.merkle_root()?;

        let commitment = serde_json::json!({
            "sessionId": self.session_id,
            "merkleRoot": hex::encode(root),
            "anchorCount": self.anchors.len(),
            "headHash": hex::encode(self.head_hash),
            "committedAt": now_ms(),
        });
        let bytes = to_canonical_vec(&commitment)?;

        let tx_id = match timeout(Duration::from_millis(timeout_ms), ledger.publish(&bytes)).await
        {
            Ok(Ok(tx_id)) => tx_id,
            Ok(Err(err)) => {
                return Err(AnchorError::CommitFailed {
                    reason: err.to_string(),
                })
            }
            Err(_) => return Err(AnchorError::CapabilityTimeout { timeout_ms }),
        };

        let commit = SessionCommit {
            tx_id,
            merkle_root: hex::encode(root),
            committed_at: now_ms(),
        };
        self.commit = Some(commit.clone());
        info!(
            session_id = %self.session_id,
            tx_id = %commit.tx_id,
            anchors = self.anchors.len(),
            "Session anchor chain committed"
        );
        Ok(commit)
    }

    /// Recomputes the root and compares it to a published value. A
    /// mismatch is a report, not an error.
    pub fn verify_against_on_chain(&self, published_root: &str) -> AnchorResult<RootVerification> {
        let actual = hex::encode(self.merkle_root()?);
        if actual == published_root {
            Ok(RootVerification::Verified)
        } else {
            Ok(RootVerification::Mismatch {
                expected: published_root.to_string(),
                actual,
            })
        }
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_committed(&self) -> bool {
        self.commit.is_some()
    }

    pub fn to_json(&self) -> AnchorResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            CanonicalError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Parses a serialized chain. The caller decides when to `verify`;
    /// parsing alone proves nothing.
    pub fn from_json(json: &str) -> AnchorResult<Self> {
        serde_json::from_str(json).map_err(|e| AnchorError::Parse {
            reason: e.to_string(),
        })
    }
}
