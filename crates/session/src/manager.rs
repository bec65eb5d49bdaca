//! Session lifecycle and nonce-challenge verification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use palisade_core::config::SessionSection;
use palisade_core::now_ms;
use palisade_crypto::{Signer, SignerHandle, PROTOCOL_SESSION};

/// Session id entropy (hex-encoded on the wire).
pub const SESSION_ID_BYTES: usize = 16;
/// Challenge nonce entropy (hex-encoded on the wire).
pub const NONCE_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} has expired")]
    SessionExpired { session_id: String },

    #[error("Session {session_id} has not been verified")]
    SessionNotVerified { session_id: String },

    #[error("Timing anomaly: {reason} (drift {drift_ms}ms)")]
    TimingAnomaly { reason: String, drift_ms: i64 },

    #[error("Session signature is invalid")]
    InvalidSignature,

    #[error("Verification capability unavailable: {reason}")]
    CapabilityUnavailable { reason: String },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// An authenticated (or not-yet-authenticated) session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub session_id: String,
    pub user_public_key: String,
    /// Challenge the counterparty signs to verify the session
    pub nonce: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub verified: bool,
}

impl AuthSession {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session lifetime (ms)
    pub session_ttl_ms: u64,
    /// Interval between expiry sweeps (ms)
    pub sweep_interval_ms: u64,
    /// Maximum tolerated |server - client| clock drift (ms)
    pub max_drift_ms: u64,
    /// Maximum tolerated future timestamp skew (ms)
    pub max_future_ms: u64,
    /// Maximum tolerated timestamp age (ms)
    pub max_past_ms: u64,
    /// Timeout for signing-capability calls (ms)
    pub capability_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: 24 * 60 * 60 * 1000,
            sweep_interval_ms: 60_000,
            max_drift_ms: 500,
            max_future_ms: 1_000,
            max_past_ms: 60_000,
            capability_timeout_ms: 5_000,
        }
    }
}

impl From<SessionSection> for SessionConfig {
    fn from(section: SessionSection) -> Self {
        Self {
            session_ttl_ms: section.session_ttl_ms,
            sweep_interval_ms: section.sweep_interval_ms,
            max_drift_ms: section.max_drift_ms,
            max_future_ms: section.max_future_ms,
            max_past_ms: section.max_past_ms,
            capability_timeout_ms: section.capability_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub sessions_created_total: u64,
    pub sessions_verified_total: u64,
    pub timing_anomalies_total: u64,
    pub sessions_swept_total: u64,
}

/// Creates, verifies, refreshes, and sweeps sessions.
///
/// The expiry sweep is the only background task in the trust layer; it runs
/// on its own tokio interval and never blocks foreground verification.
pub struct SessionManager {
    signer: SignerHandle,
    config: SessionConfig,
    sessions: Arc<RwLock<HashMap<String, AuthSession>>>,
    metrics: Arc<RwLock<SessionMetrics>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(signer: SignerHandle, config: SessionConfig) -> Self {
        Self {
            signer,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(SessionMetrics::default())),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates an unverified session with a fresh id and challenge nonce.
    pub fn create_session(&self, user_public_key: &str) -> AuthSession {
        let now = now_ms();
        let session = AuthSession {
            session_id: random_hex(SESSION_ID_BYTES),
            user_public_key: user_public_key.to_string(),
            nonce: random_hex(NONCE_BYTES),
            created_at: now,
            expires_at: now + self.config.session_ttl_ms,
            verified: false,
        };

        self.sessions
            .write()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        self.metrics.write().unwrap().sessions_created_total += 1;

        info!(
            session_id = %session.session_id,
            user = %session.user_public_key,
            "Session created"
        );
        session
    }

    /// Verifies a session from a signature over its nonce.
    ///
    /// Timing checks run before the signature: a timestamp more than
    /// `max_future_ms` ahead, more than `max_past_ms` behind, or drifting
    /// beyond `max_drift_ms` is rejected as a timing anomaly. The signature
    /// is then checked against this session's id and counterparty key, so a
    /// captured signature cannot authenticate a different session.
    ///
    /// Re-verifying an already verified session is a no-op returning the
    /// session.
    pub async fn verify_session(
        &self,
        session_id: &str,
        signature: &[u8],
        client_timestamp: u64,
    ) -> SessionResult<AuthSession> {
        let now = now_ms();

        let session = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| SessionError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?
        };

        if session.is_expired(now) {
            self.sessions.write().unwrap().remove(session_id);
            debug!(session_id, "Expired session evicted on verification");
            return Err(SessionError::SessionExpired {
                session_id: session_id.to_string(),
            });
        }

        self.check_timing(session_id, client_timestamp, now)?;

        let verify_call = self.signer.verify(
            session.nonce.as_bytes(),
            signature,
            PROTOCOL_SESSION,
            &session.session_id,
            Some(&session.user_public_key),
        );
        let verified = match timeout(
            Duration::from_millis(self.config.capability_timeout_ms),
            verify_call,
        )
        .await
        {
            Ok(Ok(verified)) => verified,
            Ok(Err(err)) => {
                return Err(SessionError::CapabilityUnavailable {
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(SessionError::CapabilityUnavailable {
                    reason: format!(
                        "signature check timed out after {}ms",
                        self.config.capability_timeout_ms
                    ),
                })
            }
        };
        if !verified {
            warn!(session_id, "Session nonce signature rejected");
            return Err(SessionError::InvalidSignature);
        }

        let mut sessions = self.sessions.write().unwrap();
        let session =
            sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        if !session.verified {
            session.verified = true;
            self.metrics.write().unwrap().sessions_verified_total += 1;
            info!(session_id, user = %session.user_public_key, "Session verified");
        }
        Ok(session.clone())
    }

    /// Extends the expiry of an already-verified session. Expired sessions
    /// cannot be resurrected.
    pub fn refresh_session(&self, session_id: &str) -> SessionResult<AuthSession> {
        let now = now_ms();
        let mut sessions = self.sessions.write().unwrap();

        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        if session.is_expired(now) {
            sessions.remove(session_id);
            return Err(SessionError::SessionExpired {
                session_id: session_id.to_string(),
            });
        }
        if !session.verified {
            return Err(SessionError::SessionNotVerified {
                session_id: session_id.to_string(),
            });
        }

        let session = sessions.get_mut(session_id).ok_or_else(|| {
            SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        session.expires_at = now + self.config.session_ttl_ms;
        debug!(session_id, expires_at = session.expires_at, "Session refreshed");
        Ok(session.clone())
    }

    /// Destroys a session. Returns whether it existed.
    pub fn invalidate_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().unwrap().remove(session_id).is_some();
        if removed {
            info!(session_id, "Session invalidated");
        }
        removed
    }

    /// Returns a live session, evicting it if expired.
    pub fn get_session(&self, session_id: &str) -> Option<AuthSession> {
        let now = now_ms();
        let session = self.sessions.read().unwrap().get(session_id).cloned()?;
        if session.is_expired(now) {
            self.sessions.write().unwrap().remove(session_id);
            return None;
        }
        Some(session)
    }

    /// Number of live (non-expired) sessions.
    pub fn session_count(&self) -> usize {
        let now = now_ms();
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|session| !session.is_expired(now))
            .count()
    }

    /// Starts the periodic expiry sweep. Idempotent while running.
    pub fn start_sweeper(&self) {
        let mut guard = self.sweeper.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let sessions = Arc::clone(&self.sessions);
        let metrics = Arc::clone(&self.metrics);
        let interval_ms = self.config.sweep_interval_ms;

        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let now = now_ms();
                let swept = {
                    let mut sessions = sessions.write().unwrap();
                    let before = sessions.len();
                    sessions.retain(|_, session| !session.is_expired(now));
                    before - sessions.len()
                };
                if swept > 0 {
                    metrics.write().unwrap().sessions_swept_total += swept as u64;
                    debug!(swept, "Swept expired sessions");
                }
            }
        }));
        info!(interval_ms, "Session sweeper started");
    }

    /// Cancels the expiry sweep task.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
            info!("Session sweeper stopped");
        }
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.read().unwrap().clone()
    }

    fn check_timing(&self, session_id: &str, client_timestamp: u64, now: u64) -> SessionResult<()> {
        let drift_ms = client_timestamp as i64 - now as i64;

        let reason = if client_timestamp > now && client_timestamp - now > self.config.max_future_ms
        {
            Some("timestamp in the future")
        } else if now > client_timestamp && now - client_timestamp > self.config.max_past_ms {
            Some("timestamp too old")
        } else if drift_ms.unsigned_abs() > self.config.max_drift_ms {
            Some("clock drift exceeds threshold")
        } else {
            None
        };

        match reason {
            None => Ok(()),
            Some(reason) => {
                self.metrics.write().unwrap().timing_anomalies_total += 1;
                warn!(session_id, reason, drift_ms, "Timing anomaly rejected");
                Err(SessionError::TimingAnomaly {
                    reason: reason.to_string(),
                    drift_ms,
                })
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
