//! Session authentication for the Palisade trust layer.
//!
//! Turns a one-shot certificate check into a replay-protected ongoing
//! session: each session carries a CSPRNG nonce the counterparty must sign,
//! and every verification runs timing-anomaly detection before touching the
//! signature.
//!
//! # Security Model
//!
//! - Session ids and nonces come from a CSPRNG; nothing is guessable
//! - Nonce signatures are bound to one session and one counterparty key, so
//!   a captured signature cannot authenticate any other session
//! - Timestamps outside the accepted window are rejected before signature
//!   verification (fail closed on ambiguous clock skew)
//! - Expired sessions are treated as absent everywhere

pub mod manager;

pub use manager::{
    AuthSession, SessionConfig, SessionError, SessionManager, SessionMetrics, SessionResult,
    NONCE_BYTES, SESSION_ID_BYTES,
};
