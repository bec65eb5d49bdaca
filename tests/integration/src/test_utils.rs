//! Shared fixtures for trust layer integration tests

use std::sync::Arc;

use palisade_audit::{SignedAuditTrail, TrailConfig};
use palisade_core::now_ms;
use palisade_crypto::{
    MemoryLedger, Signer, SignerHandle, SoftwareSigner, PROTOCOL_IDENTITY, PROTOCOL_SESSION,
};
use palisade_identity::{
    Certificate, CertificateAuthority, CertificateProfile, CertificateRequest, GateConfig,
    IdentityGate, InMemoryRevocationList, RevocationHandle,
};
use palisade_session::{AuthSession, SessionConfig, SessionManager};

/// Fixed root secret so restarted stacks derive the same keys
pub const TEST_ROOT_SECRET: [u8; 32] = [7u8; 32];

/// Fully wired trust stack over a software signer and in-memory ledger
pub struct TrustStack {
    pub signer: SignerHandle,
    pub ledger: Arc<MemoryLedger>,
    pub authority: CertificateAuthority,
    pub revocation_list: Arc<InMemoryRevocationList>,
    pub gate: IdentityGate,
    pub sessions: SessionManager,
    pub trail: SignedAuditTrail,
}

/// Build a stack whose gate trusts its own authority
pub async fn build_stack(anchor_interval: usize) -> TrustStack {
    let signer: SignerHandle =
        Arc::new(SoftwareSigner::from_secret(&TEST_ROOT_SECRET).expect("test signer"));
    let ledger = Arc::new(MemoryLedger::new());

    let authority = CertificateAuthority::new(signer.clone())
        .await
        .expect("authority init")
        .with_ledger(ledger.clone());

    let revocation_list = Arc::new(InMemoryRevocationList::new());
    let revocations: RevocationHandle = revocation_list.clone();
    let gate = IdentityGate::new(signer.clone(), revocations, GateConfig::default());
    gate.add_trusted_certifier(authority.certifier_key());

    let sessions = SessionManager::new(signer.clone(), SessionConfig::default());

    let trail = SignedAuditTrail::new(
        signer.clone(),
        TrailConfig {
            anchor_interval,
            capability_timeout_ms: 5_000,
        },
    )
    .await
    .expect("trail init")
    .with_ledger(ledger.clone());

    TrustStack {
        signer,
        ledger,
        authority,
        revocation_list,
        gate,
        sessions,
        trail,
    }
}

/// Derive a user identity key from the stack's signer
pub async fn user_identity_key(stack: &TrustStack, name: &str) -> String {
    stack
        .signer
        .get_public_key(PROTOCOL_IDENTITY, name, None)
        .await
        .expect("identity key")
}

/// Issue a 30-day operator certificate and register it at the gate
pub async fn issue_operator(
    stack: &mut TrustStack,
    user_key: &str,
    display_name: &str,
) -> Certificate {
    let issued = stack
        .authority
        .issue_certificate(
            CertificateRequest::new(
                user_key,
                CertificateProfile::Operator {
                    display_name: display_name.to_string(),
                    organization: "Integration Harness".to_string(),
                },
            )
            .with_validity_days(30),
        )
        .await
        .expect("issuance");
    stack.gate.register_certificate(issued.certificate.clone());
    issued.certificate
}

/// Create a session for the user and authenticate it with a signed nonce
pub async fn authenticate_session(stack: &TrustStack, user_key: &str) -> AuthSession {
    let session = stack.sessions.create_session(user_key);
    let signature = stack
        .signer
        .sign(
            session.nonce.as_bytes(),
            PROTOCOL_SESSION,
            &session.session_id,
            Some(user_key),
        )
        .await
        .expect("nonce signature");
    stack
        .sessions
        .verify_session(&session.session_id, &signature, now_ms())
        .await
        .expect("session verification")
}
