//! Palisade node: wires the trust layer around a software signer and an
//! in-memory ledger, then walks one full agent lifecycle. Certificate
//! issuance, gated access, session auth, audit entries, revocation, and
//! the session commitment all run against the same capability handles a
//! production deployment would inject.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use palisade_audit::{AnchorChain, AnchorType, AuditEvent, SignedAuditTrail, TrailConfig};
use palisade_core::{logging, now_ms, Config};
use palisade_crypto::{
    LedgerHandle, MemoryLedger, Signer, SignerHandle, SoftwareSigner, PROTOCOL_IDENTITY,
    PROTOCOL_SESSION,
};
use palisade_identity::{
    CertificateAuthority, CertificateProfile, CertificateRequest, GateConfig, IdentityGate,
    InMemoryRevocationList, RevocationHandle,
};
use palisade_session::{SessionConfig, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = load_config(&std::env::args().collect::<Vec<_>>())?;
    info!(
        anchor_interval = config.audit.anchor_interval,
        session_ttl_ms = config.session.session_ttl_ms,
        "Palisade node starting"
    );

    let signer: SignerHandle = Arc::new(SoftwareSigner::generate());
    let ledger_backend = Arc::new(MemoryLedger::new());
    let ledger: LedgerHandle = ledger_backend.clone();

    let mut authority = CertificateAuthority::new(signer.clone())
        .await?
        .with_ledger(ledger.clone());

    let revocation_list = Arc::new(InMemoryRevocationList::new());
    let revocations: RevocationHandle = revocation_list.clone();
    let gate = IdentityGate::new(
        signer.clone(),
        revocations,
        GateConfig::from(config.gate.clone()),
    );
    gate.add_trusted_certifier(authority.certifier_key());

    let sessions = SessionManager::new(signer.clone(), SessionConfig::from(config.session.clone()));
    sessions.start_sweeper();

    let trail = SignedAuditTrail::new(signer.clone(), TrailConfig::from(config.audit.clone()))
        .await?
        .with_ledger(ledger.clone());

    // Issue an operator certificate and admit it at the gate.
    let user_key = signer
        .get_public_key(PROTOCOL_IDENTITY, "user-alice", None)
        .await?;
    let issued = authority
        .issue_certificate(
            CertificateRequest::new(
                &user_key,
                CertificateProfile::Operator {
                    display_name: "Alice".to_string(),
                    organization: "Palisade Labs".to_string(),
                },
            )
            .with_validity_days(30),
        )
        .await?;
    let certificate = issued.certificate.clone();
    gate.register_certificate(certificate.clone());
    info!(serial = %certificate.serial_number, "Operator certificate issued");

    let outcome = gate.verify_identity(&certificate).await;
    info!(verified = outcome.verified, "Gate verification");

    // Authenticate a session by signing its nonce.
    let session = sessions.create_session(&user_key);
    let nonce_signature = signer
        .sign(
            session.nonce.as_bytes(),
            PROTOCOL_SESSION,
            &session.session_id,
            Some(&user_key),
        )
        .await?;
    let session = sessions
        .verify_session(&session.session_id, &nonce_signature, now_ms())
        .await?;
    info!(session_id = %session.session_id, "Session authenticated");

    let mut session_chain = AnchorChain::new(&session.session_id);
    session_chain.add_anchor(
        AnchorType::SessionStart,
        session.user_public_key.as_bytes(),
        "session authenticated",
        BTreeMap::new(),
    )?;

    // Run one gated operation and record it in both audit structures.
    let summary = gate
        .gated_operation(&certificate, "summarize_account", || async {
            "account summary prepared"
        })
        .await?;
    trail
        .create_entry(
            AuditEvent::new("summarize_account", &user_key)
                .with_output(summary.as_bytes().to_vec()),
        )
        .await?;
    session_chain.add_anchor(
        AnchorType::ToolUse,
        summary.as_bytes(),
        "summarize_account completed",
        BTreeMap::new(),
    )?;
    info!(result = summary, "Gated operation completed");

    // Revoke the certificate and show the gate closing.
    authority
        .revoke_certificate(&certificate.serial_number, "key compromise reported", None)
        .await?;
    revocation_list.revoke_serial(&certificate.serial_number);
    trail
        .create_entry(
            AuditEvent::new("certificate_revoked", &user_key)
                .with_input(certificate.serial_number.as_bytes().to_vec()),
        )
        .await?;

    match gate
        .gated_operation(&certificate, "transfer_funds", || async {})
        .await
    {
        Ok(()) => warn!("Revoked certificate was not rejected"),
        Err(err) => info!(error = %err, "Operation blocked after revocation"),
    }

    // Close the session and commit its anchor chain.
    session_chain.add_anchor(
        AnchorType::SessionEnd,
        session.session_id.as_bytes(),
        "session closed",
        BTreeMap::new(),
    )?;
    sessions.invalidate_session(&session.session_id);

    let commit = session_chain
        .commit_merkle_root(&ledger, config.audit.capability_timeout_ms)
        .await?;
    let root_check = session_chain.verify_against_on_chain(&commit.merkle_root)?;
    info!(tx_id = %commit.tx_id, outcome = ?root_check, "Session commitment verified");

    if let Some(anchor) = trail.anchor_to_blockchain().await? {
        info!(tx_id = %anchor.tx_id, entries = anchor.entry_hashes.len(), "Audit trail anchored");
    }
    let report = trail.verify_chain().await?;
    info!(
        valid = report.valid,
        entries_verified = report.entries_verified,
        "Audit chain verified"
    );

    info!(
        issued = authority.metrics().certificates_issued_total,
        revoked = authority.metrics().certificates_revoked_total,
        gate_verifications = gate.metrics().verifications_total,
        gate_denials = gate.metrics().denials_total,
        sessions_verified = sessions.metrics().sessions_verified_total,
        audit_entries = trail.metrics().await.entries_appended_total,
        ledger_publications = ledger_backend.publication_count(),
        "Lifecycle complete"
    );

    sessions.shutdown();
    Ok(())
}

fn load_config(args: &[String]) -> anyhow::Result<Config> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            let path = args_iter
                .next()
                .map(PathBuf::from)
                .context("--config was provided without a path")?;
            return Config::from_file(&path)
                .with_context(|| format!("failed to load config from {}", path.display()));
        }
    }
    Ok(Config::default_config())
}
