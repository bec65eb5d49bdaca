//! End-to-End Trust Lifecycle Integration Tests
//!
//! Validates the complete gated-agent workflow:
//! 1. Certificate issuance by the authority
//! 2. Gate verification with result caching
//! 3. Nonce session authentication
//! 4. Gated operation execution recorded in the audit trail
//! 5. Session anchor chain commitment and root verification

use std::collections::BTreeMap;

use palisade_audit::{AnchorChain, AnchorType, AuditEvent, RootVerification};
use palisade_identity::VerificationKind;

use crate::test_utils::{authenticate_session, build_stack, issue_operator, user_identity_key};

#[tokio::test]
async fn test_full_agent_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut stack = build_stack(3).await;
    let user_key = user_identity_key(&stack, "user-alice").await;

    tracing::info!("Step 1: Issue operator certificate");
    let certificate = issue_operator(&mut stack, &user_key, "Alice").await;
    assert_eq!(stack.authority.metrics().certificates_issued_total, 1);

    tracing::info!("Step 2: Verify identity at the gate");
    let outcome = stack.gate.verify_identity(&certificate).await;
    assert!(outcome.verified);
    assert_eq!(outcome.kind, VerificationKind::Certified);
    assert_eq!(
        outcome.serial_number.as_deref(),
        Some(certificate.serial_number.as_str())
    );

    tracing::info!("Step 3: Authenticate a session with a signed nonce");
    let session = authenticate_session(&stack, &user_key).await;
    assert!(session.verified);
    assert_eq!(stack.sessions.session_count(), 1);

    tracing::info!("Step 4: Execute a gated operation and record it");
    let mut session_chain = AnchorChain::new(&session.session_id);
    session_chain
        .add_anchor(
            AnchorType::SessionStart,
            user_key.as_bytes(),
            "session authenticated",
            BTreeMap::new(),
        )
        .expect("session start anchor");

    let result = stack
        .gate
        .gated_operation(&certificate, "summarize_account", || async {
            "summary ready"
        })
        .await
        .expect("gated operation");
    assert_eq!(result, "summary ready");

    stack
        .trail
        .create_entry(
            AuditEvent::new("summarize_account", &user_key)
                .with_output(result.as_bytes().to_vec()),
        )
        .await
        .expect("audit entry");
    session_chain
        .add_anchor(
            AnchorType::ToolUse,
            result.as_bytes(),
            "summarize_account completed",
            BTreeMap::new(),
        )
        .expect("tool use anchor");

    tracing::info!("Step 5: Close the session and commit its anchor chain");
    session_chain
        .add_anchor(
            AnchorType::SessionEnd,
            session.session_id.as_bytes(),
            "session closed",
            BTreeMap::new(),
        )
        .expect("session end anchor");
    assert!(stack.sessions.invalidate_session(&session.session_id));

    let ledger_handle: palisade_crypto::LedgerHandle = stack.ledger.clone();
    let commit = session_chain
        .commit_merkle_root(&ledger_handle, 5_000)
        .await
        .expect("session commitment");
    assert_eq!(
        session_chain
            .verify_against_on_chain(&commit.merkle_root)
            .expect("root recompute"),
        RootVerification::Verified
    );

    tracing::info!("Step 6: Verify the audit chain end to end");
    let report = stack.trail.verify_chain().await.expect("chain verification");
    assert!(report.valid);
    assert_eq!(report.entries_verified, 1);

    assert_eq!(stack.ledger.publication_count(), 1);
    assert_eq!(stack.gate.metrics().denials_total, 0);
}

#[tokio::test]
async fn test_repeat_verification_hits_cache() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut stack = build_stack(100).await;
    let user_key = user_identity_key(&stack, "user-bob").await;
    let certificate = issue_operator(&mut stack, &user_key, "Bob").await;

    let first = stack.gate.verify_identity(&certificate).await;
    let second = stack.gate.verify_identity(&certificate).await;

    assert!(first.verified && second.verified);
    let metrics = stack.gate.metrics();
    assert_eq!(metrics.verifications_total, 2);
    assert_eq!(metrics.cache_misses_total, 1);
    assert_eq!(metrics.cache_hits_total, 1);
}

#[tokio::test]
async fn test_gated_operation_never_runs_for_unknown_key() {
    let _ = tracing_subscriber::fmt::try_init();
    let stack = build_stack(100).await;

    let outcome = stack.gate.verify_by_public_key("unregistered-key").await;
    assert!(!outcome.verified);
    assert_eq!(stack.gate.metrics().denials_total, 1);
}

#[tokio::test]
async fn test_audit_trail_auto_anchors_during_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();
    let stack = build_stack(2).await;
    let user_key = user_identity_key(&stack, "user-carol").await;

    for action in ["read_memory", "write_memory", "summarize_account"] {
        stack
            .trail
            .create_entry(AuditEvent::new(action, &user_key))
            .await
            .expect("audit entry");
    }

    let anchors = stack.trail.anchors().await;
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].entry_hashes.len(), 2);
    assert_eq!(stack.trail.pending_count().await, 1);
    assert_eq!(stack.ledger.publication_count(), 1);
}
