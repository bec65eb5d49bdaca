//! Revocation Propagation Integration Tests
//!
//! Validates the revocation path across crates:
//! 1. Authority revocation publishes a ledger notice
//! 2. Revocation events evict the gate's cached verdicts eagerly
//! 3. Externally synced serials close the gate without the authority
//! 4. Propagation failure leaves the retry path open

use palisade_core::now_ms;
use palisade_identity::{AuthorityError, VerifyFailure};

use crate::test_utils::{build_stack, issue_operator, user_identity_key};

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

#[tokio::test]
async fn test_revocation_closes_gate_immediately() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut stack = build_stack(100).await;
    let user_key = user_identity_key(&stack, "user-alice").await;
    let certificate = issue_operator(&mut stack, &user_key, "Alice").await;

    tracing::info!("Step 1: Verify and cache the certificate");
    assert!(stack.gate.verify_identity(&certificate).await.verified);
    assert_eq!(stack.gate.cache_size(), 1);

    tracing::info!("Step 2: Revoke at the authority and publish the notice");
    stack
        .authority
        .revoke_certificate(&certificate.serial_number, "key compromise", Some("admin"))
        .await
        .expect("revocation");
    assert!(stack.authority.is_revoked(&certificate.serial_number));
    assert_eq!(stack.ledger.publication_count(), 1);

    tracing::info!("Step 3: Deliver the revocation event to the gate");
    stack.revocation_list.revoke_serial(&certificate.serial_number);
    assert_eq!(stack.gate.cache_size(), 0);

    let outcome = stack.gate.verify_identity(&certificate).await;
    assert!(!outcome.verified);
    assert!(matches!(
        outcome.failure,
        Some(VerifyFailure::CertificateRevoked { .. })
    ));
    // Eager eviction forced a fresh check instead of a stale cached pass.
    assert_eq!(stack.gate.metrics().cache_misses_total, 2);
}

#[tokio::test]
async fn test_synced_serials_close_gate_without_authority() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut stack = build_stack(100).await;
    let user_key = user_identity_key(&stack, "user-bob").await;
    let certificate = issue_operator(&mut stack, &user_key, "Bob").await;

    let applied = stack
        .gate
        .sync_revocation_list(&[certificate.serial_number.clone()]);
    assert_eq!(applied, 1);

    let outcome = stack.gate.verify_identity(&certificate).await;
    assert!(matches!(
        outcome.failure,
        Some(VerifyFailure::CertificateRevoked { .. })
    ));

    // Re-delivery of the same serials is a no-op.
    assert_eq!(
        stack
            .gate
            .sync_revocation_list(&[certificate.serial_number.clone()]),
        0
    );
}

#[tokio::test]
async fn test_propagation_failure_keeps_retry_open() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut stack = build_stack(100).await;
    let user_key = user_identity_key(&stack, "user-carol").await;
    let certificate = issue_operator(&mut stack, &user_key, "Carol").await;

    stack.ledger.set_offline(true);
    let result = stack
        .authority
        .revoke_certificate(&certificate.serial_number, "suspected leak", None)
        .await;
    assert!(matches!(
        result,
        Err(AuthorityError::RevocationPropagationFailed { .. })
    ));

    // Locally the certificate is already dead; only propagation is pending.
    assert!(stack.authority.is_revoked(&certificate.serial_number));
    let record = stack
        .authority
        .get_certificate(&certificate.serial_number)
        .expect("issued record");
    assert!(!record.revocation_propagated);

    stack.ledger.set_offline(false);
    stack
        .authority
        .revoke_certificate(&certificate.serial_number, "suspected leak", None)
        .await
        .expect("retry propagation");
    assert_eq!(stack.ledger.publication_count(), 1);
    assert!(
        stack
            .authority
            .get_certificate(&certificate.serial_number)
            .expect("issued record")
            .revocation_propagated
    );
}

#[tokio::test]
async fn test_expiry_reported_after_validity_window() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut stack = build_stack(100).await;
    let user_key = user_identity_key(&stack, "user-dave").await;
    let certificate = issue_operator(&mut stack, &user_key, "Dave").await;

    let current = stack.authority.verify_certificate(&certificate).await;
    assert!(current.valid);
    assert!(!current.expired);

    let status = stack
        .authority
        .verify_certificate_at(&certificate, now_ms() + 31 * DAY_MS)
        .await;
    assert!(!status.valid);
    assert!(status.expired);
    assert!(matches!(
        status.failure,
        Some(VerifyFailure::CertificateExpired { .. })
    ));
}
