//! Signing reminder batch: eligibility windows, stamp-then-enqueue, and
//! pagination.

mod common;

use common::{at_noon, harness, Harness};
use lease_lifecycle::contract::{ContractId, SignerRole, SigningContext};
use lease_lifecycle::lifecycle::{NewAssignment, ReminderPage};
use lease_lifecycle::services::QueueAction;
use lease_lifecycle::store::TransactionContext;

const FULL_PAGE: ReminderPage = ReminderPage {
    skip: 0,
    limit: 100,
};

async fn seed_assignment(h: &Harness, ctx: &TransactionContext, id: &str) -> ContractId {
    let contract_id = ContractId(id.to_string());
    h.orchestrator
        .create_assignment(
            ctx,
            NewAssignment {
                id: contract_id.clone(),
                partner_id: "partner-1".to_string(),
                property_id: format!("property-{id}"),
                account_id: "account-1".to_string(),
            },
            at_noon(2026, 1, 10),
        )
        .await
        .unwrap();
    contract_id
}

#[tokio::test]
async fn unsigned_parties_are_reminded_after_the_interval() {
    let h = harness();
    let ctx = TransactionContext::new();
    seed_assignment(&h, &ctx, "c-1").await;

    // One day in: nobody is due yet.
    let early = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 11), FULL_PAGE)
        .await
        .unwrap();
    assert_eq!(early.scanned, 1);
    assert!(early.sent.is_empty());

    // Interval boundary: both assignment signers are due.
    let due = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 13), FULL_PAGE)
        .await
        .unwrap();
    assert_eq!(due.sent.len(), 2);
    assert!(due
        .sent
        .iter()
        .all(|sent| sent.context == SigningContext::Assignment));

    let tasks = h.queue.tasks.lock().await;
    assert_eq!(tasks.len(), 2);
    assert!(tasks
        .iter()
        .all(|task| task.action == QueueAction::SendSigningReminder));
}

#[tokio::test]
async fn stamp_resets_the_interval() {
    let h = harness();
    let ctx = TransactionContext::new();
    seed_assignment(&h, &ctx, "c-1").await;

    let first = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 13), FULL_PAGE)
        .await
        .unwrap();
    assert_eq!(first.sent.len(), 2);

    // The fresh stamp pushes the next reminder three days out.
    let repeat = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 14), FULL_PAGE)
        .await
        .unwrap();
    assert!(repeat.sent.is_empty());

    let again = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 16), FULL_PAGE)
        .await
        .unwrap();
    assert_eq!(again.sent.len(), 2);
}

#[tokio::test]
async fn signed_parties_are_never_reminded() {
    let h = harness();
    let ctx = TransactionContext::new();
    let id = seed_assignment(&h, &ctx, "c-1").await;

    h.orchestrator
        .record_signature(
            &ctx,
            &id,
            SigningContext::Assignment,
            SignerRole::Landlord,
            at_noon(2026, 1, 11),
        )
        .await
        .unwrap();

    let report = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 13), FULL_PAGE)
        .await
        .unwrap();
    assert_eq!(report.sent.len(), 1);
    assert_eq!(report.sent[0].role, SignerRole::Agent);
}

#[tokio::test]
async fn replayed_signature_callback_is_rejected() {
    let h = harness();
    let ctx = TransactionContext::new();
    let id = seed_assignment(&h, &ctx, "c-1").await;

    h.orchestrator
        .record_signature(
            &ctx,
            &id,
            SigningContext::Assignment,
            SignerRole::Landlord,
            at_noon(2026, 1, 11),
        )
        .await
        .unwrap();
    let replay = h
        .orchestrator
        .record_signature(
            &ctx,
            &id,
            SigningContext::Assignment,
            SignerRole::Landlord,
            at_noon(2026, 1, 11),
        )
        .await;
    assert!(replay.is_err());
}

#[tokio::test]
async fn pagination_windows_cover_the_contract_set() {
    let h = harness();
    let ctx = TransactionContext::new();
    for id in ["c-1", "c-2", "c-3"] {
        seed_assignment(&h, &ctx, id).await;
    }

    let first = h
        .orchestrator
        .run_signing_reminders(
            &ctx,
            at_noon(2026, 1, 13),
            ReminderPage { skip: 0, limit: 2 },
        )
        .await
        .unwrap();
    assert_eq!(first.scanned, 2);
    assert_eq!(first.sent.len(), 4);

    let second = h
        .orchestrator
        .run_signing_reminders(
            &ctx,
            at_noon(2026, 1, 13),
            ReminderPage { skip: 2, limit: 2 },
        )
        .await
        .unwrap();
    assert_eq!(second.scanned, 1);
    assert_eq!(second.sent.len(), 2);
}

#[tokio::test]
async fn sweep_walks_every_configured_page() {
    let h = harness();
    let ctx = TransactionContext::new();
    for id in ["c-1", "c-2", "c-3"] {
        seed_assignment(&h, &ctx, id).await;
    }

    // Harness page size is 2, so three contracts need two windows.
    let report = h
        .orchestrator
        .run_signing_reminder_sweep(&ctx, at_noon(2026, 1, 13))
        .await
        .unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.sent.len(), 6);
    assert_eq!(h.queue.tasks.lock().await.len(), 6);
}

#[tokio::test]
async fn unavailable_partner_settings_fall_back_to_the_default_interval() {
    let h = harness();
    let ctx = TransactionContext::new();
    seed_assignment(&h, &ctx, "c-1").await;
    *h.settings.unavailable.lock().await = true;

    let report = h
        .orchestrator
        .run_signing_reminders(&ctx, at_noon(2026, 1, 13), FULL_PAGE)
        .await
        .unwrap();
    assert_eq!(report.sent.len(), 2);
}
