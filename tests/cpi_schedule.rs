//! Rent-index rescheduling: the notify, roll-forward, and reconcile
//! branches plus the due-date boundary.

mod common;

use chrono::{DateTime, Utc};
use common::{at_noon, date, harness, Harness};
use lease_lifecycle::contract::ContractId;
use lease_lifecycle::lifecycle::{CpiOutcome, CpiSkip, NewAssignment, NewLease};
use lease_lifecycle::services::{PartnerSettings, QueueAction};
use lease_lifecycle::store::{ConditionalStore, TransactionContext};

fn end_of_day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    date(year, month, day)
        .and_hms_opt(23, 59, 59)
        .unwrap()
        .and_utc()
}

async fn seed_cpi_lease(
    h: &Harness,
    ctx: &TransactionContext,
    next_cpi_date: DateTime<Utc>,
    contract_end_date: Option<chrono::NaiveDate>,
) -> ContractId {
    *h.settings.settings.lock().await = PartnerSettings {
        cpi_annual_index_pct: 3.5,
        ..PartnerSettings::default()
    };

    let id = ContractId("c-1".to_string());
    h.orchestrator
        .create_assignment(
            ctx,
            NewAssignment {
                id: id.clone(),
                partner_id: "partner-1".to_string(),
                property_id: "property-1".to_string(),
                account_id: "account-1".to_string(),
            },
            at_noon(2026, 1, 10),
        )
        .await
        .unwrap();
    h.orchestrator
        .attach_lease(
            ctx,
            NewLease {
                contract_id: id.clone(),
                tenant_id: "tenant-1".to_string(),
                tenants: Vec::new(),
                monthly_rent_amount: 120_000,
                contract_start_date: Some(date(2025, 5, 1)),
                contract_end_date,
                cpi_enabled: true,
                next_cpi_date: Some(next_cpi_date),
            },
            at_noon(2026, 1, 11),
        )
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn due_exactly_on_the_boundary_schedules_a_notification() {
    let h = harness();
    let ctx = TransactionContext::new();
    // next_cpi_date equals end-of-day one month from "today".
    let id = seed_cpi_lease(&h, &ctx, end_of_day(2026, 4, 15), None).await;

    let outcome = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 15))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CpiOutcome::NotificationScheduled {
            sent_on: end_of_day(2026, 4, 15),
            future_rent_amount: 124_200,
        }
    );

    let tasks = h.queue.tasks.lock().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].action, QueueAction::SendCpiNotification);

    let stored = h.store.fetch(&ctx, &id).await.unwrap().unwrap();
    let cpi = &stored.rental_meta.unwrap().cpi;
    assert!(cpi.notification_pending());
    assert_eq!(cpi.future_rent_amount, Some(124_200));
}

#[tokio::test]
async fn not_due_when_next_date_is_past_the_window() {
    let h = harness();
    let ctx = TransactionContext::new();
    let id = seed_cpi_lease(&h, &ctx, end_of_day(2026, 4, 17), None).await;

    let outcome = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 15))
        .await
        .unwrap();
    assert_eq!(outcome, CpiOutcome::Skipped(CpiSkip::NotDue));
    assert!(h.queue.tasks.lock().await.is_empty());
}

#[tokio::test]
async fn lease_ending_before_renegotiation_rolls_forward() {
    let h = harness();
    let ctx = TransactionContext::new();
    // Lease ends before the renegotiation date, so the future rent never
    // applies and the cycle is pushed a year out.
    let id = seed_cpi_lease(
        &h,
        &ctx,
        end_of_day(2026, 4, 15),
        Some(date(2026, 4, 1)),
    )
    .await;

    let outcome = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 15))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CpiOutcome::RolledForward {
            next_cpi_date: end_of_day(2027, 4, 15),
        }
    );
    assert!(h.queue.tasks.lock().await.is_empty());

    let stored = h.store.fetch(&ctx, &id).await.unwrap().unwrap();
    let cpi = &stored.rental_meta.unwrap().cpi;
    assert_eq!(cpi.next_cpi_date, Some(end_of_day(2027, 4, 15)));
    assert!(!cpi.notification_pending());
}

#[tokio::test]
async fn pending_notification_reconciles_and_advances_the_cycle() {
    let h = harness();
    let ctx = TransactionContext::new();
    let id = seed_cpi_lease(&h, &ctx, end_of_day(2026, 4, 15), None).await;

    let first = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 15))
        .await
        .unwrap();
    assert!(matches!(first, CpiOutcome::NotificationScheduled { .. }));

    // The stamped notification is reconciled on the next due pass.
    let second = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 16))
        .await
        .unwrap();
    assert_eq!(second, CpiOutcome::Reconciled);

    let stored = h.store.fetch(&ctx, &id).await.unwrap().unwrap();
    let cpi = &stored.rental_meta.as_ref().unwrap().cpi;
    assert!(!cpi.notification_pending());
    assert_eq!(cpi.next_cpi_date, Some(end_of_day(2027, 4, 15)));
    assert_eq!(cpi.notification_sent_history.len(), 1);

    // A year's worth of slack until the next cycle.
    let third = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 17))
        .await
        .unwrap();
    assert_eq!(third, CpiOutcome::Skipped(CpiSkip::NotDue));
}

#[tokio::test]
async fn disabled_cpi_is_skipped() {
    let h = harness();
    let ctx = TransactionContext::new();
    let id = ContractId("c-plain".to_string());
    h.orchestrator
        .create_assignment(
            &ctx,
            NewAssignment {
                id: id.clone(),
                partner_id: "partner-1".to_string(),
                property_id: "property-1".to_string(),
                account_id: "account-1".to_string(),
            },
            at_noon(2026, 1, 10),
        )
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .run_cpi_schedule(&ctx, &id, date(2026, 3, 15))
        .await
        .unwrap();
    assert_eq!(outcome, CpiOutcome::Skipped(CpiSkip::NoRentalMeta));
}
