//! Rent-index (CPI) rescheduling.
//!
//! Invoked per contract on a daily trigger. The three branches are made
//! mutually exclusive by their guards, so concurrent runs over the same
//! contract are safe: the second guarded write matches zero documents.
//! All date arithmetic uses UTC day boundaries.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::info;

use crate::contract::domain::{ContractId, HistoryEntry, RentalMeta};
use crate::contract::ContractRepository;
use crate::error::{LifecycleError, LifecycleResult};
use crate::services::{
    PartnerSettingService, QueueAction, QueueEvent, QueuePriority, QueueTask, WorkQueue,
};
use crate::store::{Guard, Mutation, Predicate, TransactionContext};

/// Outcome of one scheduler pass over one contract.
#[derive(Debug, Clone, PartialEq)]
pub enum CpiOutcome {
    /// Branch 1: renegotiation notification scheduled.
    NotificationScheduled {
        sent_on: DateTime<Utc>,
        future_rent_amount: i64,
    },
    /// Branch 2: future rent not computable; renegotiation postponed.
    RolledForward { next_cpi_date: DateTime<Utc> },
    /// Branch 3: sent notification reconciled, cycle advanced.
    Reconciled,
    Skipped(CpiSkip),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpiSkip {
    NoRentalMeta,
    CpiDisabled,
    NotDue,
    /// A concurrent run committed first; this run's guard matched nothing.
    LostRace,
}

#[derive(Clone)]
pub struct CpiScheduler {
    repository: ContractRepository,
    settings: Arc<dyn PartnerSettingService>,
    queue: Arc<dyn WorkQueue>,
}

impl CpiScheduler {
    pub fn new(
        repository: ContractRepository,
        settings: Arc<dyn PartnerSettingService>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            repository,
            settings,
            queue,
        }
    }

    pub async fn run_for_contract(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        today: NaiveDate,
    ) -> LifecycleResult<CpiOutcome> {
        let contract = self.repository.get(ctx, contract_id).await?;
        let Some(rental) = contract.rental_meta.as_ref() else {
            return Ok(CpiOutcome::Skipped(CpiSkip::NoRentalMeta));
        };
        if !rental.cpi.enabled {
            return Ok(CpiOutcome::Skipped(CpiSkip::CpiDisabled));
        }
        let next_cpi_date = rental.cpi.next_cpi_date.ok_or_else(|| {
            LifecycleError::validation("cpi enabled without a next_cpi_date")
        })?;

        let cpi_date = notification_date(today)?;
        let pending = rental.cpi.notification_pending();

        if next_cpi_date > cpi_date {
            return Ok(CpiOutcome::Skipped(CpiSkip::NotDue));
        }

        if pending {
            self.reconcile(ctx, contract_id, &contract.partner_id, cpi_date)
                .await
        } else if future_rent_computable(rental, cpi_date.date_naive()) {
            self.notify(ctx, contract_id, &contract.partner_id, rental, cpi_date)
                .await
        } else {
            self.roll_forward(ctx, contract_id, rental, next_cpi_date, cpi_date)
                .await
        }
    }

    /// Branch 1: stamp the pending notification and queue delivery.
    async fn notify(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        partner_id: &str,
        rental: &RentalMeta,
        cpi_date: DateTime<Utc>,
    ) -> LifecycleResult<CpiOutcome> {
        let settings = self.settings.settings(partner_id).await?;
        let monthly_rent = rental.monthly_rent_amount.ok_or_else(|| {
            LifecycleError::validation("future rent requires a monthly rent amount")
        })?;
        let future_rent_amount = project_rent(monthly_rent, settings.cpi_annual_index_pct);
        let from_month = month_start(
            rental
                .cpi
                .next_cpi_date
                .map(|next| next.date_naive())
                .unwrap_or_else(|| cpi_date.date_naive()),
        );
        let in_month = month_start(cpi_date.date_naive());

        let guard = Guard::for_contract(contract_id)
            .and(Predicate::CpiNotificationPending(false))
            .and(Predicate::NextCpiOnOrBefore(cpi_date))
            .and(Predicate::FutureRentComputableAsOf {
                as_of: cpi_date.date_naive(),
                expected: true,
            });
        let ops = vec![
            Mutation::ScheduleCpiNotification {
                sent_on: cpi_date,
                future_rent_amount,
                from_month,
                in_month,
            },
            Mutation::PushHistory(HistoryEntry::change(
                "rental_meta.cpi.future_rent_amount",
                rental.cpi.future_rent_amount.map(|amount| json!(amount)),
                Some(json!(future_rent_amount)),
                rental.cpi.last_notification_sent_on,
                cpi_date,
            )),
        ];

        let Some(outcome) = self.repository.apply(ctx, guard, ops).await? else {
            return Ok(CpiOutcome::Skipped(CpiSkip::LostRace));
        };

        self.queue
            .enqueue(
                ctx,
                QueueTask {
                    event: QueueEvent::Notification,
                    action: QueueAction::SendCpiNotification,
                    destination: outcome.after.partner_id.clone(),
                    params: json!({
                        "contract_id": contract_id,
                        "future_rent_amount": future_rent_amount,
                        "cpi_date": cpi_date,
                    }),
                    priority: QueuePriority::Normal,
                },
            )
            .await?;

        info!(
            contract = %contract_id,
            future_rent_amount,
            "cpi renegotiation notification scheduled"
        );
        Ok(CpiOutcome::NotificationScheduled {
            sent_on: cpi_date,
            future_rent_amount,
        })
    }

    /// Branch 2: the lease ends before the projection applies; push the
    /// renegotiation a year out instead of notifying.
    async fn roll_forward(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        rental: &RentalMeta,
        next_cpi_date: DateTime<Utc>,
        cpi_date: DateTime<Utc>,
    ) -> LifecycleResult<CpiOutcome> {
        let rolled = next_cpi_date
            .checked_add_months(Months::new(12))
            .unwrap_or(next_cpi_date);

        let guard = Guard::for_contract(contract_id)
            .and(Predicate::CpiNotificationPending(false))
            .and(Predicate::NextCpiOnOrBefore(cpi_date))
            .and(Predicate::FutureRentComputableAsOf {
                as_of: cpi_date.date_naive(),
                expected: false,
            });
        let ops = vec![
            Mutation::RollNextCpiDate { months: 12 },
            Mutation::PushHistory(HistoryEntry::change(
                "rental_meta.cpi.next_cpi_date",
                Some(json!(next_cpi_date)),
                Some(json!(rolled)),
                rental.cpi.last_cpi_date,
                Utc::now(),
            )),
        ];

        match self.repository.apply(ctx, guard, ops).await? {
            Some(_) => {
                info!(contract = %contract_id, "cpi renegotiation postponed 12 months");
                Ok(CpiOutcome::RolledForward {
                    next_cpi_date: rolled,
                })
            }
            None => Ok(CpiOutcome::Skipped(CpiSkip::LostRace)),
        }
    }

    /// Branch 3: a sent notification whose renegotiation date has been
    /// reached; clear the pending fields, advance the cycle, and queue a
    /// fresh notification for the next one.
    async fn reconcile(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        partner_id: &str,
        cpi_date: DateTime<Utc>,
    ) -> LifecycleResult<CpiOutcome> {
        let guard = Guard::for_contract(contract_id)
            .and(Predicate::CpiNotificationPending(true))
            .and(Predicate::NextCpiOnOrBefore(cpi_date));
        let ops = vec![
            Mutation::ClearCpiNotification,
            Mutation::AdvanceCpiCycle { months: 12 },
        ];

        match self.repository.apply(ctx, guard, ops).await? {
            Some(outcome) => {
                self.queue
                    .enqueue(
                        ctx,
                        QueueTask {
                            event: QueueEvent::Notification,
                            action: QueueAction::SendCpiNotification,
                            destination: partner_id.to_string(),
                            params: json!({
                                "contract_id": contract_id,
                                "next_cpi_date": outcome
                                    .after
                                    .rental_meta
                                    .as_ref()
                                    .and_then(|rental| rental.cpi.next_cpi_date),
                            }),
                            priority: QueuePriority::Low,
                        },
                    )
                    .await?;
                info!(contract = %contract_id, "cpi cycle reconciled");
                Ok(CpiOutcome::Reconciled)
            }
            None => Ok(CpiOutcome::Skipped(CpiSkip::LostRace)),
        }
    }
}

/// `today + 1 month`, end of day, UTC.
pub fn notification_date(today: NaiveDate) -> LifecycleResult<DateTime<Utc>> {
    let date = today
        .checked_add_months(Months::new(1))
        .ok_or_else(|| LifecycleError::validation("cpi date out of calendar range"))?;
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)
        .ok_or_else(|| LifecycleError::validation("cpi time out of range"))?;
    Ok(date.and_time(end_of_day).and_utc())
}

fn future_rent_computable(rental: &RentalMeta, as_of: NaiveDate) -> bool {
    rental.monthly_rent_amount.is_some()
        && rental.contract_end_date.is_none_or(|end| end > as_of)
}

fn project_rent(monthly_rent: i64, annual_index_pct: f64) -> i64 {
    ((monthly_rent as f64) * (1.0 + annual_index_pct / 100.0)).round() as i64
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}
