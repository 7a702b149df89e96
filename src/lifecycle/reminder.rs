//! Signing reminder scheduler.
//!
//! Paginated batch job selecting contracts whose unsigned parties are due
//! another nudge. The reminder stamp is written first under a guard that
//! checks the previously observed stamp, and the queue task is only
//! produced when the stamp commits, so one (contract, context, audience)
//! pair yields at most one task per interval even across concurrent runs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::contract::domain::{Contract, ContractId, SignerRole, SigningContext};
use crate::contract::ContractRepository;
use crate::error::LifecycleResult;
use crate::services::{
    PartnerSettingService, QueueAction, QueueEvent, QueuePriority, QueueTask, WorkQueue,
};
use crate::store::{Guard, Mutation, Predicate, TransactionContext};

/// `skip`/`limit` window over the contract set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPage {
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentReminder {
    pub contract_id: ContractId,
    pub context: SigningContext,
    pub role: SignerRole,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReminderRunReport {
    pub scanned: usize,
    pub sent: Vec<SentReminder>,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    repository: ContractRepository,
    settings: Arc<dyn PartnerSettingService>,
    queue: Arc<dyn WorkQueue>,
    default_interval_days: i64,
}

impl ReminderScheduler {
    pub fn new(
        repository: ContractRepository,
        settings: Arc<dyn PartnerSettingService>,
        queue: Arc<dyn WorkQueue>,
        default_interval_days: i64,
    ) -> Self {
        Self {
            repository,
            settings,
            queue,
            default_interval_days,
        }
    }

    pub async fn run(
        &self,
        ctx: &TransactionContext,
        now: DateTime<Utc>,
        page: ReminderPage,
    ) -> LifecycleResult<ReminderRunReport> {
        let contracts = self.repository.page(ctx, page.skip, page.limit).await?;
        let mut report = ReminderRunReport {
            scanned: contracts.len(),
            sent: Vec::new(),
        };

        for contract in &contracts {
            let interval_days = match self.settings.settings(&contract.partner_id).await {
                Ok(settings) => settings.reminder_interval_days,
                Err(error) => {
                    warn!(
                        partner = %contract.partner_id,
                        %error,
                        "partner settings unavailable; using default reminder interval"
                    );
                    self.default_interval_days
                }
            };

            for context in SigningContext::ALL {
                let Some(esign) = contract.esign(context) else {
                    continue;
                };
                for slot in &esign.signers {
                    if slot.is_signed() {
                        continue;
                    }
                    let next_reminder = slot
                        .reminder_sent_at
                        .unwrap_or(contract.created_at)
                        + Duration::days(interval_days);
                    if next_reminder > now {
                        continue;
                    }
                    if self
                        .send_reminder(ctx, contract, context, slot.role, slot.reminder_sent_at, now)
                        .await?
                    {
                        report.sent.push(SentReminder {
                            contract_id: contract.id.clone(),
                            context,
                            role: slot.role,
                        });
                    }
                }
            }
        }

        info!(
            scanned = report.scanned,
            sent = report.sent.len(),
            tx = ctx.id(),
            "signing reminder pass finished"
        );
        Ok(report)
    }

    async fn send_reminder(
        &self,
        ctx: &TransactionContext,
        contract: &Contract,
        context: SigningContext,
        role: SignerRole,
        seen_stamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<bool> {
        let guard = Guard::for_contract(&contract.id)
            .and(Predicate::SignerUnsigned { context, role })
            .and(Predicate::ReminderStateUnchanged {
                context,
                role,
                seen: seen_stamp,
            });
        let ops = vec![Mutation::StampReminderSent { context, role, at: now }];

        if self.repository.apply(ctx, guard, ops).await?.is_none() {
            debug!(
                contract = %contract.id,
                context = context.label(),
                role = role.label(),
                "reminder stamp lost the race; skipping enqueue"
            );
            return Ok(false);
        }

        self.queue
            .enqueue(
                ctx,
                QueueTask {
                    event: QueueEvent::Notification,
                    action: QueueAction::SendSigningReminder,
                    destination: contract.partner_id.clone(),
                    params: json!({
                        "contract_id": contract.id,
                        "context": context.label(),
                        "role": role.label(),
                    }),
                    priority: QueuePriority::Normal,
                },
            )
            .await?;
        Ok(true)
    }
}
