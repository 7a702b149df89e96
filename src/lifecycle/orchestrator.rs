//! Side-effect orchestrator: the composition root.
//!
//! Validates input, drives the engines for a guarded write, then diffs
//! the pre- and post-image to decide which of a fixed checklist of
//! downstream effects fire. Effects after the committed contract write
//! are never rolled back; each checklist entry is attempted on its own,
//! failed calls are logged as they happen, and the first failure is
//! surfaced as a `Downstream` error once the checklist has run through.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::contract::domain::{
    Contract, ContractId, ContractStatus, EvictionCaseStatus, HistoryEntry, InvoiceId,
    RentalMeta, SignerRole, SigningContext,
};
use crate::contract::{history, ContractRepository};
use crate::error::{LifecycleError, LifecycleResult};
use crate::services::{
    DownstreamError, Invoice, InvoiceService, LogAction, LogEntry, LogService,
    PartnerSettingService, PropertyFlags, PropertyService, QueueAction, QueueEvent, QueuePriority,
    QueueTask, TaskId, TenantPropertyStatus, TenantService, WorkQueue,
};
use crate::store::{ConditionalStore, Guard, Mutation, Predicate, TransactionContext};

use super::cpi::{CpiOutcome, CpiScheduler};
use super::eviction::{CaseChange, EvictionEngine};
use super::reminder::{ReminderPage, ReminderRunReport, ReminderScheduler};
use super::transition::{TransitionEngine, TransitionOutcome, TransitionRequest};

/// External collaborators wired into the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub invoices: Arc<dyn InvoiceService>,
    pub properties: Arc<dyn PropertyService>,
    pub tenants: Arc<dyn TenantService>,
    pub log: Arc<dyn LogService>,
    pub queue: Arc<dyn WorkQueue>,
    pub settings: Arc<dyn PartnerSettingService>,
}

/// Input for creating the landlord-facing assignment contract.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub id: ContractId,
    pub partner_id: String,
    pub property_id: String,
    pub account_id: String,
}

/// Input for layering a lease on an existing assignment.
#[derive(Debug, Clone)]
pub struct NewLease {
    pub contract_id: ContractId,
    pub tenant_id: String,
    /// Extra tenants under joint liability.
    pub tenants: Vec<String>,
    pub monthly_rent_amount: i64,
    pub contract_start_date: Option<NaiveDate>,
    pub contract_end_date: Option<NaiveDate>,
    pub cpi_enabled: bool,
    pub next_cpi_date: Option<DateTime<Utc>>,
}

/// Term changes applied outside a status transition.
#[derive(Debug, Clone, Default)]
pub struct LeaseTermChanges {
    pub monthly_rent_amount: Option<i64>,
    pub commission_amount: Option<i64>,
}

/// Invoice lifecycle events routed into the eviction case engine.
#[derive(Debug, Clone)]
pub enum InvoiceEvent {
    Defaulted(Invoice),
    EvictionReminderSent(Invoice),
    PaymentApplied {
        partner_id: String,
        contract_id: ContractId,
        invoice_id: InvoiceId,
        paid_amount: i64,
        ignore_remove: bool,
    },
}

pub struct LifecycleOrchestrator {
    repository: ContractRepository,
    transitions: TransitionEngine,
    evictions: EvictionEngine,
    cpi: CpiScheduler,
    reminders: ReminderScheduler,
    collaborators: Collaborators,
    reminder_page_size: usize,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: Arc<dyn ConditionalStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        let repository = ContractRepository::new(store);
        let transitions = TransitionEngine::new(repository.clone());
        let evictions = EvictionEngine::new(
            repository.clone(),
            collaborators.invoices.clone(),
            collaborators.settings.clone(),
            collaborators.log.clone(),
            collaborators.queue.clone(),
        );
        let cpi = CpiScheduler::new(
            repository.clone(),
            collaborators.settings.clone(),
            collaborators.queue.clone(),
        );
        let reminders = ReminderScheduler::new(
            repository.clone(),
            collaborators.settings.clone(),
            collaborators.queue.clone(),
            config.default_reminder_interval_days,
        );

        Self {
            repository,
            transitions,
            evictions,
            cpi,
            reminders,
            collaborators,
            reminder_page_size: config.reminder_page_size,
        }
    }

    /// Create the assignment-only contract for a newly mandated property.
    pub async fn create_assignment(
        &self,
        ctx: &TransactionContext,
        request: NewAssignment,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Contract> {
        if request.partner_id.is_empty()
            || request.property_id.is_empty()
            || request.account_id.is_empty()
        {
            return Err(LifecycleError::validation(
                "assignment requires partner, property, and account ids",
            ));
        }

        let contract = Contract::new_assignment(
            request.id,
            request.partner_id,
            request.property_id,
            request.account_id,
            now,
        );
        let created = self.repository.create(ctx, contract).await?;

        let mut failures = Vec::new();
        self.note(
            "property",
            self.collaborators
                .properties
                .update_flags(
                    ctx,
                    &created.property_id,
                    PropertyFlags {
                        has_assignment: Some(true),
                        ..PropertyFlags::default()
                    },
                )
                .await,
            &mut failures,
        );
        self.collaborators
            .log
            .create_log(
                ctx,
                LogEntry {
                    partner_id: created.partner_id.clone(),
                    action: LogAction::AssignmentCreated,
                    context: json!({ "contract_id": created.id, "property_id": created.property_id }),
                    created_at: now,
                },
            )
            .await?;

        surface(created, failures)
    }

    /// Attach the tenant-facing lease to an existing assignment.
    ///
    /// A start date on or before the request day means the lease is
    /// already running: it lands directly at `active` with its serial
    /// allocated in the same guarded write. A replay fails the
    /// `RentalMetaPresent(false)` guard, so the serial is issued once.
    pub async fn attach_lease(
        &self,
        ctx: &TransactionContext,
        request: NewLease,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Contract> {
        if request.tenant_id.is_empty() {
            return Err(LifecycleError::validation("lease requires a tenant id"));
        }
        if request.monthly_rent_amount <= 0 {
            return Err(LifecycleError::validation(
                "lease requires a positive monthly rent",
            ));
        }
        if request.cpi_enabled && request.next_cpi_date.is_none() {
            return Err(LifecycleError::validation(
                "cpi enabled lease requires a next_cpi_date",
            ));
        }

        let current = self.repository.get(ctx, &request.contract_id).await?;

        let starts_in_past = request
            .contract_start_date
            .is_some_and(|start| start <= now.date_naive());

        let mut rental = RentalMeta::new(request.tenant_id.clone());
        rental.tenants = request.tenants;
        rental.monthly_rent_amount = Some(request.monthly_rent_amount);
        rental.contract_start_date = request.contract_start_date;
        rental.contract_end_date = request.contract_end_date;
        rental.cpi.enabled = request.cpi_enabled;
        rental.cpi.next_cpi_date = request.next_cpi_date;
        if starts_in_past {
            rental.status = ContractStatus::Active;
        }
        let landed = rental.status;

        let guard = Guard::for_contract(&request.contract_id)
            .and(Predicate::RentalMetaPresent(false))
            .and(Predicate::StatusNotIn(vec![ContractStatus::Closed]));
        let mut ops = vec![Mutation::AttachRentalMeta(rental)];
        if starts_in_past {
            ops.push(Mutation::AllocateLeaseSerial {
                counter_key: format!(
                    "{}:{}:lease_serial",
                    current.partner_id, current.property_id
                ),
            });
        }
        ops.push(Mutation::PushHistory(HistoryEntry::change(
            "rental_meta.status",
            None,
            Some(json!(landed.label())),
            Some(current.updated_at),
            now,
        )));

        let outcome = self
            .repository
            .apply(ctx, guard, ops)
            .await?
            .ok_or_else(|| {
                LifecycleError::precondition(
                    "contract already has a lease or the assignment is closed",
                )
            })?;

        let mut failures = Vec::new();
        if starts_in_past {
            self.rental_effects(ctx, &outcome.after, now, &mut failures)
                .await?;
        } else {
            self.note(
                "tenant",
                self.collaborators
                    .tenants
                    .update_property_status(
                        ctx,
                        &request.tenant_id,
                        &outcome.after.property_id,
                        &outcome.after.id,
                        TenantPropertyStatus::Upcoming,
                    )
                    .await,
                &mut failures,
            );
        }
        self.collaborators
            .log
            .create_log(
                ctx,
                LogEntry {
                    partner_id: outcome.after.partner_id.clone(),
                    action: LogAction::LeaseCreated,
                    context: json!({
                        "contract_id": outcome.after.id,
                        "tenant_id": request.tenant_id,
                        "status": landed.label(),
                    }),
                    created_at: now,
                },
            )
            .await?;

        surface(outcome.after, failures)
    }

    /// Drive a status transition and fan out its side effects.
    pub async fn apply_transition(
        &self,
        ctx: &TransactionContext,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Contract> {
        let request = self.normalize_closure(ctx, request).await?;
        let outcome = self
            .transitions
            .request_transition(ctx, &request, now)
            .await?;
        self.fan_out(ctx, &outcome, now).await?;
        Ok(outcome.after)
    }

    /// Closing the assignment forces lease-side closure: widen the
    /// request so both sides move in one guarded write.
    async fn normalize_closure(
        &self,
        ctx: &TransactionContext,
        mut request: TransitionRequest,
    ) -> LifecycleResult<TransitionRequest> {
        if request.assignment_status == Some(ContractStatus::Closed)
            && request.rental_status.is_none()
        {
            let current = self.repository.get(ctx, &request.contract_id).await?;
            if current
                .rental_status()
                .is_some_and(|status| !status.is_terminal() && status != ContractStatus::New)
            {
                request.rental_status = Some(ContractStatus::Closed);
            }
        }
        Ok(request)
    }

    /// The fixed effect checklist, decided by diffing the pre- and
    /// post-image of the committed transition. Every entry is attempted
    /// even when an earlier one fails; the first failure is surfaced
    /// after the audit log is written.
    async fn fan_out(
        &self,
        ctx: &TransactionContext,
        outcome: &TransitionOutcome,
        now: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        let before = &outcome.before;
        let after = &outcome.after;
        let mut failures = Vec::new();

        if before.status != after.status {
            self.assignment_effects(ctx, after, &mut failures).await;
        }
        if before.rental_status() != after.rental_status() {
            self.rental_effects(ctx, after, now, &mut failures).await?;
        }

        // Audit entry last; for user-initiated actions it must succeed
        // before the caller sees success.
        self.collaborators
            .log
            .create_log(
                ctx,
                LogEntry {
                    partner_id: after.partner_id.clone(),
                    action: LogAction::ContractStatusChanged,
                    context: json!({
                        "contract_id": after.id,
                        "status": {
                            "old": before.status.label(),
                            "new": after.status.label(),
                        },
                        "rental_status": {
                            "old": before.rental_status().map(ContractStatus::label),
                            "new": after.rental_status().map(ContractStatus::label),
                        },
                    }),
                    created_at: now,
                },
            )
            .await?;
        surface((), failures)
    }

    async fn assignment_effects(
        &self,
        ctx: &TransactionContext,
        after: &Contract,
        failures: &mut Vec<DownstreamError>,
    ) {
        let flags = match after.status {
            ContractStatus::InProgress => Some(PropertyFlags {
                has_in_progress_lease: Some(true),
                has_upcoming_lease: Some(false),
                ..PropertyFlags::default()
            }),
            ContractStatus::Closed => Some(PropertyFlags {
                has_assignment: Some(false),
                ..PropertyFlags::default()
            }),
            _ => None,
        };
        if let Some(flags) = flags {
            self.note(
                "property",
                self.collaborators
                    .properties
                    .update_flags(ctx, &after.property_id, flags)
                    .await,
                failures,
            );
        }
    }

    /// Errors from the primary store (the sibling lookup) still abort;
    /// collaborator failures are collected and the checklist keeps going.
    async fn rental_effects(
        &self,
        ctx: &TransactionContext,
        after: &Contract,
        now: DateTime<Utc>,
        failures: &mut Vec<DownstreamError>,
    ) -> LifecycleResult<()> {
        let Some(rental) = after.rental_meta.as_ref() else {
            return Ok(());
        };

        match rental.status {
            ContractStatus::Upcoming => {
                self.note(
                    "property",
                    self.collaborators
                        .properties
                        .update_flags(
                            ctx,
                            &after.property_id,
                            PropertyFlags {
                                has_upcoming_lease: Some(true),
                                ..PropertyFlags::default()
                            },
                        )
                        .await,
                    failures,
                );
                self.tenant_statuses(ctx, after, TenantPropertyStatus::Upcoming, failures)
                    .await;
            }
            ContractStatus::InProgress => {
                // Entering in_progress always clears "upcoming".
                self.note(
                    "property",
                    self.collaborators
                        .properties
                        .update_flags(
                            ctx,
                            &after.property_id,
                            PropertyFlags {
                                has_in_progress_lease: Some(true),
                                has_upcoming_lease: Some(false),
                                ..PropertyFlags::default()
                            },
                        )
                        .await,
                    failures,
                );
            }
            ContractStatus::Active => {
                self.note(
                    "property",
                    self.collaborators
                        .properties
                        .update_flags(
                            ctx,
                            &after.property_id,
                            PropertyFlags {
                                has_active_lease: Some(true),
                                has_upcoming_lease: Some(false),
                                has_in_progress_lease: Some(false),
                                lease_start_date: rental.contract_start_date,
                                lease_end_date: rental.contract_end_date,
                                ..PropertyFlags::default()
                            },
                        )
                        .await,
                    failures,
                );
                self.tenant_statuses(ctx, after, TenantPropertyStatus::Active, failures)
                    .await;
            }
            ContractStatus::Closed => {
                // A newer upcoming lease on the same property keeps the
                // property's "has upcoming" flag alive.
                let sibling_upcoming = self
                    .repository
                    .sibling_upcoming_exists(ctx, &after.property_id, &after.id)
                    .await?;
                self.note(
                    "property",
                    self.collaborators
                        .properties
                        .update_flags(
                            ctx,
                            &after.property_id,
                            PropertyFlags {
                                has_active_lease: Some(false),
                                has_in_progress_lease: Some(false),
                                has_upcoming_lease: if sibling_upcoming {
                                    None
                                } else {
                                    Some(false)
                                },
                                ..PropertyFlags::default()
                            },
                        )
                        .await,
                    failures,
                );
                self.tenant_statuses(ctx, after, TenantPropertyStatus::Closed, failures)
                    .await;

                let termination_date = rental
                    .contract_end_date
                    .unwrap_or_else(|| now.date_naive());
                self.note(
                    "invoice",
                    self.collaborators
                        .invoices
                        .create_credit_note_invoices(ctx, &after.id, termination_date)
                        .await,
                    failures,
                );
                self.note(
                    "queue",
                    self.collaborators
                        .queue
                        .enqueue(
                            ctx,
                            QueueTask {
                                event: QueueEvent::Notification,
                                action: QueueAction::SendContractClosedNotice,
                                destination: after.partner_id.clone(),
                                params: json!({ "contract_id": after.id }),
                                priority: QueuePriority::Normal,
                            },
                        )
                        .await,
                    failures,
                );
            }
            ContractStatus::New => {}
        }
        Ok(())
    }

    async fn tenant_statuses(
        &self,
        ctx: &TransactionContext,
        after: &Contract,
        status: TenantPropertyStatus,
        failures: &mut Vec<DownstreamError>,
    ) {
        let Some(rental) = after.rental_meta.as_ref() else {
            return;
        };
        for tenant_id in rental.tenant_ids() {
            self.note(
                "tenant",
                self.collaborators
                    .tenants
                    .update_property_status(ctx, tenant_id, &after.property_id, &after.id, status)
                    .await,
                failures,
            );
        }
    }

    /// Route an invoice lifecycle event into the eviction case engine.
    pub async fn handle_invoice_event(
        &self,
        ctx: &TransactionContext,
        event: InvoiceEvent,
        now: DateTime<Utc>,
    ) -> LifecycleResult<CaseChange> {
        match event {
            InvoiceEvent::Defaulted(invoice) => self.evictions.create_case(ctx, &invoice).await,
            InvoiceEvent::EvictionReminderSent(invoice) => {
                self.evictions.update_case(ctx, &invoice).await
            }
            InvoiceEvent::PaymentApplied {
                partner_id,
                contract_id,
                invoice_id,
                paid_amount,
                ignore_remove,
            } => {
                self.evictions
                    .remove_or_update_case(
                        ctx,
                        &partner_id,
                        &invoice_id,
                        &contract_id,
                        paid_amount,
                        ignore_remove,
                        now,
                    )
                    .await
            }
        }
    }

    /// Explicit eviction-case transition from a document-production
    /// workflow (producing the eviction PDF moves `new -> in_progress`).
    pub async fn advance_eviction_case(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        case_invoice_id: &InvoiceId,
        target: EvictionCaseStatus,
        now: DateTime<Utc>,
    ) -> LifecycleResult<CaseChange> {
        self.evictions
            .set_case_status(ctx, contract_id, case_invoice_id, target, now)
            .await
    }

    /// Change lease terms outside a transition, maintaining the history
    /// log (`commissions` accumulates, everything else dedups).
    pub async fn update_lease_terms(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        changes: LeaseTermChanges,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Contract> {
        if changes.monthly_rent_amount.is_none() && changes.commission_amount.is_none() {
            return Err(LifecycleError::validation("no term changes supplied"));
        }
        if changes.monthly_rent_amount.is_some_and(|amount| amount <= 0) {
            return Err(LifecycleError::validation(
                "monthly rent must stay positive",
            ));
        }

        let current = self.repository.get(ctx, contract_id).await?;
        let mut guard = Guard::for_contract(contract_id)
            .and(Predicate::StatusNotIn(vec![ContractStatus::Closed]));
        let mut ops = Vec::new();

        if let Some(amount) = changes.monthly_rent_amount {
            if current.rental_meta.is_none() {
                return Err(LifecycleError::validation(
                    "monthly rent requires an attached lease",
                ));
            }
            guard = guard.and(Predicate::RentalMetaPresent(true));
            let old = current
                .rental_meta
                .as_ref()
                .and_then(|rental| rental.monthly_rent_amount);
            ops.push(Mutation::SetMonthlyRent(amount));
            ops.push(Mutation::PushHistory(HistoryEntry::change(
                "monthly_rent_amount",
                old.map(|value| json!(value)),
                Some(json!(amount)),
                Some(current.updated_at),
                now,
            )));
        }
        if let Some(amount) = changes.commission_amount {
            ops.push(Mutation::SetCommissions(amount));
            ops.push(Mutation::PushHistory(HistoryEntry::change(
                history::COMMISSIONS_FIELD,
                current.commission_amount.map(|value| json!(value)),
                Some(json!(amount)),
                Some(current.updated_at),
                now,
            )));
        }

        let outcome = self
            .repository
            .apply(ctx, guard, ops)
            .await?
            .ok_or_else(|| {
                LifecycleError::precondition("contract closed while updating terms")
            })?;

        self.collaborators
            .log
            .create_log(
                ctx,
                LogEntry {
                    partner_id: outcome.after.partner_id.clone(),
                    action: LogAction::LeaseTermsUpdated,
                    context: json!({ "contract_id": outcome.after.id }),
                    created_at: now,
                },
            )
            .await?;

        Ok(outcome.after)
    }

    /// Signing-vendor callback: record one party's signature. Replays
    /// surface as `PreconditionFailed` for the caller to absorb.
    pub async fn record_signature(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        context: SigningContext,
        role: SignerRole,
        signed_at: DateTime<Utc>,
    ) -> LifecycleResult<Contract> {
        let guard = Guard::for_contract(contract_id)
            .and(Predicate::SignerUnsigned { context, role });
        let ops = vec![Mutation::MarkSigned {
            context,
            role,
            at: signed_at,
        }];

        let outcome = self
            .repository
            .apply(ctx, guard, ops)
            .await?
            .ok_or_else(|| {
                LifecycleError::precondition(format!(
                    "{} already signed for {}",
                    role.label(),
                    context.label()
                ))
            })?;
        info!(
            contract = %contract_id,
            context = context.label(),
            role = role.label(),
            "signature recorded"
        );
        Ok(outcome.after)
    }

    pub async fn run_cpi_schedule(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        today: NaiveDate,
    ) -> LifecycleResult<CpiOutcome> {
        self.cpi.run_for_contract(ctx, contract_id, today).await
    }

    pub async fn run_signing_reminders(
        &self,
        ctx: &TransactionContext,
        now: DateTime<Utc>,
        page: ReminderPage,
    ) -> LifecycleResult<ReminderRunReport> {
        self.reminders.run(ctx, now, page).await
    }

    /// Walk the whole contract set in configured page sizes and merge
    /// the per-page reports. This is the entry point for the daily
    /// reminder batch.
    pub async fn run_signing_reminder_sweep(
        &self,
        ctx: &TransactionContext,
        now: DateTime<Utc>,
    ) -> LifecycleResult<ReminderRunReport> {
        let mut report = ReminderRunReport::default();
        let mut skip = 0;
        loop {
            let page = self
                .reminders
                .run(
                    ctx,
                    now,
                    ReminderPage {
                        skip,
                        limit: self.reminder_page_size,
                    },
                )
                .await?;
            let scanned = page.scanned;
            report.scanned += scanned;
            report.sent.extend(page.sent);
            if scanned < self.reminder_page_size {
                break;
            }
            skip += scanned;
        }
        Ok(report)
    }

    /// Completion loop-back from an async worker carrying the original
    /// queue task id.
    pub async fn acknowledge_task(
        &self,
        ctx: &TransactionContext,
        task_id: &TaskId,
    ) -> LifecycleResult<()> {
        self.collaborators.queue.complete(ctx, task_id).await?;
        Ok(())
    }

    /// Downstream calls are best-effort after the primary write: log the
    /// failure, keep it for the caller, never roll back.
    fn note<T>(
        &self,
        service: &'static str,
        result: Result<T, DownstreamError>,
        failures: &mut Vec<DownstreamError>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(downstream) => {
                error!(service, %downstream, "downstream side effect failed");
                failures.push(downstream);
                None
            }
        }
    }
}

/// Surface the first collected downstream failure once the checklist
/// has run to the end.
fn surface<T>(value: T, failures: Vec<DownstreamError>) -> LifecycleResult<T> {
    match failures.into_iter().next() {
        Some(failure) => Err(LifecycleError::Downstream(failure)),
        None => Ok(value),
    }
}
