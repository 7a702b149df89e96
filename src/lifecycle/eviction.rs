//! Eviction case engine.
//!
//! Cases are embedded sub-entities on the contract, driven by invoice
//! lifecycle events delivered at least once. Creation and appends are
//! guarded pushes, so a replayed event matches zero documents and is
//! absorbed as a skip rather than producing a duplicate case.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::contract::domain::{
    Contract, ContractId, EvictionCase, EvictionCaseStatus, InvoiceId,
};
use crate::contract::ContractRepository;
use crate::error::{LifecycleError, LifecycleResult};
use crate::services::{
    Invoice, InvoiceService, LogAction, LogEntry, LogService, PartnerSettingService, QueueAction,
    QueueEvent, QueuePriority, QueueTask, WorkQueue,
};
use crate::store::{Guard, Mutation, Predicate, TransactionContext};

use std::sync::Arc;

/// Why an invoice event produced no case change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSkip {
    PackageDisabled,
    NoOverdueInvoices,
    AlreadyTracked,
    NoOpenCase,
}

/// Result of routing one invoice event into the case engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseChange {
    Created(EvictionCase),
    Appended {
        case_invoice_id: InvoiceId,
        amount: i64,
    },
    Settled {
        case_invoice_id: InvoiceId,
        removed: bool,
        remaining_amount: i64,
    },
    StatusChanged {
        case_invoice_id: InvoiceId,
        status: EvictionCaseStatus,
    },
    Skipped(CaseSkip),
}

#[derive(Clone)]
pub struct EvictionEngine {
    repository: ContractRepository,
    invoices: Arc<dyn InvoiceService>,
    settings: Arc<dyn PartnerSettingService>,
    log: Arc<dyn LogService>,
    queue: Arc<dyn WorkQueue>,
}

impl EvictionEngine {
    pub fn new(
        repository: ContractRepository,
        invoices: Arc<dyn InvoiceService>,
        settings: Arc<dyn PartnerSettingService>,
        log: Arc<dyn LogService>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            repository,
            invoices,
            settings,
            log,
            queue,
        }
    }

    /// Open a case for a defaulted invoice. Requires the partner's
    /// eviction package and at least one overdue invoice still
    /// attributable to the same tenant; a no-op otherwise.
    pub async fn create_case(
        &self,
        ctx: &TransactionContext,
        invoice: &Invoice,
    ) -> LifecycleResult<CaseChange> {
        let settings = self.settings.settings(&invoice.partner_id).await?;
        if !settings.eviction_package_enabled {
            return Ok(CaseChange::Skipped(CaseSkip::PackageDisabled));
        }

        let overdue = self
            .invoices
            .find_overdue_invoices(ctx, &invoice.contract_id)
            .await?;
        let attributable: Vec<&Invoice> = overdue
            .iter()
            .filter(|candidate| candidate.overdue && candidate.tenant_id == invoice.tenant_id)
            .collect();
        if attributable.is_empty() {
            return Ok(CaseChange::Skipped(CaseSkip::NoOverdueInvoices));
        }

        let mut eviction_invoice_ids: Vec<InvoiceId> = attributable
            .iter()
            .map(|candidate| candidate.id.clone())
            .collect();
        let mut amount: i64 = attributable
            .iter()
            .map(|candidate| candidate.amount_due)
            .sum();
        // The trigger may not be in the overdue set yet; track it with
        // its amount so the id list and the total stay consistent.
        if !eviction_invoice_ids.contains(&invoice.id) {
            eviction_invoice_ids.push(invoice.id.clone());
            amount += invoice.amount_due;
        }

        let case = EvictionCase {
            invoice_id: invoice.id.clone(),
            status: EvictionCaseStatus::New,
            eviction_invoice_ids,
            amount,
        };

        let guard = Guard::for_contract(&invoice.contract_id)
            .and(Predicate::NoOpenCaseForInvoice(invoice.id.clone()));
        let outcome = self
            .repository
            .apply(ctx, guard, vec![Mutation::PushEvictionCase(case.clone())])
            .await?;

        match outcome {
            Some(_) => {
                info!(
                    contract = %invoice.contract_id,
                    invoice = %invoice.id,
                    amount,
                    "eviction case opened"
                );
                // Kick off production of the eviction document; its
                // completion is what moves the case to in_progress.
                self.queue
                    .enqueue(
                        ctx,
                        QueueTask {
                            event: QueueEvent::DocumentProduction,
                            action: QueueAction::ProduceEvictionDocument,
                            destination: invoice.partner_id.clone(),
                            params: json!({
                                "contract_id": invoice.contract_id,
                                "invoice_id": invoice.id,
                            }),
                            priority: QueuePriority::High,
                        },
                    )
                    .await?;
                Ok(CaseChange::Created(case))
            }
            None => Ok(CaseChange::Skipped(CaseSkip::AlreadyTracked)),
        }
    }

    /// Fold a changed invoice into the still-open case, once.
    pub async fn update_case(
        &self,
        ctx: &TransactionContext,
        invoice: &Invoice,
    ) -> LifecycleResult<CaseChange> {
        let contract = self.repository.get(ctx, &invoice.contract_id).await?;
        let Some(open) = contract.open_case() else {
            return Ok(CaseChange::Skipped(CaseSkip::NoOpenCase));
        };
        let case_invoice_id = open.invoice_id.clone();

        let guard = Guard::for_contract(&invoice.contract_id)
            .and(Predicate::CaseStatusIn {
                case_invoice_id: case_invoice_id.clone(),
                statuses: vec![EvictionCaseStatus::New, EvictionCaseStatus::InProgress],
            })
            .and(Predicate::OpenCaseTracks {
                case_invoice_id: case_invoice_id.clone(),
                invoice_id: invoice.id.clone(),
                tracked: false,
            });
        let ops = vec![Mutation::AppendCaseInvoice {
            case_invoice_id: case_invoice_id.clone(),
            invoice_id: invoice.id.clone(),
            amount: invoice.amount_due,
        }];

        match self.repository.apply(ctx, guard, ops).await? {
            Some(_) => Ok(CaseChange::Appended {
                case_invoice_id,
                amount: invoice.amount_due,
            }),
            None => Ok(CaseChange::Skipped(CaseSkip::AlreadyTracked)),
        }
    }

    /// Settle a fully paid invoice against its case: remove the case when
    /// nothing else keeps it alive (unless `ignore_remove`), otherwise
    /// decrement the tracked amount.
    ///
    /// Removal logs a denormalized snapshot of the case *before* the
    /// pull; the data is gone from the document afterwards.
    #[allow(clippy::too_many_arguments)]
    pub async fn remove_or_update_case(
        &self,
        ctx: &TransactionContext,
        partner_id: &str,
        invoice_id: &InvoiceId,
        contract_id: &ContractId,
        paid_amount: i64,
        ignore_remove: bool,
        now: DateTime<Utc>,
    ) -> LifecycleResult<CaseChange> {
        let contract = self.repository.get(ctx, contract_id).await?;
        let Some(case) = contract.open_case_tracking(invoice_id) else {
            return Ok(CaseChange::Skipped(CaseSkip::NoOpenCase));
        };
        let case_invoice_id = case.invoice_id.clone();
        let last_reference =
            case.eviction_invoice_ids.len() == 1 && case.eviction_invoice_ids[0] == *invoice_id;

        if last_reference && !ignore_remove {
            self.log
                .create_log(ctx, removal_snapshot(partner_id, &contract, case, now))
                .await?;

            let guard = Guard::for_contract(contract_id)
                .and(Predicate::CaseStatusIn {
                    case_invoice_id: case_invoice_id.clone(),
                    statuses: vec![EvictionCaseStatus::New, EvictionCaseStatus::InProgress],
                })
                .and(Predicate::OpenCaseTracks {
                    case_invoice_id: case_invoice_id.clone(),
                    invoice_id: invoice_id.clone(),
                    tracked: true,
                });
            let ops = vec![Mutation::RemoveCase {
                case_invoice_id: case_invoice_id.clone(),
            }];
            match self.repository.apply(ctx, guard, ops).await? {
                Some(_) => {
                    info!(contract = %contract_id, invoice = %invoice_id, "eviction case removed");
                    Ok(CaseChange::Settled {
                        case_invoice_id,
                        removed: true,
                        remaining_amount: 0,
                    })
                }
                None => {
                    warn!(
                        contract = %contract_id,
                        invoice = %invoice_id,
                        "case moved while settling; payment event absorbed"
                    );
                    Ok(CaseChange::Skipped(CaseSkip::NoOpenCase))
                }
            }
        } else {
            let guard = Guard::for_contract(contract_id).and(Predicate::OpenCaseTracks {
                case_invoice_id: case_invoice_id.clone(),
                invoice_id: invoice_id.clone(),
                tracked: true,
            });
            let ops = vec![Mutation::SettleCaseInvoice {
                case_invoice_id: case_invoice_id.clone(),
                invoice_id: invoice_id.clone(),
                amount: paid_amount,
            }];
            match self.repository.apply(ctx, guard, ops).await? {
                Some(outcome) => {
                    let remaining_amount = outcome
                        .after
                        .case_by_trigger(&case_invoice_id)
                        .map(|case| case.amount)
                        .unwrap_or(0);
                    Ok(CaseChange::Settled {
                        case_invoice_id,
                        removed: false,
                        remaining_amount,
                    })
                }
                None => Ok(CaseChange::Skipped(CaseSkip::NoOpenCase)),
            }
        }
    }

    /// Explicit case-status transition, guarded like contract transitions.
    /// Document production moves a case `new -> in_progress` and queues
    /// the follow-up eviction notice.
    pub async fn set_case_status(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        case_invoice_id: &InvoiceId,
        target: EvictionCaseStatus,
        now: DateTime<Utc>,
    ) -> LifecycleResult<CaseChange> {
        let sources = EvictionCaseStatus::sources_of(target);
        if sources.is_empty() {
            return Err(LifecycleError::validation(format!(
                "no transition enters case status {}",
                target.label()
            )));
        }

        let guard = Guard::for_contract(contract_id).and(Predicate::CaseStatusIn {
            case_invoice_id: case_invoice_id.clone(),
            statuses: sources.to_vec(),
        });
        let ops = vec![Mutation::SetCaseStatus {
            case_invoice_id: case_invoice_id.clone(),
            status: target,
        }];

        let outcome = self
            .repository
            .apply(ctx, guard, ops)
            .await?
            .ok_or_else(|| {
                LifecycleError::precondition(format!(
                    "eviction case {case_invoice_id} cannot move to {}",
                    target.label()
                ))
            })?;

        self.log
            .create_log(
                ctx,
                LogEntry {
                    partner_id: outcome.after.partner_id.clone(),
                    action: LogAction::EvictionCaseStatusChanged,
                    context: json!({
                        "contract_id": outcome.after.id,
                        "invoice_id": case_invoice_id,
                        "status": target.label(),
                    }),
                    created_at: now,
                },
            )
            .await?;

        if target == EvictionCaseStatus::InProgress {
            self.queue
                .enqueue(
                    ctx,
                    QueueTask {
                        event: QueueEvent::Notification,
                        action: QueueAction::SendEvictionNotice,
                        destination: outcome.after.partner_id.clone(),
                        params: json!({
                            "contract_id": outcome.after.id,
                            "invoice_id": case_invoice_id,
                        }),
                        priority: QueuePriority::High,
                    },
                )
                .await?;
        }

        Ok(CaseChange::StatusChanged {
            case_invoice_id: case_invoice_id.clone(),
            status: target,
        })
    }
}

/// Denormalized audit snapshot of a case about to disappear.
fn removal_snapshot(
    partner_id: &str,
    contract: &Contract,
    case: &EvictionCase,
    now: DateTime<Utc>,
) -> LogEntry {
    let rental = contract.rental_meta.as_ref();
    LogEntry {
        partner_id: partner_id.to_string(),
        action: LogAction::EvictionCaseRemoved,
        context: json!({
            "contract_id": contract.id,
            "account_id": contract.account_id,
            "property_id": contract.property_id,
            "tenant_id": rental.and_then(|meta| meta.tenant_id.clone()),
            "lease_serial": rental.and_then(|meta| meta.lease_serial),
            "invoice_id": case.invoice_id,
            "amount": case.amount,
        }),
        created_at: now,
    }
}
