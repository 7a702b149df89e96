//! Status transition engine.
//!
//! Computes the next assignment/rental status pair and the guard that
//! must hold for the write to apply, then issues a single guarded
//! read-modify-write. A guard that matches zero documents means another
//! process already moved the contract or the preconditions never held;
//! both surface as `PreconditionFailed` with no retry from this layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::info;

use crate::contract::domain::{
    Contract, ContractId, ContractStatus, HistoryEntry, TerminatedBy,
};
use crate::contract::ContractRepository;
use crate::error::{LifecycleError, LifecycleResult};
use crate::store::{Guard, Mutation, Predicate, TransactionContext};

/// Termination details attached to a closing transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationDetails {
    pub terminated_by: TerminatedBy,
    pub contract_end_date: Option<NaiveDate>,
    pub notice_send_date: Option<NaiveDate>,
}

/// A requested move of one or both status fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub contract_id: ContractId,
    pub assignment_status: Option<ContractStatus>,
    pub rental_status: Option<ContractStatus>,
    pub termination: Option<TerminationDetails>,
}

impl TransitionRequest {
    pub fn assignment(contract_id: ContractId, target: ContractStatus) -> Self {
        Self {
            contract_id,
            assignment_status: Some(target),
            rental_status: None,
            termination: None,
        }
    }

    pub fn rental(contract_id: ContractId, target: ContractStatus) -> Self {
        Self {
            contract_id,
            assignment_status: None,
            rental_status: Some(target),
            termination: None,
        }
    }
}

/// Pre- and post-image of a committed transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub before: Contract,
    pub after: Contract,
}

#[derive(Clone)]
pub struct TransitionEngine {
    repository: ContractRepository,
}

impl TransitionEngine {
    pub fn new(repository: ContractRepository) -> Self {
        Self { repository }
    }

    pub async fn request_transition(
        &self,
        ctx: &TransactionContext,
        request: &TransitionRequest,
        now: DateTime<Utc>,
    ) -> LifecycleResult<TransitionOutcome> {
        if request.assignment_status.is_none() && request.rental_status.is_none() {
            return Err(LifecycleError::validation(
                "transition request names no target status",
            ));
        }
        if request.assignment_status == Some(ContractStatus::Closed)
            && request.rental_status == Some(ContractStatus::Active)
        {
            return Err(LifecycleError::validation(
                "lease cannot activate while the assignment closes",
            ));
        }

        let current = self.repository.get(ctx, &request.contract_id).await?;
        if request.rental_status.is_some() && current.rental_meta.is_none() {
            return Err(LifecycleError::validation(
                "contract has no lease to transition",
            ));
        }

        let mut guard = Guard::for_contract(&request.contract_id);
        let mut ops: Vec<Mutation> = Vec::new();

        if let Some(target) = request.assignment_status {
            let sources = sources_for(target)?;
            guard = guard.and(Predicate::StatusIn(sources));
            ops.push(Mutation::SetStatus(target));
            ops.push(Mutation::PushHistory(HistoryEntry::change(
                "status",
                Some(json!(current.status.label())),
                Some(json!(target.label())),
                Some(current.updated_at),
                now,
            )));

            if serial_worthy(target) && current.assignment_serial.is_none() {
                guard = guard.and(Predicate::AssignmentSerialUnassigned);
                ops.push(Mutation::AllocateAssignmentSerial {
                    counter_key: serial_key(&current, "assignment_serial"),
                });
            }
        }

        if let Some(target) = request.rental_status {
            let sources = sources_for(target)?;
            guard = guard
                .and(Predicate::RentalMetaPresent(true))
                .and(Predicate::RentalStatusIn(sources));
            if target == ContractStatus::Active {
                // Causal link: a lease never activates under a closed mandate.
                guard = guard.and(Predicate::StatusNotIn(vec![ContractStatus::Closed]));
            }
            ops.push(Mutation::SetRentalStatus(target));
            ops.push(Mutation::PushHistory(HistoryEntry::change(
                "rental_meta.status",
                current
                    .rental_status()
                    .map(|status| json!(status.label())),
                Some(json!(target.label())),
                Some(current.updated_at),
                now,
            )));

            let lease_serial_unassigned = current
                .rental_meta
                .as_ref()
                .is_some_and(|rental| rental.lease_serial.is_none());
            if serial_worthy(target) && lease_serial_unassigned {
                guard = guard.and(Predicate::LeaseSerialUnassigned);
                ops.push(Mutation::AllocateLeaseSerial {
                    counter_key: serial_key(&current, "lease_serial"),
                });
            }

            if target == ContractStatus::Closed {
                if let Some(termination) = &request.termination {
                    ops.push(Mutation::SetTermination {
                        terminated_by: termination.terminated_by,
                        contract_end_date: termination.contract_end_date,
                        notice_send_date: termination.notice_send_date,
                    });
                }
            }
        }

        let outcome = self
            .repository
            .apply(ctx, guard, ops)
            .await?
            .ok_or_else(|| {
                LifecycleError::precondition(format!(
                    "contract {} state changed; transition no longer applies",
                    request.contract_id
                ))
            })?;

        info!(
            contract = %request.contract_id,
            status = outcome.after.status.label(),
            rental_status = outcome
                .after
                .rental_status()
                .map(ContractStatus::label)
                .unwrap_or("-"),
            tx = ctx.id(),
            "contract transition committed"
        );

        Ok(TransitionOutcome {
            before: outcome.before,
            after: outcome.after,
        })
    }
}

fn sources_for(target: ContractStatus) -> LifecycleResult<Vec<ContractStatus>> {
    let sources = ContractStatus::sources_of(target);
    if sources.is_empty() {
        return Err(LifecycleError::validation(format!(
            "no transition enters status {}",
            target.label()
        )));
    }
    Ok(sources.to_vec())
}

/// Serials are issued the first time a contract enters `upcoming` or
/// `active` on the relevant side.
fn serial_worthy(target: ContractStatus) -> bool {
    matches!(target, ContractStatus::Upcoming | ContractStatus::Active)
}

fn serial_key(contract: &Contract, kind: &str) -> String {
    format!("{}:{}:{}", contract.partner_id, contract.property_id, kind)
}
