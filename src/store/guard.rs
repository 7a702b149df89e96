//! Guard predicates for conditional writes.
//!
//! A [`Guard`] is a conjunction of predicates over a contract's current
//! field values. It is the system's only concurrency-control mechanism:
//! the guard *is* the precondition, and a guarded write that matches zero
//! documents means another process already moved the document.

use chrono::{DateTime, NaiveDate, Utc};

use crate::contract::domain::{
    Contract, ContractId, ContractStatus, EvictionCaseStatus, InvoiceId, SignerRole,
    SigningContext,
};

/// One field-level precondition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    IdEquals(ContractId),
    StatusIn(Vec<ContractStatus>),
    StatusNotIn(Vec<ContractStatus>),
    RentalStatusIn(Vec<ContractStatus>),
    RentalMetaPresent(bool),
    AssignmentSerialUnassigned,
    LeaseSerialUnassigned,
    /// No open case tracks the invoice, as trigger or member.
    NoOpenCaseForInvoice(InvoiceId),
    /// The open case triggered by `case_invoice_id` tracks (or does not
    /// track) `invoice_id` among its member invoices.
    OpenCaseTracks {
        case_invoice_id: InvoiceId,
        invoice_id: InvoiceId,
        tracked: bool,
    },
    CaseStatusIn {
        case_invoice_id: InvoiceId,
        statuses: Vec<EvictionCaseStatus>,
    },
    CpiNotificationPending(bool),
    NextCpiOnOrBefore(DateTime<Utc>),
    /// Whether a future rent is projectable as of the given date: a rent
    /// amount exists and the lease is open-ended or ends after the date.
    FutureRentComputableAsOf {
        as_of: NaiveDate,
        expected: bool,
    },
    SignerUnsigned {
        context: SigningContext,
        role: SignerRole,
    },
    /// The signer's reminder stamp still matches the value observed when
    /// the batch selected the contract.
    ReminderStateUnchanged {
        context: SigningContext,
        role: SignerRole,
        seen: Option<DateTime<Utc>>,
    },
}

impl Predicate {
    pub fn matches(&self, contract: &Contract) -> bool {
        match self {
            Self::IdEquals(id) => contract.id == *id,
            Self::StatusIn(statuses) => statuses.contains(&contract.status),
            Self::StatusNotIn(statuses) => !statuses.contains(&contract.status),
            Self::RentalStatusIn(statuses) => contract
                .rental_status()
                .is_some_and(|status| statuses.contains(&status)),
            Self::RentalMetaPresent(expected) => contract.rental_meta.is_some() == *expected,
            Self::AssignmentSerialUnassigned => contract.assignment_serial.is_none(),
            Self::LeaseSerialUnassigned => contract
                .rental_meta
                .as_ref()
                .is_some_and(|rental| rental.lease_serial.is_none()),
            Self::NoOpenCaseForInvoice(invoice_id) => {
                contract.open_case_tracking(invoice_id).is_none()
            }
            Self::OpenCaseTracks {
                case_invoice_id,
                invoice_id,
                tracked,
            } => contract
                .case_by_trigger(case_invoice_id)
                .filter(|case| case.status.is_open())
                .is_some_and(|case| case.eviction_invoice_ids.contains(invoice_id) == *tracked),
            Self::CaseStatusIn {
                case_invoice_id,
                statuses,
            } => contract
                .case_by_trigger(case_invoice_id)
                .is_some_and(|case| statuses.contains(&case.status)),
            Self::CpiNotificationPending(expected) => contract
                .rental_meta
                .as_ref()
                .is_some_and(|rental| rental.cpi.notification_pending() == *expected),
            Self::NextCpiOnOrBefore(date) => contract
                .rental_meta
                .as_ref()
                .and_then(|rental| rental.cpi.next_cpi_date)
                .is_some_and(|next| next <= *date),
            Self::FutureRentComputableAsOf { as_of, expected } => {
                contract.rental_meta.as_ref().is_some_and(|rental| {
                    let computable = rental.monthly_rent_amount.is_some()
                        && rental.contract_end_date.is_none_or(|end| end > *as_of);
                    computable == *expected
                })
            }
            Self::SignerUnsigned { context, role } => contract
                .esign(*context)
                .and_then(|esign| esign.slot(*role))
                .is_some_and(|slot| !slot.is_signed()),
            Self::ReminderStateUnchanged {
                context,
                role,
                seen,
            } => contract
                .esign(*context)
                .and_then(|esign| esign.slot(*role))
                .is_some_and(|slot| slot.reminder_sent_at == *seen),
        }
    }
}

/// Conjunction of [`Predicate`]s anchored on one contract id.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    predicates: Vec<Predicate>,
}

impl Guard {
    pub fn for_contract(id: &ContractId) -> Self {
        Self {
            predicates: vec![Predicate::IdEquals(id.clone())],
        }
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, contract: &Contract) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(contract))
    }

    /// The id anchor, used by stores to locate the candidate document.
    pub fn contract_id(&self) -> Option<&ContractId> {
        self.predicates.iter().find_map(|predicate| match predicate {
            Predicate::IdEquals(id) => Some(id),
            _ => None,
        })
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::domain::{EvictionCase, RentalMeta};
    use chrono::{TimeZone, Utc};

    fn contract() -> Contract {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        let mut contract = Contract::new_assignment(
            ContractId("c-1".to_string()),
            "partner-1",
            "property-1",
            "account-1",
            now,
        );
        contract.status = ContractStatus::Upcoming;
        contract.rental_meta = Some(RentalMeta::new("tenant-1"));
        contract
    }

    #[test]
    fn status_predicates() {
        let contract = contract();
        assert!(Predicate::StatusIn(vec![ContractStatus::Upcoming]).matches(&contract));
        assert!(!Predicate::StatusIn(vec![ContractStatus::Active]).matches(&contract));
        assert!(Predicate::StatusNotIn(vec![ContractStatus::Closed]).matches(&contract));
        assert!(Predicate::RentalStatusIn(vec![ContractStatus::New]).matches(&contract));
    }

    #[test]
    fn open_case_predicates() {
        let mut contract = contract();
        let trigger = InvoiceId("inv-1".to_string());
        contract.eviction_cases.push(EvictionCase {
            invoice_id: trigger.clone(),
            status: EvictionCaseStatus::New,
            eviction_invoice_ids: vec![trigger.clone()],
            amount: 900,
        });

        assert!(!Predicate::NoOpenCaseForInvoice(trigger.clone()).matches(&contract));
        assert!(
            Predicate::NoOpenCaseForInvoice(InvoiceId("inv-2".to_string())).matches(&contract)
        );
        assert!(Predicate::OpenCaseTracks {
            case_invoice_id: trigger.clone(),
            invoice_id: InvoiceId("inv-2".to_string()),
            tracked: false,
        }
        .matches(&contract));

        contract.eviction_cases[0].status = EvictionCaseStatus::Completed;
        assert!(Predicate::NoOpenCaseForInvoice(trigger).matches(&contract));
    }

    #[test]
    fn cpi_predicates_respect_boundaries() {
        let mut contract = contract();
        let next = Utc.with_ymd_and_hms(2026, 2, 10, 23, 59, 59).unwrap();
        if let Some(rental) = contract.rental_meta.as_mut() {
            rental.cpi.enabled = true;
            rental.cpi.next_cpi_date = Some(next);
            rental.monthly_rent_amount = Some(120_000);
        }

        // Boundary: equality counts as due.
        assert!(Predicate::NextCpiOnOrBefore(next).matches(&contract));
        assert!(!Predicate::NextCpiOnOrBefore(next - chrono::Duration::seconds(1))
            .matches(&contract));
        assert!(Predicate::CpiNotificationPending(false).matches(&contract));
        assert!(Predicate::FutureRentComputableAsOf {
            as_of: next.date_naive(),
            expected: true,
        }
        .matches(&contract));
    }

    #[test]
    fn guard_is_a_conjunction() {
        let contract = contract();
        let guard = Guard::for_contract(&contract.id)
            .and(Predicate::StatusIn(vec![ContractStatus::Upcoming]))
            .and(Predicate::RentalMetaPresent(true));
        assert!(guard.matches(&contract));

        let failing = Guard::for_contract(&contract.id)
            .and(Predicate::StatusIn(vec![ContractStatus::Upcoming]))
            .and(Predicate::LeaseSerialUnassigned)
            .and(Predicate::StatusNotIn(vec![ContractStatus::Upcoming]));
        assert!(!failing.matches(&contract));
    }
}
