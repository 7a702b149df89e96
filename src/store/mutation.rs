//! Closed set of mutation operations applied under a matched guard.
//!
//! Every write in the system is expressed through these ops so a store
//! can apply a transition atomically with its serial allocation. The
//! serial-allocating ops resolve their counter through a callback the
//! store supplies, keeping counter increments inside the same atomic
//! apply as the status write.

use chrono::{DateTime, Months, NaiveDate, Utc};

use crate::contract::domain::{
    Contract, ContractStatus, CpiNotification, EvictionCase, EvictionCaseStatus, HistoryEntry,
    InvoiceId, RentalMeta, SignerRole, SigningContext, TerminatedBy,
};
use crate::contract::history;

/// One atomic field-level operation on a contract document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetStatus(ContractStatus),
    SetRentalStatus(ContractStatus),
    AttachRentalMeta(RentalMeta),
    /// Assign the next per-partner/per-property assignment serial if the
    /// contract does not carry one yet.
    AllocateAssignmentSerial { counter_key: String },
    /// Assign the next per-partner/per-property lease serial if the lease
    /// does not carry one yet.
    AllocateLeaseSerial { counter_key: String },
    SetTermination {
        terminated_by: TerminatedBy,
        contract_end_date: Option<NaiveDate>,
        notice_send_date: Option<NaiveDate>,
    },
    SetMonthlyRent(i64),
    SetCommissions(i64),
    PushEvictionCase(EvictionCase),
    /// Add a member invoice to an existing case and bump its amount.
    AppendCaseInvoice {
        case_invoice_id: InvoiceId,
        invoice_id: InvoiceId,
        amount: i64,
    },
    /// Drop a paid member invoice from a case and reduce its amount.
    SettleCaseInvoice {
        case_invoice_id: InvoiceId,
        invoice_id: InvoiceId,
        amount: i64,
    },
    RemoveCase { case_invoice_id: InvoiceId },
    SetCaseStatus {
        case_invoice_id: InvoiceId,
        status: EvictionCaseStatus,
    },
    /// Record a sent rent-index notification and its projection window.
    ScheduleCpiNotification {
        sent_on: DateTime<Utc>,
        future_rent_amount: i64,
        from_month: NaiveDate,
        in_month: NaiveDate,
    },
    RollNextCpiDate { months: u32 },
    /// Close out the current CPI cycle: stamp the last date and push the
    /// next renegotiation forward.
    AdvanceCpiCycle { months: u32 },
    ClearCpiNotification,
    StampReminderSent {
        context: SigningContext,
        role: SignerRole,
        at: DateTime<Utc>,
    },
    MarkSigned {
        context: SigningContext,
        role: SignerRole,
        at: DateTime<Utc>,
    },
    PushHistory(HistoryEntry),
}

impl Mutation {
    /// Apply the operation in place. `next_serial` resolves a monotonic
    /// counter within the same transaction as the rest of the write.
    pub fn apply(&self, contract: &mut Contract, next_serial: &mut dyn FnMut(&str) -> i64) {
        match self {
            Self::SetStatus(status) => contract.status = *status,
            Self::SetRentalStatus(status) => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    rental.status = *status;
                }
            }
            Self::AttachRentalMeta(rental) => contract.rental_meta = Some(rental.clone()),
            Self::AllocateAssignmentSerial { counter_key } => {
                if contract.assignment_serial.is_none() {
                    contract.assignment_serial = Some(next_serial(counter_key));
                }
            }
            Self::AllocateLeaseSerial { counter_key } => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    if rental.lease_serial.is_none() {
                        rental.lease_serial = Some(next_serial(counter_key));
                    }
                }
            }
            Self::SetTermination {
                terminated_by,
                contract_end_date,
                notice_send_date,
            } => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    rental.terminated_by = Some(*terminated_by);
                    if contract_end_date.is_some() {
                        rental.contract_end_date = *contract_end_date;
                    }
                    rental.natural_terminated_notice_send_date = *notice_send_date;
                }
            }
            Self::SetMonthlyRent(amount) => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    rental.monthly_rent_amount = Some(*amount);
                }
            }
            Self::SetCommissions(amount) => contract.commission_amount = Some(*amount),
            Self::PushEvictionCase(case) => contract.eviction_cases.push(case.clone()),
            Self::AppendCaseInvoice {
                case_invoice_id,
                invoice_id,
                amount,
            } => {
                if let Some(case) = case_mut(contract, case_invoice_id) {
                    if !case.eviction_invoice_ids.contains(invoice_id) {
                        case.eviction_invoice_ids.push(invoice_id.clone());
                    }
                    case.amount += amount;
                }
            }
            Self::SettleCaseInvoice {
                case_invoice_id,
                invoice_id,
                amount,
            } => {
                if let Some(case) = case_mut(contract, case_invoice_id) {
                    case.eviction_invoice_ids.retain(|id| id != invoice_id);
                    case.amount = (case.amount - amount).max(0);
                }
            }
            Self::RemoveCase { case_invoice_id } => contract
                .eviction_cases
                .retain(|case| case.invoice_id != *case_invoice_id),
            Self::SetCaseStatus {
                case_invoice_id,
                status,
            } => {
                if let Some(case) = case_mut(contract, case_invoice_id) {
                    case.status = *status;
                }
            }
            Self::ScheduleCpiNotification {
                sent_on,
                future_rent_amount,
                from_month,
                in_month,
            } => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    rental.cpi.last_notification_sent_on = Some(*sent_on);
                    rental.cpi.future_rent_amount = Some(*future_rent_amount);
                    rental.cpi.cpi_from_month = Some(*from_month);
                    rental.cpi.cpi_in_month = Some(*in_month);
                    rental.cpi.notification_sent_history.push(CpiNotification {
                        sent_on: *sent_on,
                        future_rent_amount: *future_rent_amount,
                        from_month: *from_month,
                        in_month: *in_month,
                    });
                }
            }
            Self::RollNextCpiDate { months } => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    if let Some(next) = rental.cpi.next_cpi_date {
                        rental.cpi.next_cpi_date =
                            next.checked_add_months(Months::new(*months)).or(Some(next));
                    }
                }
            }
            Self::AdvanceCpiCycle { months } => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    if let Some(next) = rental.cpi.next_cpi_date {
                        rental.cpi.last_cpi_date = Some(next);
                        rental.cpi.next_cpi_date =
                            next.checked_add_months(Months::new(*months)).or(Some(next));
                    }
                }
            }
            Self::ClearCpiNotification => {
                if let Some(rental) = contract.rental_meta.as_mut() {
                    rental.cpi.last_notification_sent_on = None;
                    rental.cpi.future_rent_amount = None;
                    rental.cpi.cpi_from_month = None;
                    rental.cpi.cpi_in_month = None;
                }
            }
            Self::StampReminderSent { context, role, at } => {
                if let Some(slot) = contract
                    .esign_mut(*context)
                    .and_then(|esign| esign.slot_mut(*role))
                {
                    slot.reminder_sent_at = Some(*at);
                }
            }
            Self::MarkSigned { context, role, at } => {
                if let Some(slot) = contract
                    .esign_mut(*context)
                    .and_then(|esign| esign.slot_mut(*role))
                {
                    slot.signed_at = Some(*at);
                }
            }
            Self::PushHistory(entry) => history::record(&mut contract.history, entry.clone()),
        }
    }
}

fn case_mut<'a>(contract: &'a mut Contract, trigger: &InvoiceId) -> Option<&'a mut EvictionCase> {
    contract
        .eviction_cases
        .iter_mut()
        .find(|case| case.invoice_id == *trigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::domain::ContractId;
    use chrono::TimeZone;

    fn contract() -> Contract {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        let mut contract = Contract::new_assignment(
            ContractId("c-1".to_string()),
            "partner-1",
            "property-1",
            "account-1",
            now,
        );
        contract.rental_meta = Some(RentalMeta::new("tenant-1"));
        contract
    }

    fn no_counters(_: &str) -> i64 {
        panic!("no serial allocation expected");
    }

    #[test]
    fn lease_serial_is_allocated_once() {
        let mut contract = contract();
        let mut calls = 0;
        let mut next = |_key: &str| {
            calls += 1;
            41 + calls
        };

        let op = Mutation::AllocateLeaseSerial {
            counter_key: "partner-1:property-1:lease_serial".to_string(),
        };
        op.apply(&mut contract, &mut next);
        op.apply(&mut contract, &mut next);

        assert_eq!(calls, 1);
        assert_eq!(
            contract.rental_meta.as_ref().unwrap().lease_serial,
            Some(42)
        );
    }

    #[test]
    fn append_and_settle_case_invoices() {
        let mut contract = contract();
        let trigger = InvoiceId("inv-1".to_string());
        contract.eviction_cases.push(EvictionCase {
            invoice_id: trigger.clone(),
            status: EvictionCaseStatus::New,
            eviction_invoice_ids: vec![trigger.clone()],
            amount: 900,
        });

        Mutation::AppendCaseInvoice {
            case_invoice_id: trigger.clone(),
            invoice_id: InvoiceId("inv-2".to_string()),
            amount: 300,
        }
        .apply(&mut contract, &mut no_counters);
        assert_eq!(contract.eviction_cases[0].amount, 1200);
        assert_eq!(contract.eviction_cases[0].eviction_invoice_ids.len(), 2);

        Mutation::SettleCaseInvoice {
            case_invoice_id: trigger.clone(),
            invoice_id: InvoiceId("inv-2".to_string()),
            amount: 300,
        }
        .apply(&mut contract, &mut no_counters);
        assert_eq!(contract.eviction_cases[0].amount, 900);
        assert_eq!(
            contract.eviction_cases[0].eviction_invoice_ids,
            vec![trigger]
        );
    }

    #[test]
    fn cpi_cycle_advances_and_clears() {
        let mut contract = contract();
        let next = Utc.with_ymd_and_hms(2026, 2, 10, 23, 59, 59).unwrap();
        {
            let rental = contract.rental_meta.as_mut().unwrap();
            rental.cpi.enabled = true;
            rental.cpi.next_cpi_date = Some(next);
            rental.cpi.last_notification_sent_on = Some(next);
            rental.cpi.future_rent_amount = Some(125_000);
        }

        Mutation::ClearCpiNotification.apply(&mut contract, &mut no_counters);
        Mutation::AdvanceCpiCycle { months: 12 }.apply(&mut contract, &mut no_counters);

        let rental = contract.rental_meta.as_ref().unwrap();
        assert_eq!(rental.cpi.last_notification_sent_on, None);
        assert_eq!(rental.cpi.future_rent_amount, None);
        assert_eq!(rental.cpi.last_cpi_date, Some(next));
        assert_eq!(
            rental.cpi.next_cpi_date,
            Some(Utc.with_ymd_and_hms(2027, 2, 10, 23, 59, 59).unwrap())
        );
    }
}
