//! In-memory reference implementation of the conditional store.
//!
//! Contracts and the monotonic serial counters live under one lock, so a
//! serial-allocating mutation commits atomically with its status write,
//! the same way a backing database session would cover both.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::contract::domain::{Contract, ContractId, ContractStatus};

use super::{ConditionalStore, Guard, Mutation, StoreError, TransactionContext, UpdateOutcome};

#[derive(Debug, Default)]
struct MemoryState {
    contracts: BTreeMap<ContractId, Contract>,
    counters: BTreeMap<String, i64>,
}

/// Shared in-memory store, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a serial counter without incrementing it.
    pub async fn counter_value(&self, key: &str) -> i64 {
        let state = self.state.lock().await;
        state.counters.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ConditionalStore for MemoryStore {
    async fn insert(
        &self,
        _ctx: &TransactionContext,
        contract: Contract,
    ) -> Result<Contract, StoreError> {
        let mut state = self.state.lock().await;
        if state.contracts.contains_key(&contract.id) {
            return Err(StoreError::DuplicateId(contract.id.to_string()));
        }
        state.contracts.insert(contract.id.clone(), contract.clone());
        Ok(contract)
    }

    async fn fetch(
        &self,
        _ctx: &TransactionContext,
        id: &ContractId,
    ) -> Result<Option<Contract>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.contracts.get(id).cloned())
    }

    async fn page(
        &self,
        _ctx: &TransactionContext,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Contract>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .contracts
            .values()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_upcoming_for_property(
        &self,
        _ctx: &TransactionContext,
        property_id: &str,
        exclude: &ContractId,
    ) -> Result<Vec<Contract>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .contracts
            .values()
            .filter(|contract| {
                contract.id != *exclude
                    && contract.property_id == property_id
                    && contract.rental_status() == Some(ContractStatus::Upcoming)
            })
            .cloned()
            .collect())
    }

    async fn guarded_update(
        &self,
        _ctx: &TransactionContext,
        guard: Guard,
        ops: Vec<Mutation>,
    ) -> Result<Option<UpdateOutcome>, StoreError> {
        let mut state = self.state.lock().await;

        let matched = match guard.contract_id() {
            Some(id) => state.contracts.get(id).filter(|doc| guard.matches(doc)),
            None => state.contracts.values().find(|doc| guard.matches(doc)),
        };
        let Some(before) = matched.cloned() else {
            return Ok(None);
        };

        let mut after = before.clone();
        let counters = &mut state.counters;
        let mut next_serial = |key: &str| {
            let entry = counters.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        for op in &ops {
            op.apply(&mut after, &mut next_serial);
        }
        after.updated_at = Utc::now();

        state.contracts.insert(after.id.clone(), after.clone());
        Ok(Some(UpdateOutcome { before, after }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Predicate;
    use chrono::TimeZone;

    fn contract(id: &str) -> Contract {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        Contract::new_assignment(
            ContractId(id.to_string()),
            "partner-1",
            "property-1",
            "account-1",
            now,
        )
    }

    #[tokio::test]
    async fn guarded_update_misses_when_state_moved() {
        let store = MemoryStore::new();
        let ctx = TransactionContext::new();
        store.insert(&ctx, contract("c-1")).await.unwrap();

        let guard = Guard::for_contract(&ContractId("c-1".to_string()))
            .and(Predicate::StatusIn(vec![ContractStatus::New]));
        let first = store
            .guarded_update(
                &ctx,
                guard.clone(),
                vec![Mutation::SetStatus(ContractStatus::Upcoming)],
            )
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .guarded_update(&ctx, guard, vec![Mutation::SetStatus(ContractStatus::Upcoming)])
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn serial_counter_shares_state_with_updates() {
        let store = MemoryStore::new();
        let ctx = TransactionContext::new();
        store.insert(&ctx, contract("c-1")).await.unwrap();

        let guard = Guard::for_contract(&ContractId("c-1".to_string()))
            .and(Predicate::AssignmentSerialUnassigned);
        let outcome = store
            .guarded_update(
                &ctx,
                guard,
                vec![Mutation::AllocateAssignmentSerial {
                    counter_key: "partner-1:property-1:assignment_serial".to_string(),
                }],
            )
            .await
            .unwrap()
            .expect("guard matches");

        assert_eq!(outcome.after.assignment_serial, Some(1));
        assert_eq!(
            store
                .counter_value("partner-1:property-1:assignment_serial")
                .await,
            1
        );
    }
}
