//! Typed CRUD over the conditional store, translating "no document" into
//! the core's `NotFound` taxonomy.

use std::sync::Arc;

use crate::error::{LifecycleError, LifecycleResult};
use crate::store::{ConditionalStore, Guard, Mutation, TransactionContext, UpdateOutcome};

use super::domain::{Contract, ContractId};

#[derive(Clone)]
pub struct ContractRepository {
    store: Arc<dyn ConditionalStore>,
}

impl ContractRepository {
    pub fn new(store: Arc<dyn ConditionalStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        ctx: &TransactionContext,
        contract: Contract,
    ) -> LifecycleResult<Contract> {
        Ok(self.store.insert(ctx, contract).await?)
    }

    pub async fn get(
        &self,
        ctx: &TransactionContext,
        id: &ContractId,
    ) -> LifecycleResult<Contract> {
        self.store
            .fetch(ctx, id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("contract", id.to_string()))
    }

    pub async fn page(
        &self,
        ctx: &TransactionContext,
        skip: usize,
        limit: usize,
    ) -> LifecycleResult<Vec<Contract>> {
        Ok(self.store.page(ctx, skip, limit).await?)
    }

    /// Whether another contract on the property still has an upcoming
    /// lease. Closure side effects consult this before clearing the
    /// property's `has_upcoming_lease` flag.
    pub async fn sibling_upcoming_exists(
        &self,
        ctx: &TransactionContext,
        property_id: &str,
        exclude: &ContractId,
    ) -> LifecycleResult<bool> {
        let siblings = self
            .store
            .find_upcoming_for_property(ctx, property_id, exclude)
            .await?;
        Ok(!siblings.is_empty())
    }

    /// Guarded read-modify-write passthrough. `Ok(None)` means the guard
    /// matched zero documents.
    pub async fn apply(
        &self,
        ctx: &TransactionContext,
        guard: Guard,
        ops: Vec<Mutation>,
    ) -> LifecycleResult<Option<UpdateOutcome>> {
        Ok(self.store.guarded_update(ctx, guard, ops).await?)
    }
}
