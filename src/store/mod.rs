//! Persistence abstraction: guarded read-modify-write over contract
//! documents plus the explicit transaction context threaded through
//! every store and collaborator call.

pub mod guard;
pub mod memory;
pub mod mutation;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::contract::domain::{Contract, ContractId};

pub use guard::{Guard, Predicate};
pub use memory::MemoryStore;
pub use mutation::Mutation;

static TRANSACTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Explicit session handle covering one request's compound writes.
///
/// Never stored in shared state; always passed as a parameter. It is not
/// held open across queue-task boundaries.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    id: u64,
    started_at: DateTime<Utc>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            id: TRANSACTION_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre- and post-image of a successful guarded update, so callers can
/// diff fields to decide which side effects fire.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub before: Contract,
    pub after: Contract,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("contract {0} already exists")]
    DuplicateId(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Conditional document store for contracts.
///
/// `guarded_update` is the single mutating primitive: it applies the ops
/// only if the guard matches the document's current state and returns
/// `None` when it matched zero documents. Replayed or stale requests are
/// absorbed by that `None` rather than by locks or version counters.
#[async_trait]
pub trait ConditionalStore: Send + Sync {
    async fn insert(
        &self,
        ctx: &TransactionContext,
        contract: Contract,
    ) -> Result<Contract, StoreError>;

    async fn fetch(
        &self,
        ctx: &TransactionContext,
        id: &ContractId,
    ) -> Result<Option<Contract>, StoreError>;

    /// Stable-ordered page over all contracts, for batch jobs.
    async fn page(
        &self,
        ctx: &TransactionContext,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Contract>, StoreError>;

    /// Sibling contracts on the same property whose lease side is still
    /// `upcoming`, excluding the given contract.
    async fn find_upcoming_for_property(
        &self,
        ctx: &TransactionContext,
        property_id: &str,
        exclude: &ContractId,
    ) -> Result<Vec<Contract>, StoreError>;

    async fn guarded_update(
        &self,
        ctx: &TransactionContext,
        guard: Guard,
        ops: Vec<Mutation>,
    ) -> Result<Option<UpdateOutcome>, StoreError>;
}
