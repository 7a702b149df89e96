//! Contract lifecycle engine for rental assignments and leases.
//!
//! One contract document carries a landlord-facing assignment and an
//! optional tenant-facing lease, each with its own status. The engines
//! in [`lifecycle`] move those statuses through a fixed transition
//! table, track eviction cases on defaulted invoices, reschedule
//! rent-index renegotiations, and nudge unsigned parties. Every write
//! goes through the guarded conditional-update protocol in [`store`],
//! which is what makes replays and concurrent runs safe without locks.

pub mod config;
pub mod contract;
pub mod error;
pub mod lifecycle;
pub mod services;
pub mod store;

pub use config::EngineConfig;
pub use contract::{Contract, ContractId, ContractStatus, InvoiceId};
pub use error::{LifecycleError, LifecycleResult};
pub use lifecycle::{Collaborators, LifecycleOrchestrator};
pub use store::{ConditionalStore, MemoryStore, TransactionContext};
