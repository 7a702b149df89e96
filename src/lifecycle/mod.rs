//! The lifecycle engines and the orchestrator that composes them.

pub mod cpi;
pub mod eviction;
pub mod orchestrator;
pub mod reminder;
pub mod transition;

pub use cpi::{CpiOutcome, CpiScheduler, CpiSkip};
pub use eviction::{CaseChange, CaseSkip, EvictionEngine};
pub use orchestrator::{
    Collaborators, InvoiceEvent, LeaseTermChanges, LifecycleOrchestrator, NewAssignment, NewLease,
};
pub use reminder::{ReminderPage, ReminderRunReport, ReminderScheduler, SentReminder};
pub use transition::{
    TerminationDetails, TransitionEngine, TransitionOutcome, TransitionRequest,
};
