use crate::services::DownstreamError;
use crate::store::StoreError;

/// Result alias used across the engines and the orchestrator.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Error taxonomy for the contract lifecycle core.
///
/// `NotFound` and `ValidationFailed` are raised before any write is
/// attempted. `PreconditionFailed` means a guarded write matched zero
/// documents; callers re-fetch and decide whether to retry. `Downstream`
/// surfaces a collaborator failure after the contract mutation already
/// committed and is never rolled back.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error(transparent)]
    Downstream(#[from] DownstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    /// Whether the error is the benign guarded-write miss callers are
    /// expected to absorb under at-least-once delivery.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, Self::PreconditionFailed(_))
    }
}
