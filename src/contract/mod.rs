pub mod domain;
pub mod history;
pub mod repository;

pub use domain::{
    Addon, AddonKind, Contract, ContractId, ContractStatus, CpiNotification, CpiState,
    EsignState, EvictionCase, EvictionCaseStatus, HistoryEntry, InvoiceId, RentalMeta,
    SignerRole, SignerSlot, SigningContext, TerminatedBy,
};
pub use repository::ContractRepository;
