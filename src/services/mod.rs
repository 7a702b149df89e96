//! Collaborator contracts consumed by the lifecycle core.
//!
//! Implementations live elsewhere; the core only depends on these narrow
//! interfaces. Every call takes the request's [`TransactionContext`] so a
//! backing implementation can join the same session as the contract
//! write where it supports that.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::domain::{ContractId, InvoiceId};
use crate::store::TransactionContext;

/// Failure of an external collaborator call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{service} call failed: {message}")]
pub struct DownstreamError {
    pub service: &'static str,
    pub message: String,
}

impl DownstreamError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

/// Read model of an invoice as exposed by the invoice service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub contract_id: ContractId,
    pub partner_id: String,
    pub tenant_id: Option<String>,
    /// Outstanding amount in minor units.
    pub amount_due: i64,
    pub overdue: bool,
}

#[async_trait]
pub trait InvoiceService: Send + Sync {
    async fn create_credit_note_invoices(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
        termination_date: NaiveDate,
    ) -> Result<(), DownstreamError>;

    async fn find_overdue_invoices(
        &self,
        ctx: &TransactionContext,
        contract_id: &ContractId,
    ) -> Result<Vec<Invoice>, DownstreamError>;
}

/// Partial flag update for a property document. `None` leaves a flag
/// untouched, which is how a closure avoids clobbering a sibling
/// contract's `has_upcoming_lease`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyFlags {
    pub has_assignment: Option<bool>,
    pub has_active_lease: Option<bool>,
    pub has_upcoming_lease: Option<bool>,
    pub has_in_progress_lease: Option<bool>,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
}

#[async_trait]
pub trait PropertyService: Send + Sync {
    async fn update_flags(
        &self,
        ctx: &TransactionContext,
        property_id: &str,
        flags: PropertyFlags,
    ) -> Result<(), DownstreamError>;
}

/// Tenant-side view of their standing on a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantPropertyStatus {
    Upcoming,
    Active,
    Closed,
}

#[async_trait]
pub trait TenantService: Send + Sync {
    async fn update_property_status(
        &self,
        ctx: &TransactionContext,
        tenant_id: &str,
        property_id: &str,
        contract_id: &ContractId,
        status: TenantPropertyStatus,
    ) -> Result<(), DownstreamError>;
}

/// Audit log actions recorded by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    AssignmentCreated,
    LeaseCreated,
    ContractStatusChanged,
    LeaseTermsUpdated,
    EvictionCaseRemoved,
    EvictionCaseStatusChanged,
    CpiRescheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub partner_id: String,
    pub action: LogAction,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub entry: LogEntry,
}

#[async_trait]
pub trait LogService: Send + Sync {
    async fn create_log(
        &self,
        ctx: &TransactionContext,
        entry: LogEntry,
    ) -> Result<LogRecord, DownstreamError>;
}

/// Closed set of queue task families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    Notification,
    DocumentProduction,
}

/// Closed set of queue task actions the core produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    SendCpiNotification,
    SendSigningReminder,
    SendContractClosedNotice,
    SendEvictionNotice,
    ProduceEvictionDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    High,
    Normal,
    Low,
}

/// Task handed to the asynchronous workers. Producing one is fire and
/// forget; consumers report completion back as ordinary inbound requests
/// carrying the task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    pub event: QueueEvent,
    pub action: QueueAction,
    pub destination: String,
    pub params: serde_json::Value,
    pub priority: QueuePriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(
        &self,
        ctx: &TransactionContext,
        task: QueueTask,
    ) -> Result<TaskId, DownstreamError>;

    async fn complete(&self, ctx: &TransactionContext, id: &TaskId)
        -> Result<(), DownstreamError>;
}

/// Per-partner configuration consumed by the schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerSettings {
    pub eviction_package_enabled: bool,
    /// Annual rent-index adjustment in percent, e.g. `3.5`.
    pub cpi_annual_index_pct: f64,
    pub reminder_interval_days: i64,
}

impl Default for PartnerSettings {
    fn default() -> Self {
        Self {
            eviction_package_enabled: false,
            cpi_annual_index_pct: 0.0,
            reminder_interval_days: 3,
        }
    }
}

#[async_trait]
pub trait PartnerSettingService: Send + Sync {
    async fn settings(&self, partner_id: &str) -> Result<PartnerSettings, DownstreamError>;
}
