//! Recording fakes for the collaborator services, shared by the
//! integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use lease_lifecycle::config::EngineConfig;
use lease_lifecycle::contract::{ContractId, InvoiceId};
use lease_lifecycle::services::{
    DownstreamError, Invoice, InvoiceService, LogEntry, LogRecord, LogService, PartnerSettingService,
    PartnerSettings, PropertyFlags, PropertyService, QueueTask, TaskId, TenantPropertyStatus,
    TenantService, WorkQueue,
};
use lease_lifecycle::store::{MemoryStore, TransactionContext};
use lease_lifecycle::{Collaborators, LifecycleOrchestrator};

#[derive(Default)]
pub struct RecordingInvoices {
    pub overdue: Mutex<Vec<Invoice>>,
    pub credit_notes: Mutex<Vec<(ContractId, NaiveDate)>>,
    pub fail_credit_notes: Mutex<bool>,
}

#[async_trait]
impl InvoiceService for RecordingInvoices {
    async fn create_credit_note_invoices(
        &self,
        _ctx: &TransactionContext,
        contract_id: &ContractId,
        termination_date: NaiveDate,
    ) -> Result<(), DownstreamError> {
        if *self.fail_credit_notes.lock().await {
            return Err(DownstreamError::new("invoice", "credit note issue failed"));
        }
        self.credit_notes
            .lock()
            .await
            .push((contract_id.clone(), termination_date));
        Ok(())
    }

    async fn find_overdue_invoices(
        &self,
        _ctx: &TransactionContext,
        contract_id: &ContractId,
    ) -> Result<Vec<Invoice>, DownstreamError> {
        Ok(self
            .overdue
            .lock()
            .await
            .iter()
            .filter(|invoice| invoice.contract_id == *contract_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingProperties {
    pub updates: Mutex<Vec<(String, PropertyFlags)>>,
}

#[async_trait]
impl PropertyService for RecordingProperties {
    async fn update_flags(
        &self,
        _ctx: &TransactionContext,
        property_id: &str,
        flags: PropertyFlags,
    ) -> Result<(), DownstreamError> {
        self.updates
            .lock()
            .await
            .push((property_id.to_string(), flags));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTenants {
    pub updates: Mutex<Vec<(String, TenantPropertyStatus)>>,
}

#[async_trait]
impl TenantService for RecordingTenants {
    async fn update_property_status(
        &self,
        _ctx: &TransactionContext,
        tenant_id: &str,
        _property_id: &str,
        _contract_id: &ContractId,
        status: TenantPropertyStatus,
    ) -> Result<(), DownstreamError> {
        self.updates
            .lock()
            .await
            .push((tenant_id.to_string(), status));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLog {
    pub entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LogService for RecordingLog {
    async fn create_log(
        &self,
        _ctx: &TransactionContext,
        entry: LogEntry,
    ) -> Result<LogRecord, DownstreamError> {
        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());
        Ok(LogRecord {
            id: format!("log-{}", entries.len()),
            entry,
        })
    }
}

#[derive(Default)]
pub struct RecordingQueue {
    pub tasks: Mutex<Vec<QueueTask>>,
    pub completed: Mutex<Vec<TaskId>>,
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn enqueue(
        &self,
        _ctx: &TransactionContext,
        task: QueueTask,
    ) -> Result<TaskId, DownstreamError> {
        let mut tasks = self.tasks.lock().await;
        tasks.push(task);
        Ok(TaskId(format!("task-{}", tasks.len())))
    }

    async fn complete(
        &self,
        _ctx: &TransactionContext,
        id: &TaskId,
    ) -> Result<(), DownstreamError> {
        self.completed.lock().await.push(id.clone());
        Ok(())
    }
}

pub struct StaticSettings {
    pub settings: Mutex<PartnerSettings>,
    pub unavailable: Mutex<bool>,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            settings: Mutex::new(PartnerSettings::default()),
            unavailable: Mutex::new(false),
        }
    }
}

#[async_trait]
impl PartnerSettingService for StaticSettings {
    async fn settings(&self, _partner_id: &str) -> Result<PartnerSettings, DownstreamError> {
        if *self.unavailable.lock().await {
            return Err(DownstreamError::new("partner_settings", "unavailable"));
        }
        Ok(self.settings.lock().await.clone())
    }
}

/// Everything a test needs: the orchestrator plus handles to the store
/// and every fake for assertions.
pub struct Harness {
    pub orchestrator: LifecycleOrchestrator,
    pub store: Arc<MemoryStore>,
    pub invoices: Arc<RecordingInvoices>,
    pub properties: Arc<RecordingProperties>,
    pub tenants: Arc<RecordingTenants>,
    pub log: Arc<RecordingLog>,
    pub queue: Arc<RecordingQueue>,
    pub settings: Arc<StaticSettings>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let invoices = Arc::new(RecordingInvoices::default());
    let properties = Arc::new(RecordingProperties::default());
    let tenants = Arc::new(RecordingTenants::default());
    let log = Arc::new(RecordingLog::default());
    let queue = Arc::new(RecordingQueue::default());
    let settings = Arc::new(StaticSettings::default());

    // Small page size so the suites can exercise the sweep windows.
    let config = EngineConfig {
        reminder_page_size: 2,
        ..EngineConfig::default()
    };
    let orchestrator = LifecycleOrchestrator::new(
        store.clone(),
        Collaborators {
            invoices: invoices.clone(),
            properties: properties.clone(),
            tenants: tenants.clone(),
            log: log.clone(),
            queue: queue.clone(),
            settings: settings.clone(),
        },
        config,
    );

    Harness {
        orchestrator,
        store,
        invoices,
        properties,
        tenants,
        log,
        queue,
        settings,
    }
}

pub fn overdue_invoice(
    id: &str,
    contract_id: &ContractId,
    tenant_id: &str,
    amount_due: i64,
) -> Invoice {
    Invoice {
        id: InvoiceId(id.to_string()),
        contract_id: contract_id.clone(),
        partner_id: "partner-1".to_string(),
        tenant_id: Some(tenant_id.to_string()),
        amount_due,
        overdue: true,
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn at_noon(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    date(year, month, day).and_hms_opt(12, 0, 0).unwrap().and_utc()
}
