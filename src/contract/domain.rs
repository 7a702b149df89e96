use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for contract documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId(pub String);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for invoices referenced from eviction cases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvoiceId(pub String);

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status shared by the assignment side and the rental side of a contract.
///
/// The two sides are tracked independently but move through the same
/// shape: `new -> upcoming | in_progress`, `upcoming -> active | closed`,
/// `in_progress -> active | closed`, `active -> closed`. `closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    New,
    Upcoming,
    InProgress,
    Active,
    Closed,
}

impl ContractStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Upcoming => "upcoming",
            Self::InProgress => "in_progress",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn allows_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Upcoming)
                | (Self::New, Self::InProgress)
                | (Self::Upcoming, Self::Active)
                | (Self::Upcoming, Self::Closed)
                | (Self::InProgress, Self::Active)
                | (Self::InProgress, Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    /// Statuses a document may currently hold for a transition into
    /// `target` to apply. Empty for `new`, which is only ever initial.
    pub const fn sources_of(target: Self) -> &'static [Self] {
        match target {
            Self::New => &[],
            Self::Upcoming => &[Self::New],
            Self::InProgress => &[Self::New],
            Self::Active => &[Self::Upcoming, Self::InProgress],
            Self::Closed => &[Self::Upcoming, Self::InProgress, Self::Active],
        }
    }
}

/// Party expected to sign in one of the e-signing contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Tenant,
    Landlord,
    Agent,
}

impl SignerRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Landlord => "landlord",
            Self::Agent => "agent",
        }
    }
}

/// Closed set of signing workflow families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningContext {
    Assignment,
    Lease,
    MovingIn,
    MovingOut,
}

impl SigningContext {
    pub const ALL: [Self; 4] = [Self::Assignment, Self::Lease, Self::MovingIn, Self::MovingOut];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Lease => "lease",
            Self::MovingIn => "moving_in",
            Self::MovingOut => "moving_out",
        }
    }
}

/// Per-signer signing progress inside one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerSlot {
    pub role: SignerRole,
    pub signed_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

impl SignerSlot {
    pub fn unsigned(role: SignerRole) -> Self {
        Self {
            role,
            signed_at: None,
            reminder_sent_at: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signed_at.is_some()
    }
}

/// Signing state for one context: which parties must sign and where they stand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsignState {
    pub signers: Vec<SignerSlot>,
}

impl EsignState {
    pub fn for_roles(roles: &[SignerRole]) -> Self {
        Self {
            signers: roles.iter().copied().map(SignerSlot::unsigned).collect(),
        }
    }

    pub fn for_assignment() -> Self {
        Self::for_roles(&[SignerRole::Landlord, SignerRole::Agent])
    }

    pub fn for_lease() -> Self {
        Self::for_roles(&[SignerRole::Tenant, SignerRole::Landlord, SignerRole::Agent])
    }

    pub fn for_moving() -> Self {
        Self::for_roles(&[SignerRole::Tenant, SignerRole::Agent])
    }

    pub fn slot(&self, role: SignerRole) -> Option<&SignerSlot> {
        self.signers.iter().find(|slot| slot.role == role)
    }

    pub fn slot_mut(&mut self, role: SignerRole) -> Option<&mut SignerSlot> {
        self.signers.iter_mut().find(|slot| slot.role == role)
    }
}

/// Who ended the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedBy {
    Landlord,
    Tenant,
    Mutual,
    Natural,
}

impl TerminatedBy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Landlord => "landlord",
            Self::Tenant => "tenant",
            Self::Mutual => "mutual",
            Self::Natural => "natural",
        }
    }
}

/// One entry in the rent-index notification history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpiNotification {
    pub sent_on: DateTime<Utc>,
    pub future_rent_amount: i64,
    pub from_month: NaiveDate,
    pub in_month: NaiveDate,
}

/// Rent-index rescheduling state.
///
/// `next_cpi_date` must be present whenever `enabled` is true. A present
/// `last_notification_sent_on` signals a renegotiation still pending; the
/// scheduler clears it when the cycle completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpiState {
    pub enabled: bool,
    pub next_cpi_date: Option<DateTime<Utc>>,
    pub last_cpi_date: Option<DateTime<Utc>>,
    pub last_notification_sent_on: Option<DateTime<Utc>>,
    pub future_rent_amount: Option<i64>,
    pub cpi_from_month: Option<NaiveDate>,
    pub cpi_in_month: Option<NaiveDate>,
    pub notification_sent_history: Vec<CpiNotification>,
}

impl CpiState {
    pub fn notification_pending(&self) -> bool {
        self.last_notification_sent_on.is_some()
    }
}

/// Tenant-facing lease layered on top of the assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalMeta {
    pub status: ContractStatus,
    pub tenant_id: Option<String>,
    /// Additional tenants under joint liability.
    pub tenants: Vec<String>,
    pub lease_serial: Option<i64>,
    /// Rent in minor currency units. Arithmetic on it lives elsewhere.
    pub monthly_rent_amount: Option<i64>,
    pub contract_start_date: Option<NaiveDate>,
    pub contract_end_date: Option<NaiveDate>,
    pub terminated_by: Option<TerminatedBy>,
    pub natural_terminated_notice_send_date: Option<NaiveDate>,
    pub cpi: CpiState,
    pub esign: EsignState,
    pub moving_in_esign: EsignState,
    pub moving_out_esign: EsignState,
}

impl RentalMeta {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            status: ContractStatus::New,
            tenant_id: Some(tenant_id.into()),
            tenants: Vec::new(),
            lease_serial: None,
            monthly_rent_amount: None,
            contract_start_date: None,
            contract_end_date: None,
            terminated_by: None,
            natural_terminated_notice_send_date: None,
            cpi: CpiState::default(),
            esign: EsignState::for_lease(),
            moving_in_esign: EsignState::for_moving(),
            moving_out_esign: EsignState::for_moving(),
        }
    }

    /// All tenant ids liable under this lease.
    pub fn tenant_ids(&self) -> Vec<&str> {
        if self.tenants.is_empty() {
            self.tenant_id.iter().map(String::as_str).collect()
        } else {
            self.tenants.iter().map(String::as_str).collect()
        }
    }
}

/// Status of one eviction case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionCaseStatus {
    New,
    InProgress,
    Completed,
    Canceled,
}

impl EvictionCaseStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    pub const fn is_open(self) -> bool {
        matches!(self, Self::New | Self::InProgress)
    }

    pub const fn sources_of(target: Self) -> &'static [Self] {
        match target {
            Self::New => &[],
            Self::InProgress => &[Self::New],
            Self::Completed => &[Self::InProgress],
            Self::Canceled => &[Self::New, Self::InProgress],
        }
    }
}

/// Grouping of one tenant default's overdue invoices, keyed by the
/// invoice that triggered the case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionCase {
    pub invoice_id: InvoiceId,
    pub status: EvictionCaseStatus,
    pub eviction_invoice_ids: Vec<InvoiceId>,
    /// Outstanding amount across the tracked invoices, minor units.
    pub amount: i64,
}

impl EvictionCase {
    pub fn tracks(&self, invoice_id: &InvoiceId) -> bool {
        self.invoice_id == *invoice_id || self.eviction_invoice_ids.contains(invoice_id)
    }
}

/// Append-only change log entry on the contract document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub old_value: Option<serde_json::Value>,
    pub old_updated_at: Option<DateTime<Utc>>,
    pub new_value: Option<serde_json::Value>,
    pub new_updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn change(
        name: impl Into<String>,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        old_updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            old_value,
            old_updated_at,
            new_value,
            new_updated_at: now,
        }
    }
}

/// Line item tagged to one side of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonKind {
    Assignment,
    Lease,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub kind: AddonKind,
    pub name: String,
    pub amount: i64,
}

/// Root entity: one evolving record covering the brokerage mandate and,
/// once a tenant is attached, the lease layered on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub partner_id: String,
    pub property_id: String,
    pub account_id: String,
    pub status: ContractStatus,
    pub assignment_serial: Option<i64>,
    pub assignment_esign: EsignState,
    pub commission_amount: Option<i64>,
    pub rental_meta: Option<RentalMeta>,
    pub eviction_cases: Vec<EvictionCase>,
    pub history: Vec<HistoryEntry>,
    pub addons: Vec<Addon>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn new_assignment(
        id: ContractId,
        partner_id: impl Into<String>,
        property_id: impl Into<String>,
        account_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            partner_id: partner_id.into(),
            property_id: property_id.into(),
            account_id: account_id.into(),
            status: ContractStatus::New,
            assignment_serial: None,
            assignment_esign: EsignState::for_assignment(),
            commission_amount: None,
            rental_meta: None,
            eviction_cases: Vec::new(),
            history: Vec::new(),
            addons: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rental_status(&self) -> Option<ContractStatus> {
        self.rental_meta.as_ref().map(|rental| rental.status)
    }

    /// The open case triggered by `invoice_id`, if any.
    pub fn case_by_trigger(&self, invoice_id: &InvoiceId) -> Option<&EvictionCase> {
        self.eviction_cases
            .iter()
            .find(|case| case.invoice_id == *invoice_id)
    }

    /// First open case, if any. At most one exists per tenant default.
    pub fn open_case(&self) -> Option<&EvictionCase> {
        self.eviction_cases
            .iter()
            .find(|case| case.status.is_open())
    }

    /// The open case tracking `invoice_id` either as trigger or member.
    pub fn open_case_tracking(&self, invoice_id: &InvoiceId) -> Option<&EvictionCase> {
        self.eviction_cases
            .iter()
            .find(|case| case.status.is_open() && case.tracks(invoice_id))
    }

    pub fn esign(&self, context: SigningContext) -> Option<&EsignState> {
        match context {
            SigningContext::Assignment => Some(&self.assignment_esign),
            SigningContext::Lease => self.rental_meta.as_ref().map(|rental| &rental.esign),
            SigningContext::MovingIn => self
                .rental_meta
                .as_ref()
                .map(|rental| &rental.moving_in_esign),
            SigningContext::MovingOut => self
                .rental_meta
                .as_ref()
                .map(|rental| &rental.moving_out_esign),
        }
    }

    pub fn esign_mut(&mut self, context: SigningContext) -> Option<&mut EsignState> {
        match context {
            SigningContext::Assignment => Some(&mut self.assignment_esign),
            SigningContext::Lease => self.rental_meta.as_mut().map(|rental| &mut rental.esign),
            SigningContext::MovingIn => self
                .rental_meta
                .as_mut()
                .map(|rental| &mut rental.moving_in_esign),
            SigningContext::MovingOut => self
                .rental_meta
                .as_mut()
                .map(|rental| &mut rental.moving_out_esign),
        }
    }
}
