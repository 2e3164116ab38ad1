use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gearshop_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Entity, TenantId, ValueObject};
use gearshop_events::Event;

use crate::totals;

/// Job-sheet identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSheetId(pub AggregateId);

impl JobSheetId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for JobSheetId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Customer reference, opaque to this core (the directory owns the record).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub AggregateId);

/// Vehicle reference, opaque to this core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub AggregateId);

macro_rules! impl_entity_id {
    ($t:ident) => {
        /// Entity identifier owned by a job sheet.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// New random (v7, time-ordered) identifier. Pass ids explicitly
            /// in tests for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

impl_entity_id!(LineItemId);
impl_entity_id!(LaborTaskId);
impl_entity_id!(PaymentId);
impl_entity_id!(DraftTaskId);

/// Opaque external inventory identifier, snapshotted at add-item time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductRef(String);

impl ProductRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ProductRef {}

impl core::fmt::Display for ProductRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a labor task as seen from an editing session: either already
/// persisted, or a client-side draft that has not completed a save round-trip
/// yet. A tagged variant instead of string-prefix sniffing on the id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaborTaskRef {
    Persisted(LaborTaskId),
    Draft(DraftTaskId),
}

/// How a payment was received.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    Transfer,
    Check,
    Other,
}

/// Work-order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSheetState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl JobSheetState {
    /// Next state in the fixed cycle
    /// `Pending → InProgress → Completed → Cancelled → Pending`.
    ///
    /// Unguarded: the workshop workflow treats the state as a round-robin
    /// label with no terminal state, so even `Cancelled` cycles back to
    /// `Pending`.
    pub fn next(self) -> Self {
        match self {
            JobSheetState::Pending => JobSheetState::InProgress,
            JobSheetState::InProgress => JobSheetState::Completed,
            JobSheetState::Completed => JobSheetState::Cancelled,
            JobSheetState::Cancelled => JobSheetState::Pending,
        }
    }
}

/// Parts/product line: quantity and a price snapshot taken at add-time.
/// Inventory price changes never retroactively change a billed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: LineItemId,
    pub product_ref: ProductRef,
    /// Display snapshot; never re-fetched from inventory.
    pub name: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub quantity: u32,
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.item_id
    }
}

/// Billable service line with a completion gate: only completed tasks count
/// toward totals, and completion requires a positive price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaborTask {
    pub task_id: LaborTaskId,
    pub description: String,
    /// Price in smallest currency unit; may be 0 until quoted.
    pub price: u64,
    pub is_completed: bool,
    /// Stamped on the incomplete→complete transition; kept when reverted so
    /// the last completion time survives for audit.
    pub completed_at: Option<DateTime<Utc>>,
    /// Client draft reference echoed from `AddLaborTask`, for correlating an
    /// unsaved editing row with its assigned persistent id.
    pub draft_ref: Option<DraftTaskId>,
}

impl Entity for LaborTask {
    type Id = LaborTaskId;

    fn id(&self) -> &Self::Id {
        &self.task_id
    }
}

/// Recorded amount received against the job sheet. Immutable once created;
/// the only correction is removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    /// Amount in smallest currency unit; always positive.
    pub amount: u64,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.payment_id
    }
}

/// Aggregate root: JobSheet.
///
/// Single source of truth for a work order's billable content and lifecycle.
/// All mutation goes through commands so totals can never drift from the
/// collections they are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSheet {
    id: JobSheetId,
    tenant_id: Option<TenantId>,
    customer_id: Option<CustomerId>,
    vehicle_id: Option<VehicleId>,
    state: JobSheetState,
    opened_at: Option<DateTime<Utc>>,
    items: Vec<LineItem>,
    labor_tasks: Vec<LaborTask>,
    payments: Vec<Payment>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl JobSheet {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: JobSheetId) -> Self {
        Self {
            id,
            tenant_id: None,
            customer_id: None,
            vehicle_id: None,
            state: JobSheetState::Pending,
            opened_at: None,
            items: Vec::new(),
            labor_tasks: Vec::new(),
            payments: Vec::new(),
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> JobSheetId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn state(&self) -> JobSheetState {
        self.state
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn labor_tasks(&self) -> &[LaborTask] {
        &self.labor_tasks
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    /// Created and not logically deleted.
    pub fn is_live(&self) -> bool {
        self.created && !self.deleted
    }

    /// Resolve an editing-session task reference against current state.
    pub fn resolve_task(&self, task_ref: &LaborTaskRef) -> Option<LaborTaskId> {
        match task_ref {
            LaborTaskRef::Persisted(id) => self
                .labor_tasks
                .iter()
                .find(|t| t.task_id == *id)
                .map(|t| t.task_id),
            LaborTaskRef::Draft(draft) => self
                .labor_tasks
                .iter()
                .find(|t| t.draft_ref == Some(*draft))
                .map(|t| t.task_id),
        }
    }

    /// Recompute subtotal / amount paid / balance / payment status from the
    /// current collections. Never cached.
    pub fn derived_totals(&self) -> Result<totals::DerivedTotals, DomainError> {
        if !self.is_live() {
            return Err(DomainError::not_found());
        }
        totals::derive(&self.items, &self.labor_tasks, &self.payments)
    }

    /// Read-only snapshot of the full aggregate state, the input to the
    /// invoice projection.
    pub fn snapshot(&self) -> Result<JobSheetSnapshot, DomainError> {
        if !self.is_live() {
            return Err(DomainError::not_found());
        }
        Ok(JobSheetSnapshot {
            sheet_id: self.id,
            tenant_id: self.tenant_id.ok_or_else(|| {
                DomainError::invariant("live job sheet is missing its tenant")
            })?,
            customer_id: self.customer_id,
            vehicle_id: self.vehicle_id,
            state: self.state,
            opened_at: self.opened_at.ok_or_else(|| {
                DomainError::invariant("live job sheet is missing its opened_at")
            })?,
            items: self.items.clone(),
            labor_tasks: self.labor_tasks.clone(),
            payments: self.payments.clone(),
            version: self.version,
        })
    }
}

/// Frozen copy of a job sheet's state at a point in its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSheetSnapshot {
    pub sheet_id: JobSheetId,
    pub tenant_id: TenantId,
    pub customer_id: Option<CustomerId>,
    pub vehicle_id: Option<VehicleId>,
    pub state: JobSheetState,
    pub opened_at: DateTime<Utc>,
    pub items: Vec<LineItem>,
    pub labor_tasks: Vec<LaborTask>,
    pub payments: Vec<Payment>,
    pub version: u64,
}

impl AggregateRoot for JobSheet {
    type Id = JobSheetId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenJobSheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenJobSheet {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub customer_id: Option<CustomerId>,
    pub vehicle_id: Option<VehicleId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem. `name` and `unit_price` are the inventory snapshot taken
/// by the caller at add time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub item_id: LineItemId,
    pub product_ref: ProductRef,
    pub name: String,
    pub unit_price: u64,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub item_id: LineItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLaborTask. Price may be 0 (quoted later); the task starts
/// incomplete. `draft_ref` lets an editing session correlate the row it
/// created client-side with the assigned persistent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLaborTask {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub task_id: LaborTaskId,
    pub description: String,
    pub price: u64,
    pub draft_ref: Option<DraftTaskId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateLaborTask. Either field may be supplied; setting
/// `is_completed = true` is gated on a positive effective price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLaborTask {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub task_id: LaborTaskId,
    pub price: Option<u64>,
    pub is_completed: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLaborTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLaborTask {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub task_id: LaborTaskId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub payment_id: PaymentId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemovePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePayment {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceState (the UI trigger simply advances the fixed cycle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceState {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteJobSheet (logical delete; cascades to all collections).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteJobSheet {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSheetCommand {
    OpenJobSheet(OpenJobSheet),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    AddLaborTask(AddLaborTask),
    UpdateLaborTask(UpdateLaborTask),
    RemoveLaborTask(RemoveLaborTask),
    RecordPayment(RecordPayment),
    RemovePayment(RemovePayment),
    AdvanceState(AdvanceState),
    DeleteJobSheet(DeleteJobSheet),
}

impl JobSheetCommand {
    pub fn sheet_id(&self) -> JobSheetId {
        match self {
            JobSheetCommand::OpenJobSheet(c) => c.sheet_id,
            JobSheetCommand::AddItem(c) => c.sheet_id,
            JobSheetCommand::RemoveItem(c) => c.sheet_id,
            JobSheetCommand::AddLaborTask(c) => c.sheet_id,
            JobSheetCommand::UpdateLaborTask(c) => c.sheet_id,
            JobSheetCommand::RemoveLaborTask(c) => c.sheet_id,
            JobSheetCommand::RecordPayment(c) => c.sheet_id,
            JobSheetCommand::RemovePayment(c) => c.sheet_id,
            JobSheetCommand::AdvanceState(c) => c.sheet_id,
            JobSheetCommand::DeleteJobSheet(c) => c.sheet_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            JobSheetCommand::OpenJobSheet(c) => c.tenant_id,
            JobSheetCommand::AddItem(c) => c.tenant_id,
            JobSheetCommand::RemoveItem(c) => c.tenant_id,
            JobSheetCommand::AddLaborTask(c) => c.tenant_id,
            JobSheetCommand::UpdateLaborTask(c) => c.tenant_id,
            JobSheetCommand::RemoveLaborTask(c) => c.tenant_id,
            JobSheetCommand::RecordPayment(c) => c.tenant_id,
            JobSheetCommand::RemovePayment(c) => c.tenant_id,
            JobSheetCommand::AdvanceState(c) => c.tenant_id,
            JobSheetCommand::DeleteJobSheet(c) => c.tenant_id,
        }
    }
}

impl gearshop_events::Command for JobSheetCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.sheet_id().0
    }
}

/// Event: JobSheetOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSheetOpened {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub customer_id: Option<CustomerId>,
    pub vehicle_id: Option<VehicleId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub item: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub item_id: LineItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LaborTaskAdded. Carries the assigned persistent id and echoes the
/// originating draft reference, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaborTaskAdded {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub task: LaborTask,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LaborTaskUpdated. `completed_at` is present only on the
/// incomplete→complete transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaborTaskUpdated {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub task_id: LaborTaskId,
    pub price: Option<u64>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LaborTaskRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaborTaskRemoved {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub task_id: LaborTaskId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub payment: Payment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRemoved {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StateAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAdvanced {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub from: JobSheetState,
    pub to: JobSheetState,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JobSheetDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSheetDeleted {
    pub tenant_id: TenantId,
    pub sheet_id: JobSheetId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSheetEvent {
    JobSheetOpened(JobSheetOpened),
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
    LaborTaskAdded(LaborTaskAdded),
    LaborTaskUpdated(LaborTaskUpdated),
    LaborTaskRemoved(LaborTaskRemoved),
    PaymentRecorded(PaymentRecorded),
    PaymentRemoved(PaymentRemoved),
    StateAdvanced(StateAdvanced),
    JobSheetDeleted(JobSheetDeleted),
}

impl Event for JobSheetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JobSheetEvent::JobSheetOpened(_) => "jobsheet.opened",
            JobSheetEvent::ItemAdded(_) => "jobsheet.item.added",
            JobSheetEvent::ItemRemoved(_) => "jobsheet.item.removed",
            JobSheetEvent::LaborTaskAdded(_) => "jobsheet.labor.added",
            JobSheetEvent::LaborTaskUpdated(_) => "jobsheet.labor.updated",
            JobSheetEvent::LaborTaskRemoved(_) => "jobsheet.labor.removed",
            JobSheetEvent::PaymentRecorded(_) => "jobsheet.payment.recorded",
            JobSheetEvent::PaymentRemoved(_) => "jobsheet.payment.removed",
            JobSheetEvent::StateAdvanced(_) => "jobsheet.state.advanced",
            JobSheetEvent::JobSheetDeleted(_) => "jobsheet.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JobSheetEvent::JobSheetOpened(e) => e.occurred_at,
            JobSheetEvent::ItemAdded(e) => e.occurred_at,
            JobSheetEvent::ItemRemoved(e) => e.occurred_at,
            JobSheetEvent::LaborTaskAdded(e) => e.occurred_at,
            JobSheetEvent::LaborTaskUpdated(e) => e.occurred_at,
            JobSheetEvent::LaborTaskRemoved(e) => e.occurred_at,
            JobSheetEvent::PaymentRecorded(e) => e.occurred_at,
            JobSheetEvent::PaymentRemoved(e) => e.occurred_at,
            JobSheetEvent::StateAdvanced(e) => e.occurred_at,
            JobSheetEvent::JobSheetDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for JobSheet {
    type Command = JobSheetCommand;
    type Event = JobSheetEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            JobSheetEvent::JobSheetOpened(e) => {
                self.id = e.sheet_id;
                self.tenant_id = Some(e.tenant_id);
                self.customer_id = e.customer_id;
                self.vehicle_id = e.vehicle_id;
                self.state = JobSheetState::Pending;
                self.opened_at = Some(e.occurred_at);
                self.items.clear();
                self.labor_tasks.clear();
                self.payments.clear();
                self.created = true;
                self.deleted = false;
            }
            JobSheetEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            JobSheetEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.item_id != e.item_id);
            }
            JobSheetEvent::LaborTaskAdded(e) => {
                self.labor_tasks.push(e.task.clone());
            }
            JobSheetEvent::LaborTaskUpdated(e) => {
                if let Some(task) = self.labor_tasks.iter_mut().find(|t| t.task_id == e.task_id) {
                    if let Some(price) = e.price {
                        task.price = price;
                    }
                    if let Some(done) = e.is_completed {
                        task.is_completed = done;
                    }
                    // Absent on revert: the last completion time is kept.
                    if let Some(ts) = e.completed_at {
                        task.completed_at = Some(ts);
                    }
                }
            }
            JobSheetEvent::LaborTaskRemoved(e) => {
                self.labor_tasks.retain(|t| t.task_id != e.task_id);
            }
            JobSheetEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
            }
            JobSheetEvent::PaymentRemoved(e) => {
                self.payments.retain(|p| p.payment_id != e.payment_id);
            }
            JobSheetEvent::StateAdvanced(e) => {
                self.state = e.to;
            }
            JobSheetEvent::JobSheetDeleted(_) => {
                // Cascade: the sheet owns its collections.
                self.items.clear();
                self.labor_tasks.clear();
                self.payments.clear();
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JobSheetCommand::OpenJobSheet(cmd) => self.handle_open(cmd),
            JobSheetCommand::AddItem(cmd) => self.handle_add_item(cmd),
            JobSheetCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            JobSheetCommand::AddLaborTask(cmd) => self.handle_add_labor(cmd),
            JobSheetCommand::UpdateLaborTask(cmd) => self.handle_update_labor(cmd),
            JobSheetCommand::RemoveLaborTask(cmd) => self.handle_remove_labor(cmd),
            JobSheetCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            JobSheetCommand::RemovePayment(cmd) => self.handle_remove_payment(cmd),
            JobSheetCommand::AdvanceState(cmd) => self.handle_advance_state(cmd),
            JobSheetCommand::DeleteJobSheet(cmd) => self.handle_delete(cmd),
        }
    }
}

impl JobSheet {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_sheet_id(&self, sheet_id: JobSheetId) -> Result<(), DomainError> {
        if self.id != sheet_id {
            return Err(DomainError::invariant("sheet_id mismatch"));
        }
        Ok(())
    }

    /// Common preamble for every mutation except open: the sheet must exist,
    /// must not be deleted, and the command must match tenant and id.
    fn ensure_live(&self, tenant_id: TenantId, sheet_id: JobSheetId) -> Result<(), DomainError> {
        if !self.is_live() {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_sheet_id(sheet_id)?;
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenJobSheet) -> Result<Vec<JobSheetEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("job sheet already exists"));
        }

        Ok(vec![JobSheetEvent::JobSheetOpened(JobSheetOpened {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            customer_id: cmd.customer_id,
            vehicle_id: cmd.vehicle_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        if cmd.quantity < 1 {
            return Err(DomainError::validation("line item quantity must be at least 1"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("line item name must not be empty"));
        }
        if self.items.iter().any(|i| i.item_id == cmd.item_id) {
            return Err(DomainError::conflict("line item id already present"));
        }

        Ok(vec![JobSheetEvent::ItemAdded(ItemAdded {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            item: LineItem {
                item_id: cmd.item_id,
                product_ref: cmd.product_ref.clone(),
                name: cmd.name.clone(),
                unit_price: cmd.unit_price,
                quantity: cmd.quantity,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        if !self.items.iter().any(|i| i.item_id == cmd.item_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![JobSheetEvent::ItemRemoved(ItemRemoved {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_labor(&self, cmd: &AddLaborTask) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("labor task description must not be empty"));
        }
        if self.labor_tasks.iter().any(|t| t.task_id == cmd.task_id) {
            return Err(DomainError::conflict("labor task id already present"));
        }

        Ok(vec![JobSheetEvent::LaborTaskAdded(LaborTaskAdded {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            task: LaborTask {
                task_id: cmd.task_id,
                description: cmd.description.clone(),
                price: cmd.price,
                is_completed: false,
                completed_at: None,
                draft_ref: cmd.draft_ref,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_labor(&self, cmd: &UpdateLaborTask) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        let task = self
            .labor_tasks
            .iter()
            .find(|t| t.task_id == cmd.task_id)
            .ok_or_else(DomainError::not_found)?;

        if cmd.price.is_none() && cmd.is_completed.is_none() {
            return Err(DomainError::validation("labor task update carries no changes"));
        }

        let mut completed_at = None;
        if cmd.is_completed == Some(true) {
            // Gate: completion requires a positive price. A price supplied in
            // the same command satisfies the gate atomically.
            let effective_price = cmd.price.unwrap_or(task.price);
            if effective_price == 0 {
                return Err(DomainError::validation(
                    "labor task requires a positive price to be marked completed",
                ));
            }
            if !task.is_completed {
                completed_at = Some(cmd.occurred_at);
            }
        }

        Ok(vec![JobSheetEvent::LaborTaskUpdated(LaborTaskUpdated {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            task_id: cmd.task_id,
            price: cmd.price,
            is_completed: cmd.is_completed,
            completed_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_labor(&self, cmd: &RemoveLaborTask) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        if !self.labor_tasks.iter().any(|t| t.task_id == cmd.task_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![JobSheetEvent::LaborTaskRemoved(LaborTaskRemoved {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            task_id: cmd.task_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.payments.iter().any(|p| p.payment_id == cmd.payment_id) {
            return Err(DomainError::conflict("payment id already present"));
        }

        Ok(vec![JobSheetEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                paid_at: cmd.paid_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_payment(&self, cmd: &RemovePayment) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        if !self.payments.iter().any(|p| p.payment_id == cmd.payment_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![JobSheetEvent::PaymentRemoved(PaymentRemoved {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            payment_id: cmd.payment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance_state(&self, cmd: &AdvanceState) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        // Unconditional: every state has a next state, totals are unaffected.
        Ok(vec![JobSheetEvent::StateAdvanced(StateAdvanced {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            from: self.state,
            to: self.state.next(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteJobSheet) -> Result<Vec<JobSheetEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.sheet_id)?;

        Ok(vec![JobSheetEvent::JobSheetDeleted(JobSheetDeleted {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totals::PaymentStatus;
    use gearshop_core::AggregateId;
    use proptest::prelude::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_sheet_id() -> JobSheetId {
        JobSheetId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    /// Opened sheet plus the ids used to open it.
    fn opened_sheet() -> (JobSheet, TenantId, JobSheetId) {
        let tenant_id = test_tenant_id();
        let sheet_id = test_sheet_id();
        let mut sheet = JobSheet::empty(sheet_id);
        let events = sheet
            .handle(&JobSheetCommand::OpenJobSheet(OpenJobSheet {
                tenant_id,
                sheet_id,
                customer_id: Some(CustomerId(AggregateId::new())),
                vehicle_id: Some(VehicleId(AggregateId::new())),
                occurred_at: test_time(),
            }))
            .unwrap();
        sheet.apply(&events[0]);
        (sheet, tenant_id, sheet_id)
    }

    fn run(sheet: &mut JobSheet, cmd: JobSheetCommand) -> Result<(), DomainError> {
        let events = sheet.handle(&cmd)?;
        for e in &events {
            sheet.apply(e);
        }
        Ok(())
    }

    fn add_item_cmd(
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        item_id: LineItemId,
        unit_price: u64,
        quantity: u32,
    ) -> JobSheetCommand {
        JobSheetCommand::AddItem(AddItem {
            tenant_id,
            sheet_id,
            item_id,
            product_ref: ProductRef::new("BRK-PAD-F"),
            name: "Front brake pads".to_string(),
            unit_price,
            quantity,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn open_emits_opened_event_and_starts_pending() {
        let (sheet, _, _) = opened_sheet();
        assert!(sheet.is_live());
        assert_eq!(sheet.state(), JobSheetState::Pending);
        assert_eq!(sheet.version(), 1);
    }

    #[test]
    fn open_twice_conflicts() {
        let (sheet, tenant_id, sheet_id) = opened_sheet();
        let err = sheet
            .handle(&JobSheetCommand::OpenJobSheet(OpenJobSheet {
                tenant_id,
                sheet_id,
                customer_id: None,
                vehicle_id: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn add_item_rejects_zero_quantity() {
        let (sheet, tenant_id, sheet_id) = opened_sheet();
        let err = sheet
            .handle(&add_item_cmd(tenant_id, sheet_id, LineItemId::new(), 1_000, 0))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn add_then_remove_item_restores_subtotal() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        let item_id = LineItemId::new();

        run(&mut sheet, add_item_cmd(tenant_id, sheet_id, item_id, 2_000, 2)).unwrap();
        assert_eq!(sheet.derived_totals().unwrap().subtotal, 4_000);

        run(
            &mut sheet,
            JobSheetCommand::RemoveItem(RemoveItem {
                tenant_id,
                sheet_id,
                item_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(sheet.derived_totals().unwrap().subtotal, 0);
    }

    #[test]
    fn remove_unknown_item_is_not_found() {
        let (sheet, tenant_id, sheet_id) = opened_sheet();
        let err = sheet
            .handle(&JobSheetCommand::RemoveItem(RemoveItem {
                tenant_id,
                sheet_id,
                item_id: LineItemId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn labor_task_requires_description() {
        let (sheet, tenant_id, sheet_id) = opened_sheet();
        let err = sheet
            .handle(&JobSheetCommand::AddLaborTask(AddLaborTask {
                tenant_id,
                sheet_id,
                task_id: LaborTaskId::new(),
                description: "   ".to_string(),
                price: 0,
                draft_ref: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn completing_unpriced_task_fails_without_a_price() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        let task_id = LaborTaskId::new();

        run(
            &mut sheet,
            JobSheetCommand::AddLaborTask(AddLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                description: "Diagnose misfire".to_string(),
                price: 0,
                draft_ref: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = sheet
            .handle(&JobSheetCommand::UpdateLaborTask(UpdateLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                price: None,
                is_completed: Some(true),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("requires a positive price"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        // Supplying a price in the same command satisfies the gate atomically.
        run(
            &mut sheet,
            JobSheetCommand::UpdateLaborTask(UpdateLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                price: Some(1_500),
                is_completed: Some(true),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let task = &sheet.labor_tasks()[0];
        assert!(task.is_completed);
        assert_eq!(task.price, 1_500);
        assert!(task.completed_at.is_some());
        assert_eq!(sheet.derived_totals().unwrap().subtotal, 1_500);
    }

    #[test]
    fn reverting_completion_keeps_completed_at_for_audit() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        let task_id = LaborTaskId::new();

        run(
            &mut sheet,
            JobSheetCommand::AddLaborTask(AddLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                description: "Wheel alignment".to_string(),
                price: 2_500,
                draft_ref: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        run(
            &mut sheet,
            JobSheetCommand::UpdateLaborTask(UpdateLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                price: None,
                is_completed: Some(true),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let stamped = sheet.labor_tasks()[0].completed_at;
        assert!(stamped.is_some());

        // Revert: no price requirement, timestamp untouched.
        run(
            &mut sheet,
            JobSheetCommand::UpdateLaborTask(UpdateLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                price: None,
                is_completed: Some(false),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let task = &sheet.labor_tasks()[0];
        assert!(!task.is_completed);
        assert_eq!(task.completed_at, stamped);
        // Incomplete labor is no longer billable.
        assert_eq!(sheet.derived_totals().unwrap().subtotal, 0);
    }

    #[test]
    fn draft_refs_resolve_to_assigned_ids() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        let task_id = LaborTaskId::new();
        let draft = DraftTaskId::new();

        run(
            &mut sheet,
            JobSheetCommand::AddLaborTask(AddLaborTask {
                tenant_id,
                sheet_id,
                task_id,
                description: "Replace timing belt".to_string(),
                price: 0,
                draft_ref: Some(draft),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(sheet.resolve_task(&LaborTaskRef::Draft(draft)), Some(task_id));
        assert_eq!(
            sheet.resolve_task(&LaborTaskRef::Persisted(task_id)),
            Some(task_id)
        );
        assert_eq!(sheet.resolve_task(&LaborTaskRef::Draft(DraftTaskId::new())), None);
    }

    #[test]
    fn payment_roundtrip_restores_totals() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        run(
            &mut sheet,
            add_item_cmd(tenant_id, sheet_id, LineItemId::new(), 10_000, 1),
        )
        .unwrap();
        let before = sheet.derived_totals().unwrap();

        let payment_id = PaymentId::new();
        run(
            &mut sheet,
            JobSheetCommand::RecordPayment(RecordPayment {
                tenant_id,
                sheet_id,
                payment_id,
                amount: 4_000,
                method: PaymentMethod::CreditCard,
                paid_at: test_time(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let during = sheet.derived_totals().unwrap();
        assert_eq!(during.amount_paid, 4_000);
        assert_eq!(during.balance_due, 6_000);
        assert_eq!(during.payment_status, PaymentStatus::Partial(40));

        run(
            &mut sheet,
            JobSheetCommand::RemovePayment(RemovePayment {
                tenant_id,
                sheet_id,
                payment_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(sheet.derived_totals().unwrap(), before);
    }

    #[test]
    fn zero_payment_is_rejected() {
        let (sheet, tenant_id, sheet_id) = opened_sheet();
        let err = sheet
            .handle(&JobSheetCommand::RecordPayment(RecordPayment {
                tenant_id,
                sheet_id,
                payment_id: PaymentId::new(),
                amount: 0,
                method: PaymentMethod::Cash,
                paid_at: test_time(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn state_cycles_back_to_pending_after_four_advances() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        let mut seen = vec![sheet.state()];

        for _ in 0..4 {
            run(
                &mut sheet,
                JobSheetCommand::AdvanceState(AdvanceState {
                    tenant_id,
                    sheet_id,
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
            seen.push(sheet.state());
        }

        assert_eq!(
            seen,
            vec![
                JobSheetState::Pending,
                JobSheetState::InProgress,
                JobSheetState::Completed,
                JobSheetState::Cancelled,
                JobSheetState::Pending,
            ]
        );
    }

    #[test]
    fn advancing_state_never_touches_totals() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        run(
            &mut sheet,
            add_item_cmd(tenant_id, sheet_id, LineItemId::new(), 3_000, 1),
        )
        .unwrap();
        let before = sheet.derived_totals().unwrap();

        run(
            &mut sheet,
            JobSheetCommand::AdvanceState(AdvanceState {
                tenant_id,
                sheet_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(sheet.derived_totals().unwrap(), before);
    }

    #[test]
    fn delete_cascades_and_makes_reads_not_found() {
        let (mut sheet, tenant_id, sheet_id) = opened_sheet();
        run(
            &mut sheet,
            add_item_cmd(tenant_id, sheet_id, LineItemId::new(), 2_000, 1),
        )
        .unwrap();
        run(
            &mut sheet,
            JobSheetCommand::RecordPayment(RecordPayment {
                tenant_id,
                sheet_id,
                payment_id: PaymentId::new(),
                amount: 500,
                method: PaymentMethod::Cash,
                paid_at: test_time(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        run(
            &mut sheet,
            JobSheetCommand::DeleteJobSheet(DeleteJobSheet {
                tenant_id,
                sheet_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert!(sheet.items().is_empty());
        assert!(sheet.labor_tasks().is_empty());
        assert!(sheet.payments().is_empty());
        assert_eq!(sheet.derived_totals().unwrap_err(), DomainError::NotFound);
        assert_eq!(sheet.snapshot().unwrap_err(), DomainError::NotFound);

        // Further mutations are rejected too.
        let err = sheet
            .handle(&add_item_cmd(tenant_id, sheet_id, LineItemId::new(), 1, 1))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (sheet, tenant_id, sheet_id) = opened_sheet();
        let before = sheet.clone();

        let cmd = add_item_cmd(tenant_id, sheet_id, LineItemId::new(), 1_000, 1);
        let events1 = sheet.handle(&cmd).unwrap();
        let events2 = sheet.handle(&cmd).unwrap();

        assert_eq!(sheet, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn apply_is_deterministic() {
        let tenant_id = test_tenant_id();
        let sheet_id = test_sheet_id();
        let item_id = LineItemId::new();

        let opened = JobSheetEvent::JobSheetOpened(JobSheetOpened {
            tenant_id,
            sheet_id,
            customer_id: None,
            vehicle_id: None,
            occurred_at: test_time(),
        });
        let added = JobSheetEvent::ItemAdded(ItemAdded {
            tenant_id,
            sheet_id,
            item: LineItem {
                item_id,
                product_ref: ProductRef::new("FLT-OIL"),
                name: "Oil filter".to_string(),
                unit_price: 900,
                quantity: 1,
            },
            occurred_at: test_time(),
        });

        let mut a = JobSheet::empty(sheet_id);
        let mut b = JobSheet::empty(sheet_id);
        for e in [&opened, &added] {
            a.apply(e);
            b.apply(e);
        }

        assert_eq!(a, b);
        assert_eq!(a.version(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of adds (and removals of a subset),
        /// the subtotal equals the sum over the items still present —
        /// independent of the order the operations interleaved in.
        #[test]
        fn subtotal_matches_surviving_items(
            lines in prop::collection::vec((1u64..50_000u64, 1u32..10u32, prop::bool::ANY), 1..12)
        ) {
            let (mut sheet, tenant_id, sheet_id) = opened_sheet();

            let mut expected: u64 = 0;
            let mut to_remove = Vec::new();
            for (unit_price, quantity, remove_later) in &lines {
                let item_id = LineItemId::new();
                run(
                    &mut sheet,
                    add_item_cmd(tenant_id, sheet_id, item_id, *unit_price, *quantity),
                )
                .unwrap();
                if *remove_later {
                    to_remove.push(item_id);
                } else {
                    expected += unit_price * u64::from(*quantity);
                }
            }
            for item_id in to_remove {
                run(
                    &mut sheet,
                    JobSheetCommand::RemoveItem(RemoveItem {
                        tenant_id,
                        sheet_id,
                        item_id,
                        occurred_at: test_time(),
                    }),
                )
                .unwrap();
            }

            prop_assert_eq!(sheet.derived_totals().unwrap().subtotal, expected);
        }
    }
}
