//! Job sheet application service.
//!
//! One facade over the command side (dispatch through the event store) and
//! the query side (rehydrate and read). Commands funnel through the
//! dispatcher, so per-sheet writes serialize on the optimistic concurrency
//! check; the service itself holds no mutable state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use gearshop_core::{Aggregate, DomainError, TenantId};
use gearshop_events::{EventBus, EventEnvelope};
use gearshop_infra::dispatcher::{CommandDispatcher, DispatchError};
use gearshop_infra::event_store::{EventStore, EventStoreError};
use gearshop_invoicing::{Invoice, InvoiceOptions, TaxSelection, project};
use gearshop_jobsheet::{
    AddItem, AddLaborTask, AdvanceState, CustomerId, DeleteJobSheet, DerivedTotals, DraftTaskId,
    JobSheet, JobSheetCommand, JobSheetId, JobSheetSnapshot, JobSheetState, LaborTask, LaborTaskId,
    LaborTaskRef, LineItem, LineItemId, OpenJobSheet, Payment, PaymentId, PaymentMethod,
    ProductRef, RecordPayment, RemoveItem, RemoveLaborTask, RemovePayment, UpdateLaborTask,
    VehicleId,
};

use crate::ports::{CustomerDirectory, InventoryLookup, VehicleDirectory};

const JOBSHEET_AGGREGATE_TYPE: &str = "jobsheet";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job sheet not found")]
    NotFound,

    #[error("unknown product reference: {0}")]
    UnknownProduct(ProductRef),

    #[error("labor task reference did not resolve")]
    UnknownLaborTask,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvariantViolation(String),

    /// Another writer got in first; reload and retry.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("infrastructure failure: {0}")]
    Infra(String),
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => ServiceError::Conflict(msg),
            DispatchError::Validation(msg) => ServiceError::Validation(msg),
            DispatchError::InvariantViolation(msg) => ServiceError::InvariantViolation(msg),
            DispatchError::NotFound => ServiceError::NotFound,
            other => ServiceError::Infra(format!("{other:?}")),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => ServiceError::InvariantViolation(msg),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::NotFound => ServiceError::NotFound,
        }
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Infra(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct JobSheetService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    store: S,
    inventory: Arc<dyn InventoryLookup>,
    customers: Arc<dyn CustomerDirectory>,
    vehicles: Arc<dyn VehicleDirectory>,
}

impl<S, B> JobSheetService<S, B>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        inventory: Arc<dyn InventoryLookup>,
        customers: Arc<dyn CustomerDirectory>,
        vehicles: Arc<dyn VehicleDirectory>,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus),
            store,
            inventory,
            customers,
            vehicles,
        }
    }

    // ----- command side -----

    pub fn open_job_sheet(
        &self,
        tenant_id: TenantId,
        customer_id: Option<CustomerId>,
        vehicle_id: Option<VehicleId>,
    ) -> ServiceResult<JobSheetId> {
        let sheet_id = JobSheetId::new(gearshop_core::AggregateId::new());
        self.dispatch(JobSheetCommand::OpenJobSheet(OpenJobSheet {
            tenant_id,
            sheet_id,
            customer_id,
            vehicle_id,
            occurred_at: Utc::now(),
        }))?;
        tracing::info!(%tenant_id, %sheet_id, "job sheet opened");
        Ok(sheet_id)
    }

    /// Add a billable part. Name and unit price are snapshotted from
    /// inventory now; later catalog changes never touch this line.
    pub fn add_item(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        product_ref: ProductRef,
        quantity: u32,
    ) -> ServiceResult<LineItemId> {
        let info = self
            .inventory
            .sale_info(&product_ref)
            .ok_or_else(|| ServiceError::UnknownProduct(product_ref.clone()))?;

        let item_id = LineItemId::new();
        self.dispatch(JobSheetCommand::AddItem(AddItem {
            tenant_id,
            sheet_id,
            item_id,
            product_ref,
            name: info.name,
            unit_price: info.unit_sale_price,
            quantity,
            occurred_at: Utc::now(),
        }))?;
        Ok(item_id)
    }

    pub fn remove_item(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        item_id: LineItemId,
    ) -> ServiceResult<()> {
        self.dispatch(JobSheetCommand::RemoveItem(RemoveItem {
            tenant_id,
            sheet_id,
            item_id,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    /// Add a labor task (starts incomplete; price 0 allowed until quoted).
    /// The returned id is the assigned persistent id; `draft_ref` is echoed
    /// on the stored task so an editing session can correlate its rows.
    pub fn add_labor_task(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        description: impl Into<String>,
        price: u64,
        draft_ref: Option<DraftTaskId>,
    ) -> ServiceResult<LaborTaskId> {
        let task_id = LaborTaskId::new();
        self.dispatch(JobSheetCommand::AddLaborTask(AddLaborTask {
            tenant_id,
            sheet_id,
            task_id,
            description: description.into(),
            price,
            draft_ref,
            occurred_at: Utc::now(),
        }))?;
        Ok(task_id)
    }

    /// Update a labor task addressed by either its persistent id or a draft
    /// reference from the current editing session. Completion is gated on a
    /// positive effective price.
    pub fn update_labor_task(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        task_ref: &LaborTaskRef,
        price: Option<u64>,
        is_completed: Option<bool>,
    ) -> ServiceResult<()> {
        let task_id = self.resolve_task(tenant_id, sheet_id, task_ref)?;
        self.dispatch(JobSheetCommand::UpdateLaborTask(UpdateLaborTask {
            tenant_id,
            sheet_id,
            task_id,
            price,
            is_completed,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    pub fn remove_labor_task(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        task_ref: &LaborTaskRef,
    ) -> ServiceResult<()> {
        let task_id = self.resolve_task(tenant_id, sheet_id, task_ref)?;
        self.dispatch(JobSheetCommand::RemoveLaborTask(RemoveLaborTask {
            tenant_id,
            sheet_id,
            task_id,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    /// Record a customer payment. `paid_at` defaults to now.
    pub fn record_payment(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        amount: u64,
        method: PaymentMethod,
        paid_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<PaymentId> {
        let payment_id = PaymentId::new();
        self.dispatch(JobSheetCommand::RecordPayment(RecordPayment {
            tenant_id,
            sheet_id,
            payment_id,
            amount,
            method,
            paid_at: paid_at.unwrap_or_else(Utc::now),
            occurred_at: Utc::now(),
        }))?;
        Ok(payment_id)
    }

    pub fn remove_payment(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        payment_id: PaymentId,
    ) -> ServiceResult<()> {
        self.dispatch(JobSheetCommand::RemovePayment(RemovePayment {
            tenant_id,
            sheet_id,
            payment_id,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    /// Advance the workflow state one step along the fixed cycle and return
    /// the state now in effect.
    pub fn advance_state(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
    ) -> ServiceResult<JobSheetState> {
        self.dispatch(JobSheetCommand::AdvanceState(AdvanceState {
            tenant_id,
            sheet_id,
            occurred_at: Utc::now(),
        }))?;
        let sheet = self.rehydrate(tenant_id, sheet_id)?;
        Ok(sheet.state())
    }

    /// Logical delete; items, labor tasks and payments go with the sheet.
    pub fn delete_job_sheet(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
    ) -> ServiceResult<()> {
        self.dispatch(JobSheetCommand::DeleteJobSheet(DeleteJobSheet {
            tenant_id,
            sheet_id,
            occurred_at: Utc::now(),
        }))?;
        tracing::info!(%tenant_id, %sheet_id, "job sheet deleted");
        Ok(())
    }

    // ----- query side -----

    pub fn load(&self, tenant_id: TenantId, sheet_id: JobSheetId) -> ServiceResult<JobSheetSnapshot> {
        let sheet = self.rehydrate(tenant_id, sheet_id)?;
        Ok(sheet.snapshot()?)
    }

    pub fn list_items(&self, tenant_id: TenantId, sheet_id: JobSheetId) -> ServiceResult<Vec<LineItem>> {
        Ok(self.load(tenant_id, sheet_id)?.items)
    }

    pub fn list_labor_tasks(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
    ) -> ServiceResult<Vec<LaborTask>> {
        Ok(self.load(tenant_id, sheet_id)?.labor_tasks)
    }

    pub fn list_payments(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
    ) -> ServiceResult<Vec<Payment>> {
        Ok(self.load(tenant_id, sheet_id)?.payments)
    }

    pub fn derived_totals(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
    ) -> ServiceResult<DerivedTotals> {
        let sheet = self.rehydrate(tenant_id, sheet_id)?;
        Ok(sheet.derived_totals()?)
    }

    /// Project the sheet into an invoice under the given tax selection.
    /// Customer and vehicle header labels are resolved from the directories;
    /// absent directory entries leave the labels empty rather than failing.
    pub fn project_invoice(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        tax: &TaxSelection,
        notes: impl Into<String>,
        invoice_date: DateTime<Utc>,
    ) -> ServiceResult<Invoice> {
        let snapshot = self.load(tenant_id, sheet_id)?;

        let customer_name = snapshot
            .customer_id
            .and_then(|id| self.customers.display_name(id));
        let vehicle_label = snapshot.vehicle_id.and_then(|id| self.vehicles.label(id));

        let mut options = InvoiceOptions::new(invoice_date);
        options.notes = notes.into();
        options.customer_name = customer_name;
        if let Some(label) = vehicle_label {
            options.vehicle_model = label.model;
            options.license_plate = label.license_plate;
        }

        let invoice = project(&snapshot, tax, options)?;
        tracing::debug!(%tenant_id, %sheet_id, invoice_number = %invoice.invoice_number, "invoice projected");
        Ok(invoice)
    }

    // ----- helpers -----

    fn dispatch(&self, command: JobSheetCommand) -> ServiceResult<()> {
        use gearshop_events::Command;

        let tenant_id = command.tenant_id();
        let aggregate_id = command.target_aggregate_id();
        self.dispatcher.dispatch::<JobSheet>(
            tenant_id,
            aggregate_id,
            JOBSHEET_AGGREGATE_TYPE,
            command,
            |_, id| JobSheet::empty(JobSheetId::new(id)),
        )?;
        Ok(())
    }

    fn rehydrate(&self, tenant_id: TenantId, sheet_id: JobSheetId) -> ServiceResult<JobSheet> {
        let history = self.store.load_stream(tenant_id, sheet_id.0)?;
        if history.is_empty() {
            return Err(ServiceError::NotFound);
        }

        let mut sheet = JobSheet::empty(sheet_id);
        gearshop_infra::dispatcher::apply_history::<JobSheet>(&mut sheet, &history)
            .map_err(ServiceError::from)?;
        if !sheet.is_live() {
            return Err(ServiceError::NotFound);
        }
        Ok(sheet)
    }

    fn resolve_task(
        &self,
        tenant_id: TenantId,
        sheet_id: JobSheetId,
        task_ref: &LaborTaskRef,
    ) -> ServiceResult<LaborTaskId> {
        let sheet = self.rehydrate(tenant_id, sheet_id)?;
        sheet
            .resolve_task(task_ref)
            .ok_or(ServiceError::UnknownLaborTask)
    }
}
