//! Job-sheet domain module (event-sourced).
//!
//! A job sheet is a repair work order that accumulates billable parts, labor
//! tasks and payments for one customer/vehicle visit. This crate contains the
//! business rules for that aggregate, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod sheet;
pub mod totals;

pub use sheet::{
    AddItem, AddLaborTask, AdvanceState, CustomerId, DeleteJobSheet, DraftTaskId, ItemAdded,
    ItemRemoved, JobSheet, JobSheetCommand, JobSheetDeleted, JobSheetEvent, JobSheetId,
    JobSheetOpened, JobSheetSnapshot, JobSheetState, LaborTask, LaborTaskAdded, LaborTaskId,
    LaborTaskRef, LaborTaskRemoved, LaborTaskUpdated, LineItem, LineItemId, OpenJobSheet, Payment,
    PaymentId, PaymentMethod, PaymentRecorded, PaymentRemoved, ProductRef, RecordPayment,
    RemoveItem, RemoveLaborTask, RemovePayment, StateAdvanced, UpdateLaborTask, VehicleId,
};
pub use totals::{DerivedTotals, PaymentStatus};
