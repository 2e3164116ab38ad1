//! Invoicing domain module.
//!
//! A projection, not an aggregate: [`project`] turns a frozen job-sheet
//! snapshot plus a tax selection into an immutable [`Invoice`] document.
//! Pure and deterministic — no IO, no storage, no ambient state.

pub mod invoice;
pub mod tax;

pub use invoice::{
    Invoice, InvoiceLaborLine, InvoiceLineItem, InvoiceOptions, InvoicePayment, project,
};
pub use tax::TaxSelection;
