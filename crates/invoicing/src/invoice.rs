use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use gearshop_core::{DomainError, DomainResult};
use gearshop_jobsheet::{JobSheetSnapshot, PaymentMethod, ProductRef, totals};

use crate::tax::TaxSelection;

/// Payment terms applied when the caller does not supply a due date.
const DEFAULT_TERMS_DAYS: i64 = 14;

/// Caller-supplied inputs for one projection: dates, free-text notes, and the
/// display labels the customer/vehicle directories resolved for the header.
/// The labels are opaque strings here; the directories own the records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvoiceOptions {
    pub invoice_date: DateTime<Utc>,
    /// Defaults to `invoice_date` + 14 days when absent.
    pub due_date: Option<DateTime<Utc>>,
    pub notes: String,
    pub customer_name: Option<String>,
    pub vehicle_model: Option<String>,
    pub license_plate: Option<String>,
}

impl InvoiceOptions {
    pub fn new(invoice_date: DateTime<Utc>) -> Self {
        Self {
            invoice_date,
            ..Self::default()
        }
    }
}

/// Parts line embedded in an invoice (a copy, not a reference).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub product_ref: ProductRef,
    pub name: String,
    pub unit_price: u64,
    pub quantity: u32,
    pub line_total: u64,
}

/// Completed labor line embedded in an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLaborLine {
    pub description: String,
    pub price: u64,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payment embedded in an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub amount: u64,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
}

/// Printable invoice document. Immutable once produced; the applied tax is
/// frozen in (`tax_name`/`tax_rate_bps`), so re-opening an old document never
/// re-derives tax from whatever preset happens to be selected later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// `INV-{sheet id}-{YYYYMMDD}` — deterministic for a sheet and a date.
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,

    pub customer_name: Option<String>,
    pub vehicle_model: Option<String>,
    pub license_plate: Option<String>,

    pub items: Vec<InvoiceLineItem>,
    pub labor: Vec<InvoiceLaborLine>,
    pub payments: Vec<InvoicePayment>,

    pub subtotal: u64,
    pub tax_name: String,
    pub tax_rate_bps: u32,
    pub tax_amount: u64,
    pub grand_total: u64,
    pub amount_paid: u64,
    /// Ledger-style balance: signed and **not** clamped, so an overpayment is
    /// visible as a negative figure. The aggregate's UI-facing balance clamps.
    pub balance_due: i64,

    pub notes: String,
}

/// Project a job-sheet snapshot plus a tax selection into an invoice.
///
/// Pure: the subtotal is recomputed from the snapshot's raw collections
/// (identical formula to the aggregate's), so the document is self-consistent
/// even if a caller's cached view was stale. Incomplete labor tasks are
/// excluded; all attached payments count.
pub fn project(
    snapshot: &JobSheetSnapshot,
    tax: &TaxSelection,
    options: InvoiceOptions,
) -> DomainResult<Invoice> {
    let subtotal = totals::subtotal(&snapshot.items, &snapshot.labor_tasks)?;
    let tax_amount = totals::tax_amount(subtotal, tax.rate_bps());
    let grand_total = subtotal
        .checked_add(tax_amount)
        .ok_or_else(|| DomainError::invariant("invoice grand total overflow"))?;
    let amount_paid = totals::amount_paid(&snapshot.payments)?;

    let balance_due = i64::try_from(grand_total as i128 - amount_paid as i128)
        .map_err(|_| DomainError::invariant("invoice balance overflow"))?;

    let items = snapshot
        .items
        .iter()
        .map(|item| {
            // Already range-checked by the subtotal above.
            let line_total = item.unit_price * u64::from(item.quantity);
            InvoiceLineItem {
                product_ref: item.product_ref.clone(),
                name: item.name.clone(),
                unit_price: item.unit_price,
                quantity: item.quantity,
                line_total,
            }
        })
        .collect();

    let labor = snapshot
        .labor_tasks
        .iter()
        .filter(|t| t.is_completed)
        .map(|t| InvoiceLaborLine {
            description: t.description.clone(),
            price: t.price,
            completed_at: t.completed_at,
        })
        .collect();

    let payments = snapshot
        .payments
        .iter()
        .map(|p| InvoicePayment {
            amount: p.amount,
            method: p.method,
            paid_at: p.paid_at,
        })
        .collect();

    let invoice_date = options.invoice_date;
    let due_date = options
        .due_date
        .unwrap_or_else(|| invoice_date + Duration::days(DEFAULT_TERMS_DAYS));

    Ok(Invoice {
        invoice_number: format!(
            "INV-{}-{}",
            snapshot.sheet_id,
            invoice_date.format("%Y%m%d")
        ),
        invoice_date,
        due_date,
        customer_name: options.customer_name,
        vehicle_model: options.vehicle_model,
        license_plate: options.license_plate,
        items,
        labor,
        payments,
        subtotal,
        tax_name: tax.name().to_string(),
        tax_rate_bps: tax.rate_bps(),
        tax_amount,
        grand_total,
        amount_paid,
        balance_due,
        notes: options.notes,
    })
}
