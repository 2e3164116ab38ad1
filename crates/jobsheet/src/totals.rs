//! Derived financial figures for a job sheet.
//!
//! Totals are **never stored** — they are recomputed from the raw collections
//! on every read, so a cached figure can never drift from its inputs. All
//! amounts are in the smallest currency unit (cents); tax rates are basis
//! points (2100 = 21%).

use serde::{Deserialize, Serialize};

use gearshop_core::{DomainError, DomainResult};

use crate::sheet::{LaborTask, LineItem, Payment};

/// Payment progress label derived from totals, in priority order:
/// nothing billable, nothing paid, fully paid, or partially paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    NoItems,
    Unpaid,
    /// Partially paid; carries the rounded percentage of the total covered.
    Partial(u8),
    Paid,
}

impl PaymentStatus {
    /// Derive the status from a billable total and the amount received.
    ///
    /// The total is the grand total when a tax rate is known, otherwise the
    /// subtotal — the ordering of the policy is the same either way.
    pub fn derive(total: u64, paid: u64) -> Self {
        if total == 0 {
            PaymentStatus::NoItems
        } else if paid == 0 {
            PaymentStatus::Unpaid
        } else if paid >= total {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial(percent_rounded(paid, total))
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PaymentStatus::NoItems => write!(f, "No Items"),
            PaymentStatus::Unpaid => write!(f, "Unpaid"),
            PaymentStatus::Partial(pct) => write!(f, "Partial ({pct}%)"),
            PaymentStatus::Paid => write!(f, "Paid"),
        }
    }
}

/// `round(paid / total * 100)`, half-up, in pure integer math.
fn percent_rounded(paid: u64, total: u64) -> u8 {
    debug_assert!(total > 0);
    let pct = (paid as u128 * 200 + total as u128) / (total as u128 * 2);
    pct.min(100) as u8
}

/// Read-only snapshot of a job sheet's money figures.
///
/// `balance_due` here is the UI-facing figure and is clamped at zero; the
/// invoice projection exposes the signed, unclamped balance instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedTotals {
    pub subtotal: u64,
    pub amount_paid: u64,
    pub balance_due: u64,
    pub payment_status: PaymentStatus,
}

/// Sum of `unit_price × quantity` over items plus the price of **completed**
/// labor tasks. Incomplete labor never contributes to billable totals.
pub fn subtotal(items: &[LineItem], labor: &[LaborTask]) -> DomainResult<u64> {
    let mut sum: u64 = 0;
    for item in items {
        let line_total = (item.unit_price as u128)
            .checked_mul(item.quantity as u128)
            .filter(|t| *t <= u64::MAX as u128)
            .ok_or_else(|| DomainError::invariant("line item amount overflow"))?;
        sum = sum
            .checked_add(line_total as u64)
            .ok_or_else(|| DomainError::invariant("job sheet subtotal overflow"))?;
    }
    for task in labor {
        if task.is_completed {
            sum = sum
                .checked_add(task.price)
                .ok_or_else(|| DomainError::invariant("job sheet subtotal overflow"))?;
        }
    }
    Ok(sum)
}

/// Sum of all attached payment amounts.
pub fn amount_paid(payments: &[Payment]) -> DomainResult<u64> {
    let mut sum: u64 = 0;
    for p in payments {
        sum = sum
            .checked_add(p.amount)
            .ok_or_else(|| DomainError::invariant("amount paid overflow"))?;
    }
    Ok(sum)
}

/// Tax in cents for a subtotal at `rate_bps` basis points, rounded half-up.
pub fn tax_amount(subtotal: u64, rate_bps: u32) -> u64 {
    let num = subtotal as u128 * rate_bps as u128;
    ((num + 5_000) / 10_000) as u64
}

/// Recompute every derived figure from the raw collections.
///
/// Tax is invoice-time data, so the payment status is derived against the
/// subtotal here; [`derive_with_tax`] derives it against the grand total.
pub fn derive(
    items: &[LineItem],
    labor: &[LaborTask],
    payments: &[Payment],
) -> DomainResult<DerivedTotals> {
    let subtotal = subtotal(items, labor)?;
    totals_against(subtotal, payments)
}

/// Like [`derive`], with a flat tax rate applied: the balance and payment
/// status are computed against `subtotal + tax` instead of the subtotal.
pub fn derive_with_tax(
    items: &[LineItem],
    labor: &[LaborTask],
    payments: &[Payment],
    rate_bps: u32,
) -> DomainResult<DerivedTotals> {
    let subtotal = subtotal(items, labor)?;
    let grand_total = subtotal
        .checked_add(tax_amount(subtotal, rate_bps))
        .ok_or_else(|| DomainError::invariant("grand total overflow"))?;
    let mut totals = totals_against(grand_total, payments)?;
    totals.subtotal = subtotal;
    Ok(totals)
}

fn totals_against(total: u64, payments: &[Payment]) -> DomainResult<DerivedTotals> {
    let paid = amount_paid(payments)?;
    Ok(DerivedTotals {
        subtotal: total,
        amount_paid: paid,
        balance_due: total.saturating_sub(paid),
        payment_status: PaymentStatus::derive(total, paid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{LaborTaskId, LineItemId, PaymentId, PaymentMethod, ProductRef};
    use chrono::Utc;

    fn item(unit_price: u64, quantity: u32) -> LineItem {
        LineItem {
            item_id: LineItemId::new(),
            product_ref: ProductRef::new("OIL-5W30"),
            name: "Engine oil 5W30".to_string(),
            unit_price,
            quantity,
        }
    }

    fn labor(price: u64, is_completed: bool) -> LaborTask {
        LaborTask {
            task_id: LaborTaskId::new(),
            description: "Oil change".to_string(),
            price,
            is_completed,
            completed_at: is_completed.then(Utc::now),
            draft_ref: None,
        }
    }

    fn payment(amount: u64) -> Payment {
        Payment {
            payment_id: PaymentId::new(),
            amount,
            method: PaymentMethod::Cash,
            paid_at: Utc::now(),
        }
    }

    #[test]
    fn incomplete_labor_is_not_billable() {
        let items = vec![item(2000, 2)];
        let tasks = vec![labor(3000, true), labor(9999, false)];
        assert_eq!(subtotal(&items, &tasks).unwrap(), 4000 + 3000);
    }

    #[test]
    fn status_no_items_when_nothing_billable() {
        let totals = derive(&[], &[], &[]).unwrap();
        assert_eq!(totals.payment_status, PaymentStatus::NoItems);
        assert_eq!(totals.payment_status.to_string(), "No Items");
    }

    #[test]
    fn status_unpaid_then_partial_then_paid() {
        let items = vec![item(10_000, 1)];

        let unpaid = derive(&items, &[], &[]).unwrap();
        assert_eq!(unpaid.payment_status, PaymentStatus::Unpaid);

        let half = derive(&items, &[], &[payment(5_000)]).unwrap();
        assert_eq!(half.payment_status, PaymentStatus::Partial(50));
        assert_eq!(half.payment_status.to_string(), "Partial (50%)");
        assert_eq!(half.balance_due, 5_000);

        let paid = derive(&items, &[], &[payment(5_000), payment(5_000)]).unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.balance_due, 0);
    }

    #[test]
    fn overpayment_clamps_balance_to_zero() {
        let items = vec![item(1_000, 1)];
        let totals = derive(&items, &[], &[payment(2_500)]).unwrap();
        assert_eq!(totals.payment_status, PaymentStatus::Paid);
        assert_eq!(totals.balance_due, 0);
    }

    #[test]
    fn partial_percent_rounds_half_up() {
        // 1/3 paid -> 33.33..% -> 33; 2/3 -> 66.66..% -> 67.
        assert_eq!(PaymentStatus::derive(3_000, 1_000), PaymentStatus::Partial(33));
        assert_eq!(PaymentStatus::derive(3_000, 2_000), PaymentStatus::Partial(67));
    }

    #[test]
    fn tax_rounds_half_up() {
        // 21% of 70.00 is exactly 14.70.
        assert_eq!(tax_amount(7_000, 2_100), 1_470);
        // 10.5% of 0.95 is 0.09975 -> rounds to 0.10.
        assert_eq!(tax_amount(95, 1_050), 10);
        assert_eq!(tax_amount(7_000, 0), 0);
    }

    #[test]
    fn derive_with_tax_uses_grand_total_for_status() {
        let items = vec![item(7_000, 1)];
        let totals = derive_with_tax(&items, &[], &[payment(7_000)], 2_100).unwrap();
        assert_eq!(totals.subtotal, 7_000);
        // 7000 paid against 8470 due: still partial.
        assert_eq!(totals.payment_status, PaymentStatus::Partial(83));
        assert_eq!(totals.balance_due, 1_470);
    }

    #[test]
    fn item_amount_overflow_is_reported() {
        let items = vec![item(u64::MAX, 2)];
        let err = subtotal(&items, &[]).unwrap_err();
        assert!(matches!(err, gearshop_core::DomainError::InvariantViolation(_)));
    }
}
