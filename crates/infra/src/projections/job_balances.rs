//! Job sheet balances projection.
//!
//! Maintains a per-sheet balance document (subtotal, amount paid, balance
//! due, payment status) by folding job sheet events into a rehydrated copy
//! of the aggregate and recomputing totals after each event. Consumption is
//! idempotent: a per-stream cursor drops redelivered envelopes, which the
//! at-least-once bus is allowed to produce.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use gearshop_core::{Aggregate, AggregateId, TenantId};
use gearshop_events::EventEnvelope;
use gearshop_jobsheet::{JobSheet, JobSheetEvent, JobSheetId, JobSheetState, PaymentStatus};

use crate::read_model::{InMemoryTenantStore, TenantStore};

pub const JOBSHEET_AGGREGATE_TYPE: &str = "jobsheet";

/// Per-sheet balance document (all money in cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSheetBalance {
    pub sheet_id: JobSheetId,
    pub state: JobSheetState,
    pub subtotal: u64,
    pub amount_paid: u64,
    /// Clamped at zero; overpayments show as zero due.
    pub balance_due: u64,
    pub payment_status: PaymentStatus,
    /// Stream version this document was computed at.
    pub version: u64,
}

#[derive(Debug, Error)]
pub enum JobBalancesError {
    #[error("failed to deserialize job sheet event payload: {0}")]
    Deserialize(String),

    #[error("totals computation failed: {0}")]
    Totals(String),
}

/// Stateful projection: rehydration state plus the balance store.
pub struct JobBalancesProjection {
    sheets: RwLock<HashMap<(TenantId, AggregateId), Rehydrated>>,
    balances: InMemoryTenantStore<JobSheetBalance>,
}

struct Rehydrated {
    sheet: JobSheet,
    cursor: u64,
}

impl JobBalancesProjection {
    pub fn new() -> Self {
        Self {
            sheets: RwLock::new(HashMap::new()),
            balances: InMemoryTenantStore::new(),
        }
    }

    /// Fold one envelope into the projection.
    ///
    /// Envelopes for other aggregate types, and envelopes at or below the
    /// stream cursor, are skipped without error.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), JobBalancesError> {
        if envelope.aggregate_type() != JOBSHEET_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let key = (tenant_id, aggregate_id);

        let event: JobSheetEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| JobBalancesError::Deserialize(e.to_string()))?;

        let mut sheets = self.sheets.write().unwrap_or_else(|e| e.into_inner());
        let entry = sheets.entry(key).or_insert_with(|| Rehydrated {
            sheet: JobSheet::empty(JobSheetId::new(aggregate_id)),
            cursor: 0,
        });

        if envelope.sequence_number() <= entry.cursor {
            tracing::debug!(
                %tenant_id,
                %aggregate_id,
                sequence_number = envelope.sequence_number(),
                cursor = entry.cursor,
                "duplicate envelope skipped"
            );
            return Ok(());
        }

        entry.sheet.apply(&event);
        entry.cursor = envelope.sequence_number();

        if !entry.sheet.is_live() {
            // Deleted sheets disappear from the read side.
            sheets.remove(&key);
            drop(sheets);
            self.balances.remove(tenant_id, aggregate_id);
            return Ok(());
        }

        let totals = entry
            .sheet
            .derived_totals()
            .map_err(|e| JobBalancesError::Totals(e.to_string()))?;
        let balance = JobSheetBalance {
            sheet_id: entry.sheet.id_typed(),
            state: entry.sheet.state(),
            subtotal: totals.subtotal,
            amount_paid: totals.amount_paid,
            balance_due: totals.balance_due,
            payment_status: totals.payment_status,
            version: entry.cursor,
        };
        drop(sheets);

        self.balances.upsert(tenant_id, aggregate_id, balance);
        Ok(())
    }

    pub fn balance(&self, tenant_id: TenantId, sheet_id: JobSheetId) -> Option<JobSheetBalance> {
        self.balances.get(tenant_id, sheet_id.0)
    }

    /// All balances for a tenant, in unspecified order.
    pub fn balances_for_tenant(&self, tenant_id: TenantId) -> Vec<JobSheetBalance> {
        self.balances.list(tenant_id)
    }
}

impl Default for JobBalancesProjection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gearshop_events::Event;
    use gearshop_jobsheet::{
        ItemAdded, JobSheetDeleted, JobSheetOpened, LineItem, LineItemId, Payment, PaymentId,
        PaymentMethod, PaymentRecorded, ProductRef,
    };
    use uuid::Uuid;

    fn envelope(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        sequence_number: u64,
        event: &JobSheetEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            JOBSHEET_AGGREGATE_TYPE.to_string(),
            sequence_number,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn opened(tenant_id: TenantId, sheet_id: JobSheetId) -> JobSheetEvent {
        JobSheetEvent::JobSheetOpened(JobSheetOpened {
            tenant_id,
            sheet_id,
            customer_id: None,
            vehicle_id: None,
            occurred_at: Utc::now(),
        })
    }

    fn item_added(tenant_id: TenantId, sheet_id: JobSheetId, unit_price: u64) -> JobSheetEvent {
        JobSheetEvent::ItemAdded(ItemAdded {
            tenant_id,
            sheet_id,
            item: LineItem {
                item_id: LineItemId::new(),
                product_ref: ProductRef::new("OIL-5W30"),
                name: "Engine oil 5W30".to_string(),
                unit_price,
                quantity: 1,
            },
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn folds_events_into_a_balance_document() {
        let projection = JobBalancesProjection::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let sheet_id = JobSheetId::new(aggregate_id);

        projection
            .apply_envelope(&envelope(tenant_id, aggregate_id, 1, &opened(tenant_id, sheet_id)))
            .unwrap();
        projection
            .apply_envelope(&envelope(
                tenant_id,
                aggregate_id,
                2,
                &item_added(tenant_id, sheet_id, 4_000),
            ))
            .unwrap();
        projection
            .apply_envelope(&envelope(
                tenant_id,
                aggregate_id,
                3,
                &JobSheetEvent::PaymentRecorded(PaymentRecorded {
                    tenant_id,
                    sheet_id,
                    payment: Payment {
                        payment_id: PaymentId::new(),
                        amount: 1_000,
                        method: PaymentMethod::Cash,
                        paid_at: Utc::now(),
                    },
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        let balance = projection.balance(tenant_id, sheet_id).unwrap();
        assert_eq!(balance.subtotal, 4_000);
        assert_eq!(balance.amount_paid, 1_000);
        assert_eq!(balance.balance_due, 3_000);
        assert_eq!(balance.payment_status, PaymentStatus::Partial(25));
        assert_eq!(balance.version, 3);
    }

    #[test]
    fn redelivered_envelopes_are_skipped() {
        let projection = JobBalancesProjection::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let sheet_id = JobSheetId::new(aggregate_id);

        projection
            .apply_envelope(&envelope(tenant_id, aggregate_id, 1, &opened(tenant_id, sheet_id)))
            .unwrap();
        let add = envelope(tenant_id, aggregate_id, 2, &item_added(tenant_id, sheet_id, 2_500));
        projection.apply_envelope(&add).unwrap();
        // Same sequence number again: must not double the subtotal.
        projection.apply_envelope(&add).unwrap();

        let balance = projection.balance(tenant_id, sheet_id).unwrap();
        assert_eq!(balance.subtotal, 2_500);
    }

    #[test]
    fn deletion_removes_the_document() {
        let projection = JobBalancesProjection::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let sheet_id = JobSheetId::new(aggregate_id);

        projection
            .apply_envelope(&envelope(tenant_id, aggregate_id, 1, &opened(tenant_id, sheet_id)))
            .unwrap();
        assert!(projection.balance(tenant_id, sheet_id).is_some());

        projection
            .apply_envelope(&envelope(
                tenant_id,
                aggregate_id,
                2,
                &JobSheetEvent::JobSheetDeleted(JobSheetDeleted {
                    tenant_id,
                    sheet_id,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        assert!(projection.balance(tenant_id, sheet_id).is_none());
        assert!(projection.balances_for_tenant(tenant_id).is_empty());
    }

    #[test]
    fn ignores_other_aggregate_types() {
        let projection = JobBalancesProjection::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();

        let env = EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            "invoice".to_string(),
            1,
            serde_json::json!({"anything": true}),
        );
        projection.apply_envelope(&env).unwrap();
        assert!(projection.balances_for_tenant(tenant_id).is_empty());
    }

    #[test]
    fn event_types_are_stable() {
        let tenant_id = TenantId::new();
        let sheet_id = JobSheetId::new(AggregateId::new());
        assert_eq!(opened(tenant_id, sheet_id).event_type(), "jobsheet.opened");
    }
}
