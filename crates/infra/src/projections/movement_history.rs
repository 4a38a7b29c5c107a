use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockpile_catalog::VariantId;
use stockpile_core::{BranchId, TenantId, UserId};
use stockpile_events::EventEnvelope;
use stockpile_ledger::{LedgerEvent, MovementKind, SerialNumber};

use crate::read_model::TenantStore;

use super::{Page, ProjectionError, StreamCursors};

/// One row of the audit trail. `movement_id` is the stored event id, which
/// makes the row stable across projection rebuilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementView {
    pub movement_id: Uuid,
    pub branch_id: BranchId,
    pub variant_id: VariantId,
    pub batch: Option<String>,
    pub quantity_change: i64,
    pub serials: Vec<SerialNumber>,
    pub kind: MovementKind,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub reference: Option<String>,
    pub user_id: Option<UserId>,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

/// Movement history projection over branch-stock streams.
#[derive(Debug)]
pub struct MovementHistoryProjection<S>
where
    S: TenantStore<Uuid, MovementView>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> MovementHistoryProjection<S>
where
    S: TenantStore<Uuid, MovementView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Movement history, newest first, optionally filtered by branch and/or
    /// variant.
    pub fn history(
        &self,
        tenant_id: TenantId,
        branch_id: Option<BranchId>,
        variant_id: Option<VariantId>,
        page: Page,
    ) -> Vec<MovementView> {
        let mut rows: Vec<MovementView> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|m| branch_id.map(|b| m.branch_id == b).unwrap_or(true))
            .filter(|m| variant_id.map(|v| m.variant_id == v).unwrap_or(true))
            .collect();
        rows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then(b.movement_id.cmp(&a.movement_id))
        });
        page.slice(rows)
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "stock.branch" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.check(tenant_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: LedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        if let LedgerEvent::MovementRecorded(e) = &event {
            let m = &e.movement;
            if m.tenant_id != tenant_id {
                return Err(ProjectionError::TenantIsolation(
                    "movement tenant_id does not match envelope".to_string(),
                ));
            }
            self.store.upsert(
                tenant_id,
                envelope.event_id(),
                MovementView {
                    movement_id: envelope.event_id(),
                    branch_id: m.branch_id,
                    variant_id: m.variant_id,
                    batch: m.batch.clone(),
                    quantity_change: m.quantity_change,
                    serials: m.serials.clone(),
                    kind: m.kind,
                    reason: m.reason.clone(),
                    notes: m.notes.clone(),
                    reference: m.reference.as_ref().map(|r| r.to_string()),
                    user_id: m.user_id,
                    occurred_at: m.occurred_at,
                },
            );
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
