use serde_json::Value as JsonValue;

use stockpile_catalog::VariantId;
use stockpile_core::{BranchId, TenantId};
use stockpile_events::EventEnvelope;
use stockpile_ledger::{LedgerEvent, MovementKind, SerialNumber, SerialStatus};

use crate::read_model::TenantStore;

use super::{Page, ProjectionError, StreamCursors};

/// Tenant-wide serial unit view.
///
/// Unlike the branch aggregates (which drop a unit when it leaves), the index
/// keeps every serial ever received and tracks its full lifecycle:
/// `in_stock`/`reserved` at a branch, `in_transit` between transfer legs,
/// `sold` once consumed, written off or sold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialView {
    pub serial: SerialNumber,
    pub variant_id: VariantId,
    /// Current branch for in-stock/reserved units; last known branch while
    /// in transit or after leaving stock.
    pub branch_id: BranchId,
    pub status: SerialStatus,
}

/// Serial availability projection over branch-stock streams.
#[derive(Debug)]
pub struct SerialIndexProjection<S>
where
    S: TenantStore<SerialNumber, SerialView>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SerialIndexProjection<S>
where
    S: TenantStore<SerialNumber, SerialView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, serial: &SerialNumber) -> Option<SerialView> {
        self.store.get(tenant_id, serial)
    }

    /// In-stock serials for (variant, branch), filtered by an optional
    /// substring and paginated. Ordering is stable (by serial number), so
    /// paging is restartable.
    pub fn available(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        branch_id: BranchId,
        search: Option<&str>,
        page: Page,
    ) -> Vec<SerialView> {
        let mut rows: Vec<SerialView> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|v| {
                v.variant_id == variant_id
                    && v.branch_id == branch_id
                    && v.status == SerialStatus::InStock
                    && search
                        .map(|s| v.serial.as_str().contains(s))
                        .unwrap_or(true)
            })
            .collect();
        rows.sort_by(|a, b| a.serial.cmp(&b.serial));
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

        match &event {
            LedgerEvent::MovementRecorded(e) => {
                let m = &e.movement;
                if m.tenant_id != tenant_id {
                    return Err(ProjectionError::TenantIsolation(
                        "movement tenant_id does not match envelope".to_string(),
                    ));
                }
                if m.serials.is_empty() {
                    self.cursors.advance(tenant_id, aggregate_id, seq);
                    return Ok(());
                }

                let status = if m.quantity_change >= 0 {
                    SerialStatus::InStock
                } else {
                    match m.kind {
                        MovementKind::TransferOut => SerialStatus::InTransit,
                        _ => SerialStatus::Sold,
                    }
                };

                for serial in &m.serials {
                    self.store.upsert(
                        tenant_id,
                        serial.clone(),
                        SerialView {
                            serial: serial.clone(),
                            variant_id: m.variant_id,
                            branch_id: m.branch_id,
                            status,
                        },
                    );
                }
            }
            LedgerEvent::SerialsReserved(e) => {
                if e.tenant_id != tenant_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope".to_string(),
                    ));
                }
                for serial in &e.serials {
                    if let Some(mut view) = self.store.get(tenant_id, serial) {
                        view.status = SerialStatus::Reserved;
                        self.store.upsert(tenant_id, serial.clone(), view);
                    }
                }
            }
            LedgerEvent::SerialsReleased(e) => {
                if e.tenant_id != tenant_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope".to_string(),
                    ));
                }
                for serial in &e.serials {
                    if let Some(mut view) = self.store.get(tenant_id, serial) {
                        view.status = SerialStatus::InStock;
                        self.store.upsert(tenant_id, serial.clone(), view);
                    }
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
