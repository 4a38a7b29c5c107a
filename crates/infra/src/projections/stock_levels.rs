use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use stockpile_catalog::VariantId;
use stockpile_core::{BranchId, TenantId};
use stockpile_events::EventEnvelope;
use stockpile_ledger::LedgerEvent;

use crate::read_model::TenantStore;

use super::{ProjectionError, StreamCursors};

/// Queryable stock level: on-hand per (branch, variant), with per-batch lot
/// counters and serial counts. Consumed by the UI and by the print/label
/// subsystem to bound label quantities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub branch_id: BranchId,
    pub variant_id: VariantId,
    /// Lot counters keyed by optional batch number.
    pub lots: BTreeMap<Option<String>, i64>,
    pub in_stock_serials: i64,
    pub reserved_serials: i64,
}

impl StockLevel {
    fn empty(branch_id: BranchId, variant_id: VariantId) -> Self {
        Self {
            branch_id,
            variant_id,
            lots: BTreeMap::new(),
            in_stock_serials: 0,
            reserved_serials: 0,
        }
    }

    /// Derived on-hand: lot counters plus in-stock serial units. Reserved
    /// units are excluded, matching the ledger's definition.
    pub fn on_hand(&self) -> i64 {
        let lots: i64 = self.lots.values().sum();
        lots + self.in_stock_serials
    }
}

/// Stock levels projection over branch-stock streams.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: TenantStore<(BranchId, VariantId), StockLevel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLevelsProjection<S>
where
    S: TenantStore<(BranchId, VariantId), StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
    ) -> Option<StockLevel> {
        self.store.get(tenant_id, &(branch_id, variant_id))
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        self.store.list(tenant_id)
    }

    /// On-hand for one (branch, variant); 0 when nothing was ever received.
    pub fn on_hand(&self, tenant_id: TenantId, branch_id: BranchId, variant_id: VariantId) -> i64 {
        self.get(tenant_id, branch_id, variant_id)
            .map(|l| l.on_hand())
            .unwrap_or(0)
    }

    /// Lot counter for (branch, variant, batch).
    pub fn lot_quantity(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
        batch: Option<&str>,
    ) -> i64 {
        self.get(tenant_id, branch_id, variant_id)
            .and_then(|l| l.lots.get(&batch.map(str::to_string)).copied())
            .unwrap_or(0)
    }

    /// Total on-hand for a variant across all branches. Feeds the variant
    /// synthesis deactivation guard.
    pub fn total_on_hand(&self, tenant_id: TenantId, variant_id: VariantId) -> i64 {
        self.list(tenant_id)
            .into_iter()
            .filter(|l| l.variant_id == variant_id)
            .map(|l| l.on_hand())
            .sum()
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
                let key = (m.branch_id, m.variant_id);
                let mut level = self
                    .store
                    .get(tenant_id, &key)
                    .unwrap_or_else(|| StockLevel::empty(m.branch_id, m.variant_id));

                if m.serials.is_empty() {
                    *level.lots.entry(m.batch.clone()).or_insert(0) += m.quantity_change;
                } else if m.quantity_change >= 0 {
                    level.in_stock_serials += m.serials.len() as i64;
                } else {
                    level.in_stock_serials -= m.serials.len() as i64;
                }
                self.store.upsert(tenant_id, key, level);
            }
            LedgerEvent::SerialsReserved(e) => {
                if e.tenant_id != tenant_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope".to_string(),
                    ));
                }
                let key = (e.branch_id, e.variant_id);
                let mut level = self
                    .store
                    .get(tenant_id, &key)
                    .unwrap_or_else(|| StockLevel::empty(e.branch_id, e.variant_id));
                level.in_stock_serials -= e.serials.len() as i64;
                level.reserved_serials += e.serials.len() as i64;
                self.store.upsert(tenant_id, key, level);
            }
            LedgerEvent::SerialsReleased(e) => {
                if e.tenant_id != tenant_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope".to_string(),
                    ));
                }
                let key = (e.branch_id, e.variant_id);
                let mut level = self
                    .store
                    .get(tenant_id, &key)
                    .unwrap_or_else(|| StockLevel::empty(e.branch_id, e.variant_id));
                level.in_stock_serials += e.serials.len() as i64;
                level.reserved_serials -= e.serials.len() as i64;
                self.store.upsert(tenant_id, key, level);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
            }
        }

        // Deterministic replay order: tenant, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
