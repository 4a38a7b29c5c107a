//! Variant synthesis orchestration.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value as JsonValue;

use stockpile_catalog::{
    CatalogCommand, CatalogEvent, DeactivateVariant, ProductTemplate, SynchronizeVariants,
    TemplateId, VariantId, VariantRecord,
};
use stockpile_core::TenantId;
use stockpile_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::catalog::{CatalogProjection, TemplateView, VariantView};
use crate::projections::stock_levels::{StockLevel, StockLevelsProjection};
use crate::read_model::TenantStore;

const TEMPLATE_TYPE: &str = "catalog.template";

/// Outcome of one synthesis run, mapped from the committed event.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub created: Vec<VariantRecord>,
    pub reactivated: Vec<VariantId>,
    pub deactivated: Vec<VariantId>,
    pub blocked_deactivations: Vec<VariantId>,
}

/// Run the synthesis engine for a template.
///
/// Snapshots the total on-hand per existing variant from the stock-levels
/// projection (the deactivation guard), dispatches the reconciliation and
/// maps the committed event back into a report. A fully converged sync
/// commits nothing and returns an empty report.
pub fn synchronize_variants<S, B, ST, SV, SL>(
    dispatcher: &CommandDispatcher<S, B>,
    catalog: &CatalogProjection<ST, SV>,
    stock_levels: &StockLevelsProjection<SL>,
    tenant_id: TenantId,
    template_id: TemplateId,
    selections: BTreeMap<String, Vec<String>>,
) -> Result<SyncReport, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    ST: TenantStore<TemplateId, TemplateView>,
    SV: TenantStore<VariantId, VariantView>,
    SL: TenantStore<(stockpile_core::BranchId, VariantId), StockLevel>,
{
    let mut on_hand = BTreeMap::new();
    for variant in catalog.variants_for_template(tenant_id, template_id) {
        on_hand.insert(
            variant.variant_id,
            stock_levels.total_on_hand(tenant_id, variant.variant_id),
        );
    }

    let committed = dispatcher.dispatch::<ProductTemplate>(
        tenant_id,
        template_id.0,
        TEMPLATE_TYPE,
        CatalogCommand::SynchronizeVariants(SynchronizeVariants {
            tenant_id,
            template_id,
            selections,
            on_hand,
            occurred_at: Utc::now(),
        }),
        |_t, id| ProductTemplate::empty(TemplateId::new(id)),
    )?;

    let mut report = SyncReport::default();
    for stored in &committed {
        let event: CatalogEvent = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        if let CatalogEvent::VariantsSynchronized(sync) = event {
            report.created.extend(sync.created);
            report.reactivated.extend(sync.reactivated);
            report.deactivated.extend(sync.deactivated);
            report
                .blocked_deactivations
                .extend(sync.blocked_deactivations);
        }
    }

    tracing::info!(
        tenant_id = %tenant_id,
        template_id = %template_id,
        created = report.created.len(),
        reactivated = report.reactivated.len(),
        deactivated = report.deactivated.len(),
        blocked = report.blocked_deactivations.len(),
        "variants synchronized"
    );

    Ok(report)
}

/// Manually deactivate a variant, guarded by its live on-hand total.
pub fn deactivate_variant<S, B, ST, SV, SL>(
    dispatcher: &CommandDispatcher<S, B>,
    catalog: &CatalogProjection<ST, SV>,
    stock_levels: &StockLevelsProjection<SL>,
    tenant_id: TenantId,
    variant_id: VariantId,
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    ST: TenantStore<TemplateId, TemplateView>,
    SV: TenantStore<VariantId, VariantView>,
    SL: TenantStore<(stockpile_core::BranchId, VariantId), StockLevel>,
{
    let view = catalog
        .variant(tenant_id, variant_id)
        .ok_or(DispatchError::NotFound)?;
    let on_hand = stock_levels.total_on_hand(tenant_id, variant_id);

    dispatcher.dispatch::<ProductTemplate>(
        tenant_id,
        view.template_id.0,
        TEMPLATE_TYPE,
        CatalogCommand::DeactivateVariant(DeactivateVariant {
            tenant_id,
            template_id: view.template_id,
            variant_id,
            on_hand,
            occurred_at: Utc::now(),
        }),
        |_t, id| ProductTemplate::empty(TemplateId::new(id)),
    )?;
    Ok(())
}
