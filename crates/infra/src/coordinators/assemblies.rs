//! Kit assembly orchestration.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockpile_catalog::{TemplateId, TrackingMode, VariantId};
use stockpile_core::{BranchId, DomainError, TenantId, UserId};
use stockpile_events::{EventBus, EventEnvelope};
use stockpile_ledger::{
    Assemble, BranchStock, BranchStockId, LedgerCommand, MovementLine, StockSelection,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::catalog::{CatalogProjection, TemplateView, VariantView};
use crate::read_model::TenantStore;

#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub branch_id: BranchId,
    pub bundle_variant_id: VariantId,
    pub quantity_to_assemble: i64,
    /// One selection per recipe component: a quantity (with optional batch)
    /// for bulk components, explicit serials for serialized ones.
    pub component_selections: BTreeMap<VariantId, StockSelection>,
    pub output_batch: Option<String>,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct AssemblyReceipt {
    pub assembly_id: Uuid,
    pub bundle_variant_id: VariantId,
    pub quantity_produced: i64,
    pub ledger_entries: usize,
}

/// Execute an assembly job: validate the selections against the bundle
/// recipe, then consume every component and produce the bundle in one atomic
/// ledger append.
///
/// All validation — unknown bundle, missing recipe, missing/extra component
/// selections, serial-count mismatches — happens before any ledger write is
/// attempted; the ledger re-checks availability inside the same append.
pub fn execute_assembly<S, B, ST, SV>(
    dispatcher: &CommandDispatcher<S, B>,
    catalog: &CatalogProjection<ST, SV>,
    tenant_id: TenantId,
    request: AssemblyRequest,
) -> Result<AssemblyReceipt, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    ST: TenantStore<TemplateId, TemplateView>,
    SV: TenantStore<VariantId, VariantView>,
{
    if request.quantity_to_assemble <= 0 {
        return Err(DispatchError::Validation(
            "quantity_to_assemble must be positive".to_string(),
        ));
    }

    let bundle = catalog
        .variant(tenant_id, request.bundle_variant_id)
        .ok_or(DispatchError::NotFound)?;
    if !bundle.is_active {
        return Err(DispatchError::Validation(
            "bundle variant is inactive".to_string(),
        ));
    }
    let recipe = bundle.recipe.as_ref().ok_or_else(|| {
        DispatchError::Validation("bundle variant has no recipe".to_string())
    })?;

    let mut components = Vec::with_capacity(recipe.len());
    for item in recipe {
        let required = item.quantity_per_kit * request.quantity_to_assemble;
        let selection = request
            .component_selections
            .get(&item.variant_id)
            .ok_or_else(|| {
                DispatchError::Validation(format!(
                    "no selection for component variant {}",
                    item.variant_id
                ))
            })?;

        if let Some(component_view) = catalog.variant(tenant_id, item.variant_id) {
            let mismatch = matches!(
                (component_view.tracking, selection),
                (TrackingMode::Serialized, StockSelection::Quantity { .. })
                    | (TrackingMode::Batched, StockSelection::Serials(_))
            );
            if mismatch {
                return Err(DispatchError::Validation(format!(
                    "selection type does not match tracking mode of component {}",
                    item.variant_id
                )));
            }
        }

        match selection {
            StockSelection::Serials(serials) => {
                if serials.len() as i64 != required {
                    return Err(DispatchError::Validation(format!(
                        "component {} requires exactly {} serials, {} selected",
                        item.variant_id,
                        required,
                        serials.len()
                    )));
                }
            }
            StockSelection::Quantity { quantity, .. } => {
                if *quantity != required {
                    return Err(DispatchError::Validation(format!(
                        "component {} requires quantity {}, {} selected",
                        item.variant_id, required, quantity
                    )));
                }
            }
        }

        components.push(MovementLine {
            variant_id: item.variant_id,
            selection: selection.clone(),
        });
    }

    for variant_id in request.component_selections.keys() {
        if !recipe.iter().any(|c| c.variant_id == *variant_id) {
            return Err(DispatchError::from(DomainError::validation(format!(
                "variant {variant_id} is not a component of this bundle"
            ))));
        }
    }

    let assembly_id = Uuid::now_v7();
    let stock_id = BranchStockId::for_branch(request.branch_id);
    let committed = dispatcher.dispatch::<BranchStock>(
        tenant_id,
        stock_id.0,
        "stock.branch",
        LedgerCommand::Assemble(Assemble {
            tenant_id,
            branch_id: request.branch_id,
            operation_id: request.operation_id,
            user_id: request.user_id,
            assembly_id,
            bundle_variant_id: request.bundle_variant_id,
            quantity: request.quantity_to_assemble,
            output_batch: request.output_batch.clone(),
            components,
            occurred_at: Utc::now(),
        }),
        |_t, id| BranchStock::empty(BranchStockId::new(id)),
    )?;

    tracing::info!(
        tenant_id = %tenant_id,
        branch_id = %request.branch_id,
        bundle = %request.bundle_variant_id,
        kits = request.quantity_to_assemble,
        "assembly completed"
    );

    Ok(AssemblyReceipt {
        assembly_id,
        bundle_variant_id: request.bundle_variant_id,
        quantity_produced: request.quantity_to_assemble,
        ledger_entries: committed.len(),
    })
}
