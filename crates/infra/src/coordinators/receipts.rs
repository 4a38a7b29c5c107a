//! Goods receipt coordination (GRN feed).

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockpile_core::{BranchId, TenantId, UserId};
use stockpile_events::{EventBus, EventEnvelope};
use stockpile_ledger::{
    BranchStock, BranchStockId, LedgerCommand, MovementLine, ReceiveStock, SerialNumber,
    StockSelection,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::serial_registry::SerialRegistry;

#[derive(Debug, Clone)]
pub struct ReceiptRequest {
    pub branch_id: BranchId,
    pub reference: Option<String>,
    pub lines: Vec<MovementLine>,
    pub notes: Option<String>,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
}

/// Receive stock into a branch.
///
/// New serials are claimed in the tenant-wide registry before the ledger
/// command runs; if the ledger rejects the receipt the claim is rolled back,
/// so a failed receipt never burns serial numbers.
pub fn receive_stock<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    registry: &SerialRegistry,
    tenant_id: TenantId,
    request: ReceiptRequest,
) -> Result<Vec<StoredEvent>, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let serials: Vec<SerialNumber> = request
        .lines
        .iter()
        .flat_map(|line| match &line.selection {
            StockSelection::Serials(serials) => serials.clone(),
            StockSelection::Quantity { .. } => Vec::new(),
        })
        .collect();

    registry
        .register(tenant_id, &serials)
        .map_err(DispatchError::from)?;

    let stock_id = BranchStockId::for_branch(request.branch_id);
    let result = dispatcher.dispatch::<BranchStock>(
        tenant_id,
        stock_id.0,
        "stock.branch",
        LedgerCommand::ReceiveStock(ReceiveStock {
            tenant_id,
            branch_id: request.branch_id,
            operation_id: request.operation_id,
            user_id: request.user_id,
            reference: request.reference.clone(),
            lines: request.lines,
            notes: request.notes,
            occurred_at: Utc::now(),
        }),
        |_tenant_id, aggregate_id| BranchStock::empty(BranchStockId::new(aggregate_id)),
    );

    match result {
        Ok(committed) => {
            tracing::info!(
                tenant_id = %tenant_id,
                branch_id = %request.branch_id,
                entries = committed.len(),
                "stock received"
            );
            Ok(committed)
        }
        Err(err) => {
            registry.unregister(tenant_id, &serials);
            Err(err)
        }
    }
}
