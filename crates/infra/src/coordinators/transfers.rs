//! Transfer orchestration: the two-phase state machine plus its ledger legs.
//!
//! Ordering rules:
//! - dispatch marks the document in transit *first* (a racing second dispatch
//!   loses there with a state error), then debits the source branch; a failed
//!   debit triggers the compensating revert back to pending;
//! - receive credits the destination *first* (the ledger's per-transfer guard
//!   kills a racing duplicate), then completes the document.

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockpile_core::{AggregateId, BranchId, DomainError, TenantId, UserId};
use stockpile_events::{EventBus, EventEnvelope};
use stockpile_ledger::{
    BranchStock, BranchStockId, DispatchTransfer, LedgerCommand, MovementLine, ReceiveTransfer,
};
use stockpile_transfers::{
    CancelTransfer, CreateTransfer, MarkDispatched, MarkReceived, RevertDispatch, StockTransfer,
    TransferCommand, TransferId, TransferStatus,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

const TRANSFER_TYPE: &str = "stock.transfer";
const BRANCH_STOCK_TYPE: &str = "stock.branch";

pub fn create_transfer<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    from_branch_id: BranchId,
    to_branch_id: BranchId,
    lines: Vec<MovementLine>,
) -> Result<TransferId, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let transfer_id = TransferId::new(AggregateId::new());
    dispatcher.dispatch::<StockTransfer>(
        tenant_id,
        transfer_id.0,
        TRANSFER_TYPE,
        TransferCommand::CreateTransfer(CreateTransfer {
            tenant_id,
            transfer_id,
            from_branch_id,
            to_branch_id,
            lines,
            occurred_at: Utc::now(),
        }),
        |_tenant_id, aggregate_id| StockTransfer::empty(TransferId::new(aggregate_id)),
    )?;
    Ok(transfer_id)
}

pub fn load_transfer<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    transfer_id: TransferId,
) -> Result<StockTransfer, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let transfer = dispatcher.rehydrate::<StockTransfer>(tenant_id, transfer_id.0, |_t, id| {
        StockTransfer::empty(TransferId::new(id))
    })?;
    if transfer.tenant_id().is_none() {
        return Err(DispatchError::NotFound);
    }
    Ok(transfer)
}

/// Dispatch a pending transfer: debit the source branch and move the
/// document to in_transit. Aborts with no stock change when any line cannot
/// be debited.
pub fn dispatch_transfer<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    transfer_id: TransferId,
    operation_id: Uuid,
    user_id: Option<UserId>,
) -> Result<TransferStatus, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let transfer = load_transfer(dispatcher, tenant_id, transfer_id)?;
    let from_branch_id = transfer.from_branch_id().ok_or(DispatchError::NotFound)?;
    let lines: Vec<MovementLine> = transfer.lines().to_vec();

    // State machine first: a concurrent second dispatch loses here.
    dispatcher.dispatch::<StockTransfer>(
        tenant_id,
        transfer_id.0,
        TRANSFER_TYPE,
        TransferCommand::MarkDispatched(MarkDispatched {
            tenant_id,
            transfer_id,
            occurred_at: Utc::now(),
        }),
        |_t, id| StockTransfer::empty(TransferId::new(id)),
    )?;

    let stock_id = BranchStockId::for_branch(from_branch_id);
    let debit = dispatcher.dispatch::<BranchStock>(
        tenant_id,
        stock_id.0,
        BRANCH_STOCK_TYPE,
        LedgerCommand::DispatchTransfer(DispatchTransfer {
            tenant_id,
            branch_id: from_branch_id,
            operation_id,
            user_id,
            transfer_id: *transfer_id.0.as_uuid(),
            lines,
            occurred_at: Utc::now(),
        }),
        |_t, id| BranchStock::empty(BranchStockId::new(id)),
    );

    match debit {
        Ok(_) => {
            tracing::info!(tenant_id = %tenant_id, transfer_id = %transfer_id, "transfer dispatched");
            Ok(TransferStatus::InTransit)
        }
        Err(err) => {
            tracing::warn!(
                tenant_id = %tenant_id,
                transfer_id = %transfer_id,
                error = ?err,
                "source debit failed, reverting dispatch"
            );
            let revert = dispatcher.dispatch::<StockTransfer>(
                tenant_id,
                transfer_id.0,
                TRANSFER_TYPE,
                TransferCommand::RevertDispatch(RevertDispatch {
                    tenant_id,
                    transfer_id,
                    reason: format!("source debit failed: {err:?}"),
                    occurred_at: Utc::now(),
                }),
                |_t, id| StockTransfer::empty(TransferId::new(id)),
            );
            if let Err(revert_err) = revert {
                tracing::error!(
                    tenant_id = %tenant_id,
                    transfer_id = %transfer_id,
                    error = ?revert_err,
                    "dispatch compensation failed, transfer stuck in transit"
                );
            }
            Err(err)
        }
    }
}

/// Receive an in-transit transfer: credit the destination branch with the
/// dispatched quantities/serials and complete the document.
pub fn receive_transfer<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    transfer_id: TransferId,
    operation_id: Uuid,
    user_id: Option<UserId>,
) -> Result<TransferStatus, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let transfer = load_transfer(dispatcher, tenant_id, transfer_id)?;
    if transfer.status() != TransferStatus::InTransit {
        return Err(DispatchError::from(DomainError::state(format!(
            "only in-transit transfers can be received (status: {:?})",
            transfer.status()
        ))));
    }
    let to_branch_id = transfer.to_branch_id().ok_or(DispatchError::NotFound)?;
    let lines: Vec<MovementLine> = transfer.lines().to_vec();

    // Credit first: the ledger's per-transfer guard makes a racing duplicate
    // receive fail here before the document completes.
    let stock_id = BranchStockId::for_branch(to_branch_id);
    dispatcher.dispatch::<BranchStock>(
        tenant_id,
        stock_id.0,
        BRANCH_STOCK_TYPE,
        LedgerCommand::ReceiveTransfer(ReceiveTransfer {
            tenant_id,
            branch_id: to_branch_id,
            operation_id,
            user_id,
            transfer_id: *transfer_id.0.as_uuid(),
            lines,
            occurred_at: Utc::now(),
        }),
        |_t, id| BranchStock::empty(BranchStockId::new(id)),
    )?;

    let marked = dispatcher.dispatch::<StockTransfer>(
        tenant_id,
        transfer_id.0,
        TRANSFER_TYPE,
        TransferCommand::MarkReceived(MarkReceived {
            tenant_id,
            transfer_id,
            occurred_at: Utc::now(),
        }),
        |_t, id| StockTransfer::empty(TransferId::new(id)),
    );

    if let Err(err) = marked {
        tracing::error!(
            tenant_id = %tenant_id,
            transfer_id = %transfer_id,
            error = ?err,
            "destination credited but transfer completion failed"
        );
        return Err(err);
    }

    tracing::info!(tenant_id = %tenant_id, transfer_id = %transfer_id, "transfer completed");
    Ok(TransferStatus::Completed)
}

pub fn cancel_transfer<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    transfer_id: TransferId,
) -> Result<TransferStatus, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    dispatcher.dispatch::<StockTransfer>(
        tenant_id,
        transfer_id.0,
        TRANSFER_TYPE,
        TransferCommand::CancelTransfer(CancelTransfer {
            tenant_id,
            transfer_id,
            occurred_at: Utc::now(),
        }),
        |_t, id| StockTransfer::empty(TransferId::new(id)),
    )?;
    Ok(TransferStatus::Cancelled)
}
