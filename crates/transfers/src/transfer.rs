use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, TenantId};
use stockpile_events::Event;
use stockpile_ledger::{MovementLine, StockSelection};

/// Stock transfer identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub AggregateId);

impl TransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InTransit,
    Completed,
    Cancelled,
}

/// Aggregate root: StockTransfer.
///
/// Holds the document state machine; the quantities/serials recorded here at
/// creation are exactly what dispatch debits and receive credits (no
/// short/over receipt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransfer {
    id: TransferId,
    tenant_id: Option<TenantId>,
    from_branch_id: Option<BranchId>,
    to_branch_id: Option<BranchId>,
    lines: Vec<MovementLine>,
    status: TransferStatus,
    version: u64,
    created: bool,
}

impl StockTransfer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            tenant_id: None,
            from_branch_id: None,
            to_branch_id: None,
            lines: Vec::new(),
            status: TransferStatus::Pending,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn from_branch_id(&self) -> Option<BranchId> {
        self.from_branch_id
    }

    pub fn to_branch_id(&self) -> Option<BranchId> {
        self.to_branch_id
    }

    pub fn lines(&self) -> &[MovementLine] {
        &self.lines
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub from_branch_id: BranchId,
    pub to_branch_id: BranchId,
    pub lines: Vec<MovementLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDispatched (pending -> in_transit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDispatched {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertDispatch (in_transit -> pending).
///
/// Compensating transition: the coordinator wins the dispatch race first and
/// only then debits the source branch; when that debit fails the document
/// must come back to pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertDispatch {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReceived (in_transit -> completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReceived {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer (pending -> cancelled only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    CreateTransfer(CreateTransfer),
    MarkDispatched(MarkDispatched),
    RevertDispatch(RevertDispatch),
    MarkReceived(MarkReceived),
    CancelTransfer(CancelTransfer),
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub from_branch_id: BranchId,
    pub to_branch_id: BranchId,
    pub lines: Vec<MovementLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDispatched {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferDispatchReverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDispatchReverted {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceived {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferCreated(TransferCreated),
    TransferDispatched(TransferDispatched),
    TransferDispatchReverted(TransferDispatchReverted),
    TransferReceived(TransferReceived),
    TransferCancelled(TransferCancelled),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "stock.transfer.created",
            TransferEvent::TransferDispatched(_) => "stock.transfer.dispatched",
            TransferEvent::TransferDispatchReverted(_) => "stock.transfer.dispatch_reverted",
            TransferEvent::TransferReceived(_) => "stock.transfer.received",
            TransferEvent::TransferCancelled(_) => "stock.transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferCreated(e) => e.occurred_at,
            TransferEvent::TransferDispatched(e) => e.occurred_at,
            TransferEvent::TransferDispatchReverted(e) => e.occurred_at,
            TransferEvent::TransferReceived(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferCreated(e) => {
                self.id = e.transfer_id;
                self.tenant_id = Some(e.tenant_id);
                self.from_branch_id = Some(e.from_branch_id);
                self.to_branch_id = Some(e.to_branch_id);
                self.lines = e.lines.clone();
                self.status = TransferStatus::Pending;
                self.created = true;
            }
            TransferEvent::TransferDispatched(_) => {
                self.status = TransferStatus::InTransit;
            }
            TransferEvent::TransferDispatchReverted(_) => {
                self.status = TransferStatus::Pending;
            }
            TransferEvent::TransferReceived(_) => {
                self.status = TransferStatus::Completed;
            }
            TransferEvent::TransferCancelled(_) => {
                self.status = TransferStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::CreateTransfer(cmd) => self.handle_create(cmd),
            TransferCommand::MarkDispatched(cmd) => self.handle_mark_dispatched(cmd),
            TransferCommand::RevertDispatch(cmd) => self.handle_revert_dispatch(cmd),
            TransferCommand::MarkReceived(cmd) => self.handle_mark_received(cmd),
            TransferCommand::CancelTransfer(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl StockTransfer {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_transfer_id(&self, transfer_id: TransferId) -> Result<(), DomainError> {
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer already exists"));
        }
        if cmd.from_branch_id == cmd.to_branch_id {
            return Err(DomainError::validation(
                "source and destination branch must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("transfer must have at least one line"));
        }
        for line in &cmd.lines {
            match &line.selection {
                StockSelection::Quantity { quantity, .. } => {
                    if *quantity <= 0 {
                        return Err(DomainError::validation("line quantity must be positive"));
                    }
                }
                StockSelection::Serials(serials) => {
                    if serials.is_empty() {
                        return Err(DomainError::validation("line serial list cannot be empty"));
                    }
                    for (idx, serial) in serials.iter().enumerate() {
                        if serial.is_blank() {
                            return Err(DomainError::validation("serial number cannot be blank"));
                        }
                        if serials[..idx].contains(serial) {
                            return Err(DomainError::validation(format!(
                                "serial '{serial}' listed twice"
                            )));
                        }
                    }
                }
            }
        }

        Ok(vec![TransferEvent::TransferCreated(TransferCreated {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            from_branch_id: cmd.from_branch_id,
            to_branch_id: cmd.to_branch_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_dispatched(
        &self,
        cmd: &MarkDispatched,
    ) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.status != TransferStatus::Pending {
            return Err(DomainError::state(format!(
                "only pending transfers can be dispatched (status: {:?})",
                self.status
            )));
        }

        Ok(vec![TransferEvent::TransferDispatched(TransferDispatched {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revert_dispatch(
        &self,
        cmd: &RevertDispatch,
    ) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.status != TransferStatus::InTransit {
            return Err(DomainError::state(format!(
                "only in-transit transfers can be reverted (status: {:?})",
                self.status
            )));
        }

        Ok(vec![TransferEvent::TransferDispatchReverted(
            TransferDispatchReverted {
                tenant_id: cmd.tenant_id,
                transfer_id: cmd.transfer_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_received(&self, cmd: &MarkReceived) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.status != TransferStatus::InTransit {
            return Err(DomainError::state(format!(
                "only in-transit transfers can be received (status: {:?})",
                self.status
            )));
        }

        Ok(vec![TransferEvent::TransferReceived(TransferReceived {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.status != TransferStatus::Pending {
            return Err(DomainError::state(format!(
                "only pending transfers can be cancelled (status: {:?})",
                self.status
            )));
        }

        Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_catalog::VariantId;
    use stockpile_core::AggregateId;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_transfer_id() -> TransferId {
        TransferId::new(AggregateId::new())
    }

    fn test_lines() -> Vec<MovementLine> {
        vec![MovementLine {
            variant_id: VariantId::from_uuid(uuid::Uuid::now_v7()),
            selection: StockSelection::Quantity {
                quantity: 10,
                batch: None,
            },
        }]
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_transfer(tenant_id: TenantId, transfer_id: TransferId) -> StockTransfer {
        let mut transfer = StockTransfer::empty(transfer_id);
        let events = transfer
            .handle(&TransferCommand::CreateTransfer(CreateTransfer {
                tenant_id,
                transfer_id,
                from_branch_id: BranchId::new(),
                to_branch_id: BranchId::new(),
                lines: test_lines(),
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);
        transfer
    }

    #[test]
    fn create_transfer_starts_pending() {
        let tenant_id = test_tenant_id();
        let transfer = created_transfer(tenant_id, test_transfer_id());
        assert_eq!(transfer.status(), TransferStatus::Pending);
        assert_eq!(transfer.lines().len(), 1);
    }

    #[test]
    fn create_rejects_same_source_and_destination() {
        let transfer = StockTransfer::empty(test_transfer_id());
        let branch = BranchId::new();
        let err = transfer
            .handle(&TransferCommand::CreateTransfer(CreateTransfer {
                tenant_id: test_tenant_id(),
                transfer_id: test_transfer_id(),
                from_branch_id: branch,
                to_branch_id: branch,
                lines: test_lines(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_empty_lines() {
        let transfer = StockTransfer::empty(test_transfer_id());
        let err = transfer
            .handle(&TransferCommand::CreateTransfer(CreateTransfer {
                tenant_id: test_tenant_id(),
                transfer_id: test_transfer_id(),
                from_branch_id: BranchId::new(),
                to_branch_id: BranchId::new(),
                lines: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn full_lifecycle_pending_to_completed() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let mut transfer = created_transfer(tenant_id, transfer_id);

        let events = transfer
            .handle(&TransferCommand::MarkDispatched(MarkDispatched {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);
        assert_eq!(transfer.status(), TransferStatus::InTransit);

        let events = transfer
            .handle(&TransferCommand::MarkReceived(MarkReceived {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);
        assert_eq!(transfer.status(), TransferStatus::Completed);
    }

    #[test]
    fn receive_before_dispatch_is_a_state_error() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let transfer = created_transfer(tenant_id, transfer_id);

        let err = transfer
            .handle(&TransferCommand::MarkReceived(MarkReceived {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }

    #[test]
    fn double_dispatch_is_a_state_error() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let mut transfer = created_transfer(tenant_id, transfer_id);

        let cmd = TransferCommand::MarkDispatched(MarkDispatched {
            tenant_id,
            transfer_id,
            occurred_at: test_time(),
        });
        let events = transfer.handle(&cmd).unwrap();
        transfer.apply(&events[0]);

        let err = transfer.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }

    #[test]
    fn cancel_only_from_pending() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let mut transfer = created_transfer(tenant_id, transfer_id);

        let events = transfer
            .handle(&TransferCommand::MarkDispatched(MarkDispatched {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);

        let err = transfer
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }

    #[test]
    fn cancel_from_pending_succeeds() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let mut transfer = created_transfer(tenant_id, transfer_id);

        let events = transfer
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);
        assert_eq!(transfer.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn revert_dispatch_returns_to_pending() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let mut transfer = created_transfer(tenant_id, transfer_id);

        let events = transfer
            .handle(&TransferCommand::MarkDispatched(MarkDispatched {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);

        let events = transfer
            .handle(&TransferCommand::RevertDispatch(RevertDispatch {
                tenant_id,
                transfer_id,
                reason: "insufficient stock at source".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);
        assert_eq!(transfer.status(), TransferStatus::Pending);

        // Dispatch can be attempted again.
        let events = transfer
            .handle(&TransferCommand::MarkDispatched(MarkDispatched {
                tenant_id,
                transfer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        transfer.apply(&events[0]);
        assert_eq!(transfer.status(), TransferStatus::InTransit);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let tenant_id = test_tenant_id();
        let transfer_id = test_transfer_id();
        let transfer = created_transfer(tenant_id, transfer_id);
        let before = transfer.clone();

        let cmd = TransferCommand::MarkDispatched(MarkDispatched {
            tenant_id,
            transfer_id,
            occurred_at: test_time(),
        });
        let events1 = transfer.handle(&cmd).unwrap();
        let events2 = transfer.handle(&cmd).unwrap();

        assert_eq!(transfer, before);
        assert_eq!(events1, events2);
    }
}
