use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, TenantId, UserId};
use stockpile_events::Event;
use stockpile_catalog::VariantId;

use crate::lot::LotKey;
use crate::movement::{MovementKind, MovementLine, MovementReference, StockMovement, StockSelection};
use crate::serial::{SerialNumber, SerialStatus, SerialUnit};

/// Branch stock stream identifier. Derived from the branch id so that every
/// branch has exactly one ledger stream per tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchStockId(pub AggregateId);

impl BranchStockId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_branch(branch_id: BranchId) -> Self {
        Self(AggregateId::from_uuid(*branch_id.as_uuid()))
    }
}

impl core::fmt::Display for BranchStockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: BranchStock — the stock ledger of one branch.
///
/// State is the fold of all recorded movements: lot counters per
/// (variant, batch) and the serial units currently owned by the branch.
/// There is no explicit create command; the stream starts with the first
/// movement (first receipt, typically).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchStock {
    id: BranchStockId,
    tenant_id: Option<TenantId>,
    branch_id: Option<BranchId>,
    lots: BTreeMap<LotKey, i64>,
    serials: BTreeMap<SerialNumber, SerialUnit>,
    /// Idempotency: operation ids already folded into this stream.
    applied_operations: BTreeSet<Uuid>,
    /// Transfer legs already recorded at this branch (defense in depth
    /// against a coordinator replaying a leg under a fresh operation id).
    dispatched_transfers: BTreeSet<Uuid>,
    received_transfers: BTreeSet<Uuid>,
    version: u64,
}

impl BranchStock {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: BranchStockId) -> Self {
        Self {
            id,
            tenant_id: None,
            branch_id: None,
            lots: BTreeMap::new(),
            serials: BTreeMap::new(),
            applied_operations: BTreeSet::new(),
            dispatched_transfers: BTreeSet::new(),
            received_transfers: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> BranchStockId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    /// Lot counter for (variant, batch); 0 when the lot was never received.
    pub fn lot_quantity(&self, variant_id: VariantId, batch: Option<&str>) -> i64 {
        self.lots
            .get(&LotKey::new(variant_id, batch.map(str::to_string)))
            .copied()
            .unwrap_or(0)
    }

    /// Number of in-stock serial units of a variant at this branch.
    pub fn in_stock_serial_count(&self, variant_id: VariantId) -> i64 {
        self.serials
            .values()
            .filter(|u| u.variant_id == variant_id && u.status == SerialStatus::InStock)
            .count() as i64
    }

    /// Derived on-hand for a variant: lot counters plus in-stock serials.
    pub fn on_hand(&self, variant_id: VariantId) -> i64 {
        let lots: i64 = self
            .lots
            .iter()
            .filter(|(k, _)| k.variant_id == variant_id)
            .map(|(_, q)| *q)
            .sum();
        lots + self.in_stock_serial_count(variant_id)
    }

    pub fn serial(&self, serial: &SerialNumber) -> Option<&SerialUnit> {
        self.serials.get(serial)
    }

    pub fn is_transfer_dispatched(&self, transfer_id: Uuid) -> bool {
        self.dispatched_transfers.contains(&transfer_id)
    }

    pub fn is_transfer_received(&self, transfer_id: Uuid) -> bool {
        self.received_transfers.contains(&transfer_id)
    }
}

impl AggregateRoot for BranchStock {
    type Id = BranchStockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveStock (GRN-fed receipt; creates lots/serials on first use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
    pub reference: Option<String>,
    pub lines: Vec<MovementLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordAdjustment (single ledger entry, mandatory reason).
///
/// A quantity selection carries the signed change directly. A serial
/// selection always removes the listed units (write-off / recount-down);
/// serialized stock only enters through receipts, where tenant-wide
/// uniqueness is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAdjustment {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
    pub line: MovementLine,
    pub reason: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchTransfer — debit this (source) branch for a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTransfer {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
    pub transfer_id: Uuid,
    pub lines: Vec<MovementLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveTransfer — credit this (destination) branch with exactly
/// the dispatched quantities/serials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTransfer {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
    pub transfer_id: Uuid,
    pub lines: Vec<MovementLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Assemble — consume components and produce bundle stock in one
/// atomic append. `components` carry the exact required amounts computed by
/// the caller; availability is re-validated here as the last line of defense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assemble {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub user_id: Option<UserId>,
    pub assembly_id: Uuid,
    pub bundle_variant_id: VariantId,
    pub quantity: i64,
    pub output_batch: Option<String>,
    pub components: Vec<MovementLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveSerials (all-or-nothing compare-and-set to `reserved`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveSerials {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub variant_id: VariantId,
    pub serials: Vec<SerialNumber>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseSerials (all-or-nothing `reserved` -> `in_stock`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSerials {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub operation_id: Uuid,
    pub variant_id: VariantId,
    pub serials: Vec<SerialNumber>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    ReceiveStock(ReceiveStock),
    RecordAdjustment(RecordAdjustment),
    DispatchTransfer(DispatchTransfer),
    ReceiveTransfer(ReceiveTransfer),
    Assemble(Assemble),
    ReserveSerials(ReserveSerials),
    ReleaseSerials(ReleaseSerials),
}

/// Event: MovementRecorded — one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub movement: StockMovement,
}

/// Event: SerialsReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialsReserved {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub variant_id: VariantId,
    pub serials: Vec<SerialNumber>,
    pub operation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SerialsReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialsReleased {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub variant_id: VariantId,
    pub serials: Vec<SerialNumber>,
    pub operation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    MovementRecorded(MovementRecorded),
    SerialsReserved(SerialsReserved),
    SerialsReleased(SerialsReleased),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::MovementRecorded(_) => "stock.branch.movement_recorded",
            LedgerEvent::SerialsReserved(_) => "stock.branch.serials_reserved",
            LedgerEvent::SerialsReleased(_) => "stock.branch.serials_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::MovementRecorded(e) => e.movement.occurred_at,
            LedgerEvent::SerialsReserved(e) => e.occurred_at,
            LedgerEvent::SerialsReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for BranchStock {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::MovementRecorded(e) => {
                let m = &e.movement;
                self.tenant_id.get_or_insert(m.tenant_id);
                self.branch_id.get_or_insert(m.branch_id);
                self.applied_operations.insert(m.operation_id);

                match (&m.reference, m.kind) {
                    (Some(MovementReference::Transfer(id)), MovementKind::TransferOut) => {
                        self.dispatched_transfers.insert(*id);
                    }
                    (Some(MovementReference::Transfer(id)), MovementKind::TransferIn) => {
                        self.received_transfers.insert(*id);
                    }
                    _ => {}
                }

                if m.serials.is_empty() {
                    let key = LotKey::new(m.variant_id, m.batch.clone());
                    *self.lots.entry(key).or_insert(0) += m.quantity_change;
                } else if m.quantity_change >= 0 {
                    for serial in &m.serials {
                        self.serials.insert(
                            serial.clone(),
                            SerialUnit {
                                serial: serial.clone(),
                                variant_id: m.variant_id,
                                status: SerialStatus::InStock,
                            },
                        );
                    }
                } else {
                    // Ownership leaves the branch (transfer, consumption,
                    // write-off); the unit travels on its reference document.
                    for serial in &m.serials {
                        self.serials.remove(serial);
                    }
                }
            }
            LedgerEvent::SerialsReserved(e) => {
                self.tenant_id.get_or_insert(e.tenant_id);
                self.branch_id.get_or_insert(e.branch_id);
                self.applied_operations.insert(e.operation_id);
                for serial in &e.serials {
                    if let Some(unit) = self.serials.get_mut(serial) {
                        unit.status = SerialStatus::Reserved;
                    }
                }
            }
            LedgerEvent::SerialsReleased(e) => {
                self.tenant_id.get_or_insert(e.tenant_id);
                self.branch_id.get_or_insert(e.branch_id);
                self.applied_operations.insert(e.operation_id);
                for serial in &e.serials {
                    if let Some(unit) = self.serials.get_mut(serial) {
                        unit.status = SerialStatus::InStock;
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            LedgerCommand::RecordAdjustment(cmd) => self.handle_adjust(cmd),
            LedgerCommand::DispatchTransfer(cmd) => self.handle_dispatch_transfer(cmd),
            LedgerCommand::ReceiveTransfer(cmd) => self.handle_receive_transfer(cmd),
            LedgerCommand::Assemble(cmd) => self.handle_assemble(cmd),
            LedgerCommand::ReserveSerials(cmd) => self.handle_reserve(cmd),
            LedgerCommand::ReleaseSerials(cmd) => self.handle_release(cmd),
        }
    }
}

impl BranchStock {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(existing) if existing != tenant_id => Err(DomainError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn ensure_branch(&self, branch_id: BranchId) -> Result<(), DomainError> {
        match self.branch_id {
            Some(existing) if existing != branch_id => {
                Err(DomainError::invariant("branch_id mismatch"))
            }
            _ => Ok(()),
        }
    }

    fn already_applied(&self, operation_id: Uuid) -> bool {
        self.applied_operations.contains(&operation_id)
    }

    /// Validate a batch of prospective movements against the folded state.
    ///
    /// All lines of a command are checked together before anything is
    /// emitted, so a command either records every entry or none:
    /// - resulting lot counters must stay >= 0;
    /// - outgoing serials must be owned by this branch, belong to the line's
    ///   variant, be `in_stock`, and not appear twice;
    /// - incoming serials must not already be present at the branch.
    fn check_movements(&self, movements: &[StockMovement]) -> Result<(), DomainError> {
        let mut lot_deltas: BTreeMap<LotKey, i64> = BTreeMap::new();
        let mut touched: BTreeSet<&SerialNumber> = BTreeSet::new();

        for m in movements {
            if m.serials.is_empty() {
                let key = LotKey::new(m.variant_id, m.batch.clone());
                *lot_deltas.entry(key).or_insert(0) += m.quantity_change;
                continue;
            }

            if m.quantity_change.unsigned_abs() as usize != m.serials.len() {
                return Err(DomainError::validation(
                    "serial count does not match quantity change",
                ));
            }

            for serial in &m.serials {
                if serial.is_blank() {
                    return Err(DomainError::validation("serial number cannot be blank"));
                }
                if !touched.insert(serial) {
                    return Err(DomainError::validation(format!(
                        "serial '{serial}' appears more than once in the operation"
                    )));
                }

                if m.quantity_change < 0 {
                    match self.serials.get(serial) {
                        None => {
                            return Err(DomainError::insufficient_stock(format!(
                                "serial '{serial}' is not at this branch"
                            )));
                        }
                        Some(unit) if unit.variant_id != m.variant_id => {
                            return Err(DomainError::validation(format!(
                                "serial '{serial}' belongs to a different variant"
                            )));
                        }
                        Some(unit) if unit.status != SerialStatus::InStock => {
                            return Err(DomainError::conflict(format!(
                                "serial '{serial}' is not in stock (status: {:?})",
                                unit.status
                            )));
                        }
                        Some(_) => {}
                    }
                } else if self.serials.contains_key(serial) {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' already present at this branch"
                    )));
                }
            }
        }

        for (key, delta) in &lot_deltas {
            let current = self.lots.get(key).copied().unwrap_or(0);
            if current + delta < 0 {
                return Err(DomainError::insufficient_stock(format!(
                    "lot {:?}/{:?} has {} on hand, change of {} would go negative",
                    key.variant_id, key.batch, current, delta
                )));
            }
        }

        Ok(())
    }

    /// Turn a directional line (`direction` is +1 for credits, -1 for debits)
    /// into a ledger entry. Quantities must be strictly positive; the sign
    /// comes from the direction.
    fn line_to_movement(
        &self,
        line: &MovementLine,
        direction: i64,
        kind: MovementKind,
        tenant_id: TenantId,
        branch_id: BranchId,
        operation_id: Uuid,
        user_id: Option<UserId>,
        reason: Option<String>,
        notes: Option<String>,
        reference: Option<MovementReference>,
        occurred_at: DateTime<Utc>,
    ) -> Result<StockMovement, DomainError> {
        let (quantity_change, batch, serials) = match &line.selection {
            StockSelection::Quantity { quantity, batch } => {
                if *quantity <= 0 {
                    return Err(DomainError::validation("quantity must be positive"));
                }
                (direction * quantity, batch.clone(), Vec::new())
            }
            StockSelection::Serials(serials) => {
                if serials.is_empty() {
                    return Err(DomainError::validation("serial list cannot be empty"));
                }
                (direction * serials.len() as i64, None, serials.clone())
            }
        };

        Ok(StockMovement {
            tenant_id,
            branch_id,
            variant_id: line.variant_id,
            batch,
            quantity_change,
            serials,
            kind,
            reason,
            notes,
            reference,
            user_id,
            operation_id,
            occurred_at,
        })
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("receipt must have at least one line"));
        }

        let reference = cmd.reference.clone().map(MovementReference::Receipt);
        let movements = cmd
            .lines
            .iter()
            .map(|line| {
                self.line_to_movement(
                    line,
                    1,
                    MovementKind::Receipt,
                    cmd.tenant_id,
                    cmd.branch_id,
                    cmd.operation_id,
                    cmd.user_id,
                    None,
                    cmd.notes.clone(),
                    reference.clone(),
                    cmd.occurred_at,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.check_movements(&movements)?;
        Ok(movements
            .into_iter()
            .map(|movement| LedgerEvent::MovementRecorded(MovementRecorded { movement }))
            .collect())
    }

    fn handle_adjust(&self, cmd: &RecordAdjustment) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason is required"));
        }

        let movement = match &cmd.line.selection {
            StockSelection::Quantity { quantity, batch } => {
                if *quantity == 0 {
                    return Err(DomainError::validation("quantity change cannot be zero"));
                }
                StockMovement {
                    tenant_id: cmd.tenant_id,
                    branch_id: cmd.branch_id,
                    variant_id: cmd.line.variant_id,
                    batch: batch.clone(),
                    quantity_change: *quantity,
                    serials: Vec::new(),
                    kind: MovementKind::Adjustment,
                    reason: Some(cmd.reason.clone()),
                    notes: cmd.notes.clone(),
                    reference: None,
                    user_id: cmd.user_id,
                    operation_id: cmd.operation_id,
                    occurred_at: cmd.occurred_at,
                }
            }
            // Serial adjustments only remove units; serialized stock enters
            // through receipts where the registry vets uniqueness.
            StockSelection::Serials(_) => self.line_to_movement(
                &cmd.line,
                -1,
                MovementKind::Adjustment,
                cmd.tenant_id,
                cmd.branch_id,
                cmd.operation_id,
                cmd.user_id,
                Some(cmd.reason.clone()),
                cmd.notes.clone(),
                None,
                cmd.occurred_at,
            )?,
        };

        let movements = vec![movement];
        self.check_movements(&movements)?;
        Ok(movements
            .into_iter()
            .map(|movement| LedgerEvent::MovementRecorded(MovementRecorded { movement }))
            .collect())
    }

    fn handle_dispatch_transfer(
        &self,
        cmd: &DispatchTransfer,
    ) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if self.dispatched_transfers.contains(&cmd.transfer_id) {
            return Err(DomainError::conflict(
                "transfer already dispatched from this branch",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("transfer must have at least one line"));
        }

        let movements = cmd
            .lines
            .iter()
            .map(|line| {
                self.line_to_movement(
                    line,
                    -1,
                    MovementKind::TransferOut,
                    cmd.tenant_id,
                    cmd.branch_id,
                    cmd.operation_id,
                    cmd.user_id,
                    None,
                    None,
                    Some(MovementReference::Transfer(cmd.transfer_id)),
                    cmd.occurred_at,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.check_movements(&movements)?;
        Ok(movements
            .into_iter()
            .map(|movement| LedgerEvent::MovementRecorded(MovementRecorded { movement }))
            .collect())
    }

    fn handle_receive_transfer(
        &self,
        cmd: &ReceiveTransfer,
    ) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if self.received_transfers.contains(&cmd.transfer_id) {
            return Err(DomainError::conflict(
                "transfer already received at this branch",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("transfer must have at least one line"));
        }

        let movements = cmd
            .lines
            .iter()
            .map(|line| {
                self.line_to_movement(
                    line,
                    1,
                    MovementKind::TransferIn,
                    cmd.tenant_id,
                    cmd.branch_id,
                    cmd.operation_id,
                    cmd.user_id,
                    None,
                    None,
                    Some(MovementReference::Transfer(cmd.transfer_id)),
                    cmd.occurred_at,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.check_movements(&movements)?;
        Ok(movements
            .into_iter()
            .map(|movement| LedgerEvent::MovementRecorded(MovementRecorded { movement }))
            .collect())
    }

    fn handle_assemble(&self, cmd: &Assemble) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("assembly quantity must be positive"));
        }
        if cmd.components.is_empty() {
            return Err(DomainError::validation("assembly requires components"));
        }
        if cmd
            .components
            .iter()
            .any(|c| c.variant_id == cmd.bundle_variant_id)
        {
            return Err(DomainError::validation(
                "bundle variant cannot be one of its own components",
            ));
        }

        let reference = Some(MovementReference::Assembly(cmd.assembly_id));
        let mut movements = cmd
            .components
            .iter()
            .map(|line| {
                self.line_to_movement(
                    line,
                    -1,
                    MovementKind::AssemblyConsume,
                    cmd.tenant_id,
                    cmd.branch_id,
                    cmd.operation_id,
                    cmd.user_id,
                    None,
                    None,
                    reference.clone(),
                    cmd.occurred_at,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        movements.push(StockMovement {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            variant_id: cmd.bundle_variant_id,
            batch: cmd.output_batch.clone(),
            quantity_change: cmd.quantity,
            serials: Vec::new(),
            kind: MovementKind::AssemblyProduce,
            reason: None,
            notes: None,
            reference,
            user_id: cmd.user_id,
            operation_id: cmd.operation_id,
            occurred_at: cmd.occurred_at,
        });

        self.check_movements(&movements)?;
        Ok(movements
            .into_iter()
            .map(|movement| LedgerEvent::MovementRecorded(MovementRecorded { movement }))
            .collect())
    }

    fn handle_reserve(&self, cmd: &ReserveSerials) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if cmd.serials.is_empty() {
            return Err(DomainError::validation("serial list cannot be empty"));
        }

        // All-or-nothing: any unavailable serial fails the whole batch.
        for serial in &cmd.serials {
            match self.serials.get(serial) {
                None => {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' is not at this branch"
                    )));
                }
                Some(unit) if unit.variant_id != cmd.variant_id => {
                    return Err(DomainError::validation(format!(
                        "serial '{serial}' belongs to a different variant"
                    )));
                }
                Some(unit) if unit.status != SerialStatus::InStock => {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' is not available (status: {:?})",
                        unit.status
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(vec![LedgerEvent::SerialsReserved(SerialsReserved {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            variant_id: cmd.variant_id,
            serials: cmd.serials.clone(),
            operation_id: cmd.operation_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseSerials) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_branch(cmd.branch_id)?;
        if self.already_applied(cmd.operation_id) {
            return Ok(vec![]);
        }
        if cmd.serials.is_empty() {
            return Err(DomainError::validation("serial list cannot be empty"));
        }

        for serial in &cmd.serials {
            match self.serials.get(serial) {
                None => {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' is not at this branch"
                    )));
                }
                Some(unit) if unit.variant_id != cmd.variant_id => {
                    return Err(DomainError::validation(format!(
                        "serial '{serial}' belongs to a different variant"
                    )));
                }
                Some(unit) if unit.status != SerialStatus::Reserved => {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' is not reserved (status: {:?})",
                        unit.status
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(vec![LedgerEvent::SerialsReleased(SerialsReleased {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            variant_id: cmd.variant_id,
            serials: cmd.serials.clone(),
            operation_id: cmd.operation_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_branch_id() -> BranchId {
        BranchId::new()
    }

    fn test_variant_id() -> VariantId {
        VariantId::from_uuid(Uuid::now_v7())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn serials(names: &[&str]) -> Vec<SerialNumber> {
        names.iter().map(|n| SerialNumber::from(*n)).collect()
    }

    fn apply_all(stock: &mut BranchStock, events: &[LedgerEvent]) {
        for event in events {
            stock.apply(event);
        }
    }

    fn stocked_branch(
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
        quantity: i64,
    ) -> BranchStock {
        let mut stock = BranchStock::empty(BranchStockId::for_branch(branch_id));
        let events = stock
            .handle(&LedgerCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                reference: Some("GRN-1".to_string()),
                lines: vec![MovementLine {
                    variant_id,
                    selection: StockSelection::Quantity {
                        quantity,
                        batch: None,
                    },
                }],
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);
        stock
    }

    fn serialized_branch(
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
        serial_names: &[&str],
    ) -> BranchStock {
        let mut stock = BranchStock::empty(BranchStockId::for_branch(branch_id));
        let events = stock
            .handle(&LedgerCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                reference: Some("GRN-1".to_string()),
                lines: vec![MovementLine {
                    variant_id,
                    selection: StockSelection::Serials(serials(serial_names)),
                }],
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);
        stock
    }

    #[test]
    fn receipt_creates_lot_on_first_use() {
        let variant = test_variant_id();
        let stock = stocked_branch(test_tenant_id(), test_branch_id(), variant, 20);
        assert_eq!(stock.lot_quantity(variant, None), 20);
        assert_eq!(stock.on_hand(variant), 20);
    }

    #[test]
    fn receipt_registers_serial_units_in_stock() {
        let variant = test_variant_id();
        let stock = serialized_branch(
            test_tenant_id(),
            test_branch_id(),
            variant,
            &["SN-1", "SN-2", "SN-3"],
        );
        assert_eq!(stock.in_stock_serial_count(variant), 3);
        assert_eq!(stock.on_hand(variant), 3);
        assert_eq!(
            stock.serial(&SerialNumber::from("SN-2")).unwrap().status,
            SerialStatus::InStock
        );
    }

    #[test]
    fn receipt_rejects_serial_already_at_branch() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let stock = serialized_branch(tenant_id, branch_id, variant, &["SN-1"]);

        let err = stock
            .handle(&LedgerCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                reference: None,
                lines: vec![MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Serials(serials(&["SN-1"])),
                }],
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn adjustment_debits_lot_and_records_entry() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let mut stock = stocked_branch(tenant_id, branch_id, variant, 20);

        let events = stock
            .handle(&LedgerCommand::RecordAdjustment(RecordAdjustment {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                line: MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Quantity {
                        quantity: -5,
                        batch: None,
                    },
                },
                reason: "recount".to_string(),
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            LedgerEvent::MovementRecorded(e) => {
                assert_eq!(e.movement.quantity_change, -5);
                assert_eq!(e.movement.kind, MovementKind::Adjustment);
                assert_eq!(e.movement.reason.as_deref(), Some("recount"));
            }
            other => panic!("expected MovementRecorded, got {other:?}"),
        }

        apply_all(&mut stock, &events);
        assert_eq!(stock.on_hand(variant), 15);
    }

    #[test]
    fn adjustment_requires_reason() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let stock = stocked_branch(tenant_id, branch_id, variant, 20);

        let err = stock
            .handle(&LedgerCommand::RecordAdjustment(RecordAdjustment {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                line: MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Quantity {
                        quantity: -1,
                        batch: None,
                    },
                },
                reason: "   ".to_string(),
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn adjustment_cannot_drive_stock_negative() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let stock = stocked_branch(tenant_id, branch_id, variant, 3);

        let err = stock
            .handle(&LedgerCommand::RecordAdjustment(RecordAdjustment {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                line: MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Quantity {
                        quantity: -4,
                        batch: None,
                    },
                },
                reason: "shrinkage".to_string(),
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
        assert_eq!(stock.on_hand(variant), 3);
    }

    #[test]
    fn retried_operation_id_records_nothing() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let mut stock = stocked_branch(tenant_id, branch_id, variant, 20);

        let operation_id = Uuid::now_v7();
        let cmd = LedgerCommand::RecordAdjustment(RecordAdjustment {
            tenant_id,
            branch_id,
            operation_id,
            user_id: None,
            line: MovementLine {
                variant_id: variant,
                selection: StockSelection::Quantity {
                    quantity: -5,
                    batch: None,
                },
            },
            reason: "recount".to_string(),
            notes: None,
            occurred_at: test_time(),
        });

        let events = stock.handle(&cmd).unwrap();
        apply_all(&mut stock, &events);
        assert_eq!(stock.on_hand(variant), 15);

        // Network retry: same operation id, no double-count.
        let retry = stock.handle(&cmd).unwrap();
        assert!(retry.is_empty());
        assert_eq!(stock.on_hand(variant), 15);
    }

    #[test]
    fn dispatch_is_all_or_nothing_across_lines() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let plentiful = test_variant_id();
        let scarce = test_variant_id();

        let mut stock = stocked_branch(tenant_id, branch_id, plentiful, 100);
        let events = stock
            .handle(&LedgerCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                reference: None,
                lines: vec![MovementLine {
                    variant_id: scarce,
                    selection: StockSelection::Quantity {
                        quantity: 2,
                        batch: None,
                    },
                }],
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);

        let err = stock
            .handle(&LedgerCommand::DispatchTransfer(DispatchTransfer {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                transfer_id: Uuid::now_v7(),
                lines: vec![
                    MovementLine {
                        variant_id: plentiful,
                        selection: StockSelection::Quantity {
                            quantity: 10,
                            batch: None,
                        },
                    },
                    MovementLine {
                        variant_id: scarce,
                        selection: StockSelection::Quantity {
                            quantity: 5,
                            batch: None,
                        },
                    },
                ],
                occurred_at: test_time(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock(_)));
        // Nothing was emitted: both lots untouched.
        assert_eq!(stock.on_hand(plentiful), 100);
        assert_eq!(stock.on_hand(scarce), 2);
    }

    #[test]
    fn transfer_legs_conserve_quantity() {
        let tenant_id = test_tenant_id();
        let source_branch = test_branch_id();
        let dest_branch = test_branch_id();
        let variant = test_variant_id();
        let transfer_id = Uuid::now_v7();

        let mut source = stocked_branch(tenant_id, source_branch, variant, 30);
        let mut dest = BranchStock::empty(BranchStockId::for_branch(dest_branch));

        let lines = vec![MovementLine {
            variant_id: variant,
            selection: StockSelection::Quantity {
                quantity: 10,
                batch: None,
            },
        }];

        let out_events = source
            .handle(&LedgerCommand::DispatchTransfer(DispatchTransfer {
                tenant_id,
                branch_id: source_branch,
                operation_id: Uuid::now_v7(),
                user_id: None,
                transfer_id,
                lines: lines.clone(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut source, &out_events);
        assert_eq!(source.on_hand(variant), 20);

        let in_events = dest
            .handle(&LedgerCommand::ReceiveTransfer(ReceiveTransfer {
                tenant_id,
                branch_id: dest_branch,
                operation_id: Uuid::now_v7(),
                user_id: None,
                transfer_id,
                lines,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut dest, &in_events);
        assert_eq!(dest.on_hand(variant), 10);

        let signed_sum: i64 = out_events
            .iter()
            .chain(in_events.iter())
            .map(|e| match e {
                LedgerEvent::MovementRecorded(m) => m.movement.quantity_change,
                _ => 0,
            })
            .sum();
        assert_eq!(signed_sum, 0, "transfer legs must conserve quantity");
    }

    #[test]
    fn serialized_transfer_moves_unit_ownership() {
        let tenant_id = test_tenant_id();
        let source_branch = test_branch_id();
        let dest_branch = test_branch_id();
        let variant = test_variant_id();
        let transfer_id = Uuid::now_v7();

        let mut source = serialized_branch(tenant_id, source_branch, variant, &["SN-1", "SN-2"]);
        let mut dest = BranchStock::empty(BranchStockId::for_branch(dest_branch));

        let lines = vec![MovementLine {
            variant_id: variant,
            selection: StockSelection::Serials(serials(&["SN-1"])),
        }];

        let out_events = source
            .handle(&LedgerCommand::DispatchTransfer(DispatchTransfer {
                tenant_id,
                branch_id: source_branch,
                operation_id: Uuid::now_v7(),
                user_id: None,
                transfer_id,
                lines: lines.clone(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut source, &out_events);
        assert!(source.serial(&SerialNumber::from("SN-1")).is_none());
        assert_eq!(source.in_stock_serial_count(variant), 1);

        let in_events = dest
            .handle(&LedgerCommand::ReceiveTransfer(ReceiveTransfer {
                tenant_id,
                branch_id: dest_branch,
                operation_id: Uuid::now_v7(),
                user_id: None,
                transfer_id,
                lines,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut dest, &in_events);
        assert_eq!(
            dest.serial(&SerialNumber::from("SN-1")).unwrap().status,
            SerialStatus::InStock
        );
        assert_eq!(dest.on_hand(variant), 1);
    }

    #[test]
    fn duplicate_transfer_leg_is_rejected() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let transfer_id = Uuid::now_v7();
        let mut stock = stocked_branch(tenant_id, branch_id, variant, 30);

        let make_cmd = |operation_id| {
            LedgerCommand::DispatchTransfer(DispatchTransfer {
                tenant_id,
                branch_id,
                operation_id,
                user_id: None,
                transfer_id,
                lines: vec![MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Quantity {
                        quantity: 5,
                        batch: None,
                    },
                }],
                occurred_at: test_time(),
            })
        };

        let events = stock.handle(&make_cmd(Uuid::now_v7())).unwrap();
        apply_all(&mut stock, &events);

        // Same transfer under a fresh operation id: still rejected.
        let err = stock.handle(&make_cmd(Uuid::now_v7())).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(stock.on_hand(variant), 25);
    }

    #[test]
    fn assembly_consumes_and_produces_atomically() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let component_a = test_variant_id();
        let component_b = test_variant_id();
        let bundle = test_variant_id();

        let mut stock = BranchStock::empty(BranchStockId::for_branch(branch_id));
        let events = stock
            .handle(&LedgerCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                reference: None,
                lines: vec![
                    MovementLine {
                        variant_id: component_a,
                        selection: StockSelection::Quantity {
                            quantity: 10,
                            batch: None,
                        },
                    },
                    MovementLine {
                        variant_id: component_b,
                        selection: StockSelection::Serials(serials(&["X-1", "X-2", "X-3", "X-4"])),
                    },
                ],
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);

        let events = stock
            .handle(&LedgerCommand::Assemble(Assemble {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                assembly_id: Uuid::now_v7(),
                bundle_variant_id: bundle,
                quantity: 2,
                output_batch: None,
                components: vec![
                    MovementLine {
                        variant_id: component_a,
                        selection: StockSelection::Quantity {
                            quantity: 6,
                            batch: None,
                        },
                    },
                    MovementLine {
                        variant_id: component_b,
                        selection: StockSelection::Serials(serials(&["X-1", "X-2", "X-3", "X-4"])),
                    },
                ],
                occurred_at: test_time(),
            }))
            .unwrap();

        // Two consume entries + one produce entry, one atomic append.
        assert_eq!(events.len(), 3);
        apply_all(&mut stock, &events);
        assert_eq!(stock.on_hand(component_a), 4);
        assert_eq!(stock.on_hand(component_b), 0);
        assert_eq!(stock.on_hand(bundle), 2);
    }

    #[test]
    fn assembly_with_missing_component_stock_emits_nothing() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let component = test_variant_id();
        let bundle = test_variant_id();
        let stock = serialized_branch(tenant_id, branch_id, component, &["X-1", "X-2", "X-3"]);

        let err = stock
            .handle(&LedgerCommand::Assemble(Assemble {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                assembly_id: Uuid::now_v7(),
                bundle_variant_id: bundle,
                quantity: 2,
                output_batch: None,
                components: vec![MovementLine {
                    variant_id: component,
                    selection: StockSelection::Serials(serials(&["X-1", "X-2", "X-3", "X-9"])),
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock(_)));
        assert_eq!(stock.on_hand(component), 3);
        assert_eq!(stock.on_hand(bundle), 0);
    }

    #[test]
    fn reservation_is_all_or_nothing() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let mut stock = serialized_branch(tenant_id, branch_id, variant, &["SN-1", "SN-2"]);

        // Reserve SN-1.
        let events = stock
            .handle(&LedgerCommand::ReserveSerials(ReserveSerials {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                variant_id: variant,
                serials: serials(&["SN-1"]),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);
        assert_eq!(
            stock.serial(&SerialNumber::from("SN-1")).unwrap().status,
            SerialStatus::Reserved
        );

        // SN-1 is no longer available: reserving [SN-1, SN-2] must leave SN-2 untouched.
        let err = stock
            .handle(&LedgerCommand::ReserveSerials(ReserveSerials {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                variant_id: variant,
                serials: serials(&["SN-1", "SN-2"]),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(
            stock.serial(&SerialNumber::from("SN-2")).unwrap().status,
            SerialStatus::InStock
        );

        // Release brings SN-1 back.
        let events = stock
            .handle(&LedgerCommand::ReleaseSerials(ReleaseSerials {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                variant_id: variant,
                serials: serials(&["SN-1"]),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);
        assert_eq!(stock.in_stock_serial_count(variant), 2);
    }

    #[test]
    fn reserved_serial_cannot_be_dispatched() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let mut stock = serialized_branch(tenant_id, branch_id, variant, &["SN-1"]);

        let events = stock
            .handle(&LedgerCommand::ReserveSerials(ReserveSerials {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                variant_id: variant,
                serials: serials(&["SN-1"]),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);

        let err = stock
            .handle(&LedgerCommand::DispatchTransfer(DispatchTransfer {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                transfer_id: Uuid::now_v7(),
                lines: vec![MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Serials(serials(&["SN-1"])),
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn serialized_on_hand_equals_in_stock_count() {
        let tenant_id = test_tenant_id();
        let branch_id = test_branch_id();
        let variant = test_variant_id();
        let mut stock = serialized_branch(tenant_id, branch_id, variant, &["A", "B", "C"]);

        let events = stock
            .handle(&LedgerCommand::RecordAdjustment(RecordAdjustment {
                tenant_id,
                branch_id,
                operation_id: Uuid::now_v7(),
                user_id: None,
                line: MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Serials(serials(&["B"])),
                },
                reason: "damaged in storage".to_string(),
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut stock, &events);

        assert_eq!(stock.on_hand(variant), 2);
        assert_eq!(stock.in_stock_serial_count(variant), stock.on_hand(variant));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: applying any sequence of adjustments (keeping only
            /// the ones the ledger accepts) never drives on-hand negative,
            /// and on-hand always equals the sum of accepted deltas.
            #[test]
            fn on_hand_never_negative_under_random_adjustments(
                deltas in proptest::collection::vec(-25i64..25, 1..40)
            ) {
                let tenant_id = test_tenant_id();
                let branch_id = test_branch_id();
                let variant = test_variant_id();
                let mut stock = stocked_branch(tenant_id, branch_id, variant, 10);
                let mut expected = 10i64;

                for (i, delta) in deltas.into_iter().enumerate() {
                    if delta == 0 {
                        continue;
                    }
                    let cmd = LedgerCommand::RecordAdjustment(RecordAdjustment {
                        tenant_id,
                        branch_id,
                        operation_id: Uuid::now_v7(),
                        user_id: None,
                        line: MovementLine {
                            variant_id: variant,
                            selection: StockSelection::Quantity {
                                quantity: delta,
                                batch: None,
                            },
                        },
                        reason: format!("cycle count {i}"),
                        notes: None,
                        occurred_at: Utc::now(),
                    });

                    match stock.handle(&cmd) {
                        Ok(events) => {
                            for event in &events {
                                stock.apply(event);
                            }
                            expected += delta;
                        }
                        Err(DomainError::InsufficientStock(_)) => {
                            prop_assert!(expected + delta < 0,
                                "rejected a delta that would not go negative");
                        }
                        Err(other) => return Err(TestCaseError::fail(format!("{other:?}"))),
                    }

                    prop_assert!(stock.on_hand(variant) >= 0);
                    prop_assert_eq!(stock.on_hand(variant), expected);
                }
            }

            /// Property: a dispatched-and-received transfer conserves
            /// quantity — the signed legs sum to zero for any line quantity,
            /// and total stock across both branches is unchanged.
            #[test]
            fn transfer_legs_always_conserve(quantity in 1i64..=30) {
                let tenant_id = test_tenant_id();
                let source_branch = test_branch_id();
                let dest_branch = test_branch_id();
                let variant = test_variant_id();
                let transfer_id = Uuid::now_v7();

                let mut source = stocked_branch(tenant_id, source_branch, variant, 30);
                let mut dest = BranchStock::empty(BranchStockId::for_branch(dest_branch));

                let lines = vec![MovementLine {
                    variant_id: variant,
                    selection: StockSelection::Quantity {
                        quantity,
                        batch: None,
                    },
                }];

                let out_events = source
                    .handle(&LedgerCommand::DispatchTransfer(DispatchTransfer {
                        tenant_id,
                        branch_id: source_branch,
                        operation_id: Uuid::now_v7(),
                        user_id: None,
                        transfer_id,
                        lines: lines.clone(),
                        occurred_at: Utc::now(),
                    }))
                    .unwrap();
                for event in &out_events {
                    source.apply(event);
                }

                let in_events = dest
                    .handle(&LedgerCommand::ReceiveTransfer(ReceiveTransfer {
                        tenant_id,
                        branch_id: dest_branch,
                        operation_id: Uuid::now_v7(),
                        user_id: None,
                        transfer_id,
                        lines,
                        occurred_at: Utc::now(),
                    }))
                    .unwrap();
                for event in &in_events {
                    dest.apply(event);
                }

                let signed_sum: i64 = out_events
                    .iter()
                    .chain(in_events.iter())
                    .map(|e| match e {
                        LedgerEvent::MovementRecorded(m) => m.movement.quantity_change,
                        _ => 0,
                    })
                    .sum();
                prop_assert_eq!(signed_sum, 0);
                prop_assert_eq!(source.on_hand(variant) + dest.on_hand(variant), 30);
            }

            /// Property: for serialized stock, the derived on-hand always
            /// equals the number of in-stock serial units, across receipts,
            /// reservations, releases and removals.
            #[test]
            fn serial_count_invariant_holds(
                ops in proptest::collection::vec(0u8..4, 1..30)
            ) {
                let tenant_id = test_tenant_id();
                let branch_id = test_branch_id();
                let variant = test_variant_id();
                let mut stock = BranchStock::empty(BranchStockId::for_branch(branch_id));
                let mut next_serial = 0u32;

                for op in ops {
                    let cmd = match op {
                        0 => {
                            next_serial += 1;
                            LedgerCommand::ReceiveStock(ReceiveStock {
                                tenant_id,
                                branch_id,
                                operation_id: Uuid::now_v7(),
                                user_id: None,
                                reference: None,
                                lines: vec![MovementLine {
                                    variant_id: variant,
                                    selection: StockSelection::Serials(vec![
                                        SerialNumber::new(format!("SN-{next_serial}")),
                                    ]),
                                }],
                                notes: None,
                                occurred_at: Utc::now(),
                            })
                        }
                        1 => LedgerCommand::ReserveSerials(ReserveSerials {
                            tenant_id,
                            branch_id,
                            operation_id: Uuid::now_v7(),
                            variant_id: variant,
                            serials: vec![SerialNumber::new(format!("SN-{next_serial}"))],
                            occurred_at: Utc::now(),
                        }),
                        2 => LedgerCommand::ReleaseSerials(ReleaseSerials {
                            tenant_id,
                            branch_id,
                            operation_id: Uuid::now_v7(),
                            variant_id: variant,
                            serials: vec![SerialNumber::new(format!("SN-{next_serial}"))],
                            occurred_at: Utc::now(),
                        }),
                        _ => LedgerCommand::RecordAdjustment(RecordAdjustment {
                            tenant_id,
                            branch_id,
                            operation_id: Uuid::now_v7(),
                            user_id: None,
                            line: MovementLine {
                                variant_id: variant,
                                selection: StockSelection::Serials(vec![
                                    SerialNumber::new(format!("SN-{next_serial}")),
                                ]),
                            },
                            reason: "write-off".to_string(),
                            notes: None,
                            occurred_at: Utc::now(),
                        }),
                    };

                    if let Ok(events) = stock.handle(&cmd) {
                        for event in &events {
                            stock.apply(event);
                        }
                    }

                    prop_assert_eq!(
                        stock.on_hand(variant),
                        stock.in_stock_serial_count(variant)
                    );
                    prop_assert!(stock.on_hand(variant) >= 0);
                }
            }
        }
    }
}
