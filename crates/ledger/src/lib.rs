//! Stock ledger domain module (event-sourced).
//!
//! One `BranchStock` aggregate per (tenant, branch). Its events ARE the
//! append-only movement ledger: every quantity change — receipt, adjustment,
//! transfer leg, assembly leg — is a `MovementRecorded` event, and current
//! on-hand is the fold over those events. The aggregate also owns the
//! serial/lot allocator: lot counters per (variant, batch) and serial units
//! with an atomically reserved status.

pub mod branch_stock;
pub mod lot;
pub mod movement;
pub mod serial;

pub use branch_stock::{
    Assemble, BranchStock, BranchStockId, DispatchTransfer, LedgerCommand, LedgerEvent,
    MovementRecorded, ReceiveStock, ReceiveTransfer, RecordAdjustment, ReleaseSerials,
    ReserveSerials, SerialsReleased, SerialsReserved,
};
pub use lot::LotKey;
pub use movement::{MovementKind, MovementLine, MovementReference, StockMovement, StockSelection};
pub use serial::{SerialNumber, SerialStatus, SerialUnit};
