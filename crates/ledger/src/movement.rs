//! Ledger entries: immutable, signed stock movements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockpile_core::{BranchId, TenantId, UserId};
use stockpile_catalog::VariantId;

use crate::serial::SerialNumber;

/// Classification of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receipt,
    Adjustment,
    TransferOut,
    TransferIn,
    AssemblyConsume,
    AssemblyProduce,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receipt => "receipt",
            MovementKind::Adjustment => "adjustment",
            MovementKind::TransferOut => "transfer_out",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::AssemblyConsume => "assembly_consume",
            MovementKind::AssemblyProduce => "assembly_produce",
        }
    }
}

/// Link from a movement back to the operation that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MovementReference {
    /// Inter-branch transfer document.
    Transfer(Uuid),
    /// Assembly/kitting job.
    Assembly(Uuid),
    /// External receiving document (GRN number).
    Receipt(String),
}

impl core::fmt::Display for MovementReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MovementReference::Transfer(id) => write!(f, "transfer:{id}"),
            MovementReference::Assembly(id) => write!(f, "assembly:{id}"),
            MovementReference::Receipt(n) => write!(f, "receipt:{n}"),
        }
    }
}

/// An immutable ledger entry. Appended, never updated; on-hand quantity is
/// always a fold over these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub variant_id: VariantId,
    pub batch: Option<String>,
    /// Signed change; negative entries debit the branch.
    pub quantity_change: i64,
    /// The affected serial numbers, when the variant is serialized.
    pub serials: Vec<SerialNumber>,
    pub kind: MovementKind,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub reference: Option<MovementReference>,
    pub user_id: Option<UserId>,
    /// Client-supplied idempotency key; a retried operation records nothing.
    pub operation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// What a movement line selects: a bulk quantity out of a lot, or explicit
/// serial numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockSelection {
    Quantity { quantity: i64, batch: Option<String> },
    Serials(Vec<SerialNumber>),
}

impl StockSelection {
    /// Number of units this selection moves (absolute).
    pub fn unit_count(&self) -> i64 {
        match self {
            StockSelection::Quantity { quantity, .. } => quantity.abs(),
            StockSelection::Serials(serials) => serials.len() as i64,
        }
    }
}

/// One line of a multi-line movement command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub variant_id: VariantId,
    pub selection: StockSelection,
}
