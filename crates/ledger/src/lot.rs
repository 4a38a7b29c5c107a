//! Lot identity for bulk (non-serialized) stock.

use serde::{Deserialize, Serialize};

use stockpile_catalog::VariantId;

/// Key of a stock lot at a branch: the variant plus an optional batch number.
/// One lot per (variant, branch, batch); the lot counter is created on first
/// receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotKey {
    pub variant_id: VariantId,
    pub batch: Option<String>,
}

impl LotKey {
    pub fn new(variant_id: VariantId, batch: Option<String>) -> Self {
        Self { variant_id, batch }
    }

    pub fn unbatched(variant_id: VariantId) -> Self {
        Self {
            variant_id,
            batch: None,
        }
    }
}
