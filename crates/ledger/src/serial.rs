//! Serialized units: one record per physical unit of a serialized variant.

use serde::{Deserialize, Serialize};

use stockpile_core::Entity;
use stockpile_catalog::VariantId;

/// A tenant-wide unique serial number. Immutable once assigned at receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SerialNumber {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a serialized unit.
///
/// Branch aggregate state only holds `InStock`/`Reserved`; a unit leaves the
/// branch entirely on transfer dispatch or consumption. The serial index read
/// model additionally tracks `InTransit` (between transfer legs) and `Sold`
/// (terminal: sold, consumed into a kit, or written off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialStatus {
    InStock,
    Reserved,
    InTransit,
    Sold,
}

/// One physical unit of a serialized variant at a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialUnit {
    pub serial: SerialNumber,
    pub variant_id: VariantId,
    pub status: SerialStatus,
}

impl Entity for SerialUnit {
    type Id = SerialNumber;

    fn id(&self) -> &Self::Id {
        &self.serial
    }
}
