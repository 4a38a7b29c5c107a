//! Variant identity and catalog records.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockpile_core::DomainError;

use crate::attribute::AttributeSignature;
use crate::template::TemplateId;

/// Identifier of a product variant.
///
/// Derived deterministically (UUIDv5) from the owning template and the
/// canonical attribute signature: a signature always maps to the same
/// identity, so re-synthesizing can never mint a duplicate variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(Uuid);

impl VariantId {
    pub fn derive(template_id: TemplateId, signature: &AttributeSignature) -> Self {
        Self(Uuid::new_v5(
            template_id.0.as_uuid(),
            signature.canonical().as_bytes(),
        ))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for VariantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("VariantId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// How stock of a template's variants is tracked at branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Bulk quantities per lot, optionally keyed by batch number.
    Batched,
    /// Individually serialized units.
    Serialized,
}

/// A concrete sellable variant of a template.
///
/// Soft lifecycle: variants are never hard-deleted once they have held stock
/// or been sold; `is_active` gates visibility instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub variant_id: VariantId,
    pub signature: AttributeSignature,
    pub name: String,
    pub sku: String,
    pub is_active: bool,
}

/// One component line of a bundle recipe: `quantity_per_kit` units of the
/// component variant are consumed for each assembled kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleComponent {
    pub variant_id: VariantId,
    pub quantity_per_kit: i64,
}
