//! Catalog domain module (event-sourced).
//!
//! Product templates, attribute sets and the variant synthesis engine:
//! expanding attribute selections into concrete variants and reconciling the
//! desired combination set against the template's existing variants without
//! ever discarding sale/stock history.

pub mod attribute;
pub mod template;
pub mod variant;

pub use attribute::{Attribute, AttributeSet, AttributeSignature};
pub use template::{
    AddAttributeValue, AttributeValueAdded, BundleRecipeSet, CatalogCommand, CatalogEvent,
    CreateTemplate, DeactivateVariant, ProductTemplate, SetBundleRecipe, SynchronizeVariants,
    TemplateCreated, TemplateId, VariantDeactivated, VariantsSynchronized,
};
pub use variant::{BundleComponent, TrackingMode, VariantId, VariantRecord};
