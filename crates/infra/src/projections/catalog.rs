use serde_json::Value as JsonValue;

use stockpile_catalog::{
    BundleComponent, CatalogEvent, TemplateId, TrackingMode, VariantId,
};
use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;

use crate::read_model::TenantStore;

use super::{ProjectionError, StreamCursors};

/// Template header view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateView {
    pub template_id: TemplateId,
    pub name: String,
    pub base_sku: String,
    pub tracking: TrackingMode,
}

/// Variant view consumed by the UI, the label/print subsystem and the
/// assembly coordinator (recipe + tracking mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantView {
    pub variant_id: VariantId,
    pub template_id: TemplateId,
    pub signature: String,
    pub name: String,
    pub sku: String,
    pub is_active: bool,
    pub tracking: TrackingMode,
    pub recipe: Option<Vec<BundleComponent>>,
}

/// Catalog projection over template streams.
#[derive(Debug)]
pub struct CatalogProjection<ST, SV>
where
    ST: TenantStore<TemplateId, TemplateView>,
    SV: TenantStore<VariantId, VariantView>,
{
    templates: ST,
    variants: SV,
    cursors: StreamCursors,
}

impl<ST, SV> CatalogProjection<ST, SV>
where
    ST: TenantStore<TemplateId, TemplateView>,
    SV: TenantStore<VariantId, VariantView>,
{
    pub fn new(templates: ST, variants: SV) -> Self {
        Self {
            templates,
            variants,
            cursors: StreamCursors::new(),
        }
    }

    pub fn template(&self, tenant_id: TenantId, template_id: TemplateId) -> Option<TemplateView> {
        self.templates.get(tenant_id, &template_id)
    }

    pub fn variant(&self, tenant_id: TenantId, variant_id: VariantId) -> Option<VariantView> {
        self.variants.get(tenant_id, &variant_id)
    }

    pub fn variants_for_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> Vec<VariantView> {
        let mut rows: Vec<VariantView> = self
            .variants
            .list(tenant_id)
            .into_iter()
            .filter(|v| v.template_id == template_id)
            .collect();
        rows.sort_by(|a, b| a.signature.cmp(&b.signature));
        rows
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "catalog.template" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.check(tenant_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: CatalogEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            CatalogEvent::TemplateCreated(e) => {
                if e.tenant_id != tenant_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event tenant_id does not match envelope".to_string(),
                    ));
                }
                self.templates.upsert(
                    tenant_id,
                    e.template_id,
                    TemplateView {
                        template_id: e.template_id,
                        name: e.name.clone(),
                        base_sku: e.base_sku.clone(),
                        tracking: e.tracking,
                    },
                );
            }
            CatalogEvent::AttributeValueAdded(_) => {}
            CatalogEvent::VariantsSynchronized(e) => {
                let tracking = self
                    .templates
                    .get(tenant_id, &e.template_id)
                    .map(|t| t.tracking)
                    .unwrap_or(TrackingMode::Batched);

                for record in &e.created {
                    self.variants.upsert(
                        tenant_id,
                        record.variant_id,
                        VariantView {
                            variant_id: record.variant_id,
                            template_id: e.template_id,
                            signature: record.signature.canonical(),
                            name: record.name.clone(),
                            sku: record.sku.clone(),
                            is_active: record.is_active,
                            tracking,
                            recipe: None,
                        },
                    );
                }
                for variant_id in &e.reactivated {
                    if let Some(mut view) = self.variants.get(tenant_id, variant_id) {
                        view.is_active = true;
                        self.variants.upsert(tenant_id, *variant_id, view);
                    }
                }
                for variant_id in &e.deactivated {
                    if let Some(mut view) = self.variants.get(tenant_id, variant_id) {
                        view.is_active = false;
                        self.variants.upsert(tenant_id, *variant_id, view);
                    }
                }
            }
            CatalogEvent::BundleRecipeSet(e) => {
                if let Some(mut view) = self.variants.get(tenant_id, &e.bundle_variant_id) {
                    view.recipe = Some(e.components.clone());
                    self.variants.upsert(tenant_id, e.bundle_variant_id, view);
                }
            }
            CatalogEvent::VariantDeactivated(e) => {
                if let Some(mut view) = self.variants.get(tenant_id, &e.variant_id) {
                    view.is_active = false;
                    self.variants.upsert(tenant_id, e.variant_id, view);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
