use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

use crate::attribute::{Attribute, AttributeSet, AttributeSignature};
use crate::variant::{BundleComponent, TrackingMode, VariantId, VariantRecord};

/// Product template identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub AggregateId);

impl TemplateId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: ProductTemplate.
///
/// Owns the attribute set, the variants synthesized from it (keyed by
/// canonical signature) and bundle recipes for kit assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTemplate {
    id: TemplateId,
    tenant_id: Option<TenantId>,
    name: String,
    base_sku: String,
    tracking: TrackingMode,
    attribute_set: Option<AttributeSet>,
    variants: BTreeMap<String, VariantRecord>,
    recipes: BTreeMap<VariantId, Vec<BundleComponent>>,
    version: u64,
    created: bool,
}

impl ProductTemplate {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TemplateId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            base_sku: String::new(),
            tracking: TrackingMode::Batched,
            attribute_set: None,
            variants: BTreeMap::new(),
            recipes: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TemplateId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracking(&self) -> TrackingMode {
        self.tracking
    }

    pub fn attribute_set(&self) -> Option<&AttributeSet> {
        self.attribute_set.as_ref()
    }

    pub fn variants(&self) -> impl Iterator<Item = &VariantRecord> {
        self.variants.values()
    }

    pub fn variant_by_id(&self, variant_id: VariantId) -> Option<&VariantRecord> {
        self.variants.values().find(|v| v.variant_id == variant_id)
    }

    pub fn recipe(&self, bundle_variant_id: VariantId) -> Option<&[BundleComponent]> {
        self.recipes.get(&bundle_variant_id).map(|c| c.as_slice())
    }
}

impl AggregateRoot for ProductTemplate {
    type Id = TemplateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTemplate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTemplate {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub name: String,
    pub base_sku: String,
    pub tracking: TrackingMode,
    pub attributes: Vec<Attribute>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddAttributeValue. The only mutation an attribute set allows
/// once it is referenced by variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAttributeValue {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub attribute: String,
    pub value: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SynchronizeVariants.
///
/// `on_hand` is a snapshot of total on-hand quantity per variant across all
/// branches, supplied by the caller; it gates deactivation (invariant: a
/// variant holding stock anywhere stays active).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizeVariants {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub selections: BTreeMap<String, Vec<String>>,
    pub on_hand: BTreeMap<VariantId, i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetBundleRecipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBundleRecipe {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub bundle_variant_id: VariantId,
    pub components: Vec<BundleComponent>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateVariant (manual lifecycle, same stock guard as sync).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateVariant {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub variant_id: VariantId,
    /// Total on-hand across branches at decision time.
    pub on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogCommand {
    CreateTemplate(CreateTemplate),
    AddAttributeValue(AddAttributeValue),
    SynchronizeVariants(SynchronizeVariants),
    SetBundleRecipe(SetBundleRecipe),
    DeactivateVariant(DeactivateVariant),
}

/// Event: TemplateCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCreated {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub name: String,
    pub base_sku: String,
    pub tracking: TrackingMode,
    pub attributes: Vec<Attribute>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AttributeValueAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValueAdded {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub attribute: String,
    pub value: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantsSynchronized.
///
/// One reconciliation run: everything the synthesis engine created,
/// reactivated or deactivated, plus the deactivations blocked by live stock.
/// Blocked entries change no state; they are the audit record of invariant 5
/// holding its ground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantsSynchronized {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub created: Vec<VariantRecord>,
    pub reactivated: Vec<VariantId>,
    pub deactivated: Vec<VariantId>,
    pub blocked_deactivations: Vec<VariantId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BundleRecipeSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecipeSet {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub bundle_variant_id: VariantId,
    pub components: Vec<BundleComponent>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantDeactivated (manual path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDeactivated {
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    TemplateCreated(TemplateCreated),
    AttributeValueAdded(AttributeValueAdded),
    VariantsSynchronized(VariantsSynchronized),
    BundleRecipeSet(BundleRecipeSet),
    VariantDeactivated(VariantDeactivated),
}

impl Event for CatalogEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::TemplateCreated(_) => "catalog.template.created",
            CatalogEvent::AttributeValueAdded(_) => "catalog.template.attribute_value_added",
            CatalogEvent::VariantsSynchronized(_) => "catalog.template.variants_synchronized",
            CatalogEvent::BundleRecipeSet(_) => "catalog.template.bundle_recipe_set",
            CatalogEvent::VariantDeactivated(_) => "catalog.template.variant_deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CatalogEvent::TemplateCreated(e) => e.occurred_at,
            CatalogEvent::AttributeValueAdded(e) => e.occurred_at,
            CatalogEvent::VariantsSynchronized(e) => e.occurred_at,
            CatalogEvent::BundleRecipeSet(e) => e.occurred_at,
            CatalogEvent::VariantDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductTemplate {
    type Command = CatalogCommand;
    type Event = CatalogEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CatalogEvent::TemplateCreated(e) => {
                self.id = e.template_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.base_sku = e.base_sku.clone();
                self.tracking = e.tracking;
                self.attribute_set = Some(AttributeSet::new(e.attributes.clone()));
                self.variants.clear();
                self.recipes.clear();
                self.created = true;
            }
            CatalogEvent::AttributeValueAdded(e) => {
                if let Some(set) = self.attribute_set.as_mut() {
                    if let Some(attr) = set.attribute_mut(&e.attribute) {
                        if !attr.has_value(&e.value) {
                            attr.values.push(e.value.clone());
                        }
                    }
                }
            }
            CatalogEvent::VariantsSynchronized(e) => {
                for record in &e.created {
                    self.variants
                        .insert(record.signature.canonical(), record.clone());
                }
                for variant in self.variants.values_mut() {
                    if e.reactivated.contains(&variant.variant_id) {
                        variant.is_active = true;
                    }
                    if e.deactivated.contains(&variant.variant_id) {
                        variant.is_active = false;
                    }
                }
                // blocked_deactivations intentionally change nothing.
            }
            CatalogEvent::BundleRecipeSet(e) => {
                self.recipes
                    .insert(e.bundle_variant_id, e.components.clone());
            }
            CatalogEvent::VariantDeactivated(e) => {
                for variant in self.variants.values_mut() {
                    if variant.variant_id == e.variant_id {
                        variant.is_active = false;
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CatalogCommand::CreateTemplate(cmd) => self.handle_create(cmd),
            CatalogCommand::AddAttributeValue(cmd) => self.handle_add_value(cmd),
            CatalogCommand::SynchronizeVariants(cmd) => self.handle_synchronize(cmd),
            CatalogCommand::SetBundleRecipe(cmd) => self.handle_set_recipe(cmd),
            CatalogCommand::DeactivateVariant(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl ProductTemplate {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_template_id(&self, template_id: TemplateId) -> Result<(), DomainError> {
        if self.id != template_id {
            return Err(DomainError::invariant("template_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateTemplate) -> Result<Vec<CatalogEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("template already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.base_sku.trim().is_empty() {
            return Err(DomainError::validation("base SKU cannot be empty"));
        }
        for (idx, attr) in cmd.attributes.iter().enumerate() {
            if attr.name.trim().is_empty() {
                return Err(DomainError::validation("attribute name cannot be empty"));
            }
            if cmd.attributes[..idx].iter().any(|a| a.name == attr.name) {
                return Err(DomainError::validation(format!(
                    "duplicate attribute '{}'",
                    attr.name
                )));
            }
            for (vidx, value) in attr.values.iter().enumerate() {
                if value.trim().is_empty() {
                    return Err(DomainError::validation(format!(
                        "empty value for attribute '{}'",
                        attr.name
                    )));
                }
                if attr.values[..vidx].contains(value) {
                    return Err(DomainError::validation(format!(
                        "duplicate value '{}' for attribute '{}'",
                        value, attr.name
                    )));
                }
            }
        }

        Ok(vec![CatalogEvent::TemplateCreated(TemplateCreated {
            tenant_id: cmd.tenant_id,
            template_id: cmd.template_id,
            name: cmd.name.clone(),
            base_sku: cmd.base_sku.clone(),
            tracking: cmd.tracking,
            attributes: cmd.attributes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_value(&self, cmd: &AddAttributeValue) -> Result<Vec<CatalogEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_template_id(cmd.template_id)?;

        let set = self
            .attribute_set
            .as_ref()
            .ok_or_else(|| DomainError::validation("template has no attribute set"))?;
        let attr = set
            .attribute(&cmd.attribute)
            .ok_or_else(|| DomainError::validation(format!("unknown attribute '{}'", cmd.attribute)))?;

        if cmd.value.trim().is_empty() {
            return Err(DomainError::validation("value cannot be empty"));
        }
        if attr.has_value(&cmd.value) {
            return Err(DomainError::conflict(format!(
                "value '{}' already declared for attribute '{}'",
                cmd.value, cmd.attribute
            )));
        }

        Ok(vec![CatalogEvent::AttributeValueAdded(AttributeValueAdded {
            tenant_id: cmd.tenant_id,
            template_id: cmd.template_id,
            attribute: cmd.attribute.clone(),
            value: cmd.value.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Reconcile the desired signature set against existing variants.
    ///
    /// - missing signature: create a variant (deterministic id, default
    ///   name/SKU derived from the template);
    /// - matching inactive variant: reactivate, never duplicate;
    /// - active variant outside the desired set: deactivate only when its
    ///   total on-hand is zero, otherwise report it blocked and keep it.
    ///
    /// Running the same selections twice yields nothing to create or
    /// reactivate on the second run.
    fn handle_synchronize(
        &self,
        cmd: &SynchronizeVariants,
    ) -> Result<Vec<CatalogEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_template_id(cmd.template_id)?;

        let set = self
            .attribute_set
            .as_ref()
            .filter(|s| !s.attributes.is_empty())
            .ok_or_else(|| DomainError::validation("template has no attributes to expand"))?;
        let desired = set.expand(&cmd.selections)?;

        let mut created = Vec::new();
        let mut reactivated = Vec::new();
        let mut desired_keys: Vec<String> = Vec::with_capacity(desired.len());

        for signature in &desired {
            let key = signature.canonical();
            match self.variants.get(&key) {
                None => {
                    let variant_id = VariantId::derive(self.id, signature);
                    let suffix = signature.values().collect::<Vec<_>>().join(" - ");
                    let sku_suffix = signature.values().collect::<Vec<_>>().join("-");
                    created.push(VariantRecord {
                        variant_id,
                        signature: signature.clone(),
                        name: format!("{} - {}", self.name, suffix),
                        sku: format!("{}-{}", self.base_sku, sku_suffix),
                        is_active: true,
                    });
                }
                Some(existing) if !existing.is_active => {
                    reactivated.push(existing.variant_id);
                }
                Some(_) => {}
            }
            desired_keys.push(key);
        }

        let mut deactivated = Vec::new();
        let mut blocked = Vec::new();
        for (key, variant) in &self.variants {
            if variant.is_active && !desired_keys.contains(key) {
                let on_hand = cmd.on_hand.get(&variant.variant_id).copied().unwrap_or(0);
                if on_hand == 0 {
                    deactivated.push(variant.variant_id);
                } else {
                    blocked.push(variant.variant_id);
                }
            }
        }

        if created.is_empty() && reactivated.is_empty() && deactivated.is_empty() && blocked.is_empty()
        {
            // Fully converged; nothing to record.
            return Ok(vec![]);
        }

        Ok(vec![CatalogEvent::VariantsSynchronized(VariantsSynchronized {
            tenant_id: cmd.tenant_id,
            template_id: cmd.template_id,
            created,
            reactivated,
            deactivated,
            blocked_deactivations: blocked,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_recipe(&self, cmd: &SetBundleRecipe) -> Result<Vec<CatalogEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_template_id(cmd.template_id)?;

        if self.variant_by_id(cmd.bundle_variant_id).is_none() {
            return Err(DomainError::not_found());
        }
        if cmd.components.is_empty() {
            return Err(DomainError::validation("bundle recipe cannot be empty"));
        }
        for (idx, component) in cmd.components.iter().enumerate() {
            if component.quantity_per_kit <= 0 {
                return Err(DomainError::validation(
                    "component quantity per kit must be positive",
                ));
            }
            if component.variant_id == cmd.bundle_variant_id {
                return Err(DomainError::validation(
                    "a bundle cannot contain itself as a component",
                ));
            }
            if cmd.components[..idx]
                .iter()
                .any(|c| c.variant_id == component.variant_id)
            {
                return Err(DomainError::validation("duplicate component in recipe"));
            }
        }

        Ok(vec![CatalogEvent::BundleRecipeSet(BundleRecipeSet {
            tenant_id: cmd.tenant_id,
            template_id: cmd.template_id,
            bundle_variant_id: cmd.bundle_variant_id,
            components: cmd.components.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateVariant) -> Result<Vec<CatalogEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_template_id(cmd.template_id)?;

        let variant = self
            .variant_by_id(cmd.variant_id)
            .ok_or_else(DomainError::not_found)?;
        if !variant.is_active {
            return Err(DomainError::conflict("variant is already inactive"));
        }
        if cmd.on_hand != 0 {
            return Err(DomainError::invariant(
                "variant with on-hand stock cannot be deactivated",
            ));
        }

        Ok(vec![CatalogEvent::VariantDeactivated(VariantDeactivated {
            tenant_id: cmd.tenant_id,
            template_id: cmd.template_id,
            variant_id: cmd.variant_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
