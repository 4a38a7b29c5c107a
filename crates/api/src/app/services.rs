//! Infrastructure wiring: store + bus + dispatcher + projections +
//! coordinators behind one service facade the routes call into.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockpile_catalog::{
    AddAttributeValue, Attribute, CatalogCommand, CreateTemplate, ProductTemplate, SetBundleRecipe,
    TemplateId, TrackingMode, VariantId,
};
use stockpile_core::{AggregateId, BranchId, TenantId, UserId};
use stockpile_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use stockpile_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use stockpile_infra::coordinators::{
    self, AssemblyReceipt, AssemblyRequest, ReceiptRequest, SyncReport,
};
use stockpile_infra::event_store::InMemoryEventStore;
use stockpile_infra::projections::catalog::{CatalogProjection, TemplateView, VariantView};
use stockpile_infra::projections::movement_history::{MovementHistoryProjection, MovementView};
use stockpile_infra::projections::serial_index::{SerialIndexProjection, SerialView};
use stockpile_infra::projections::stock_levels::{StockLevel, StockLevelsProjection};
use stockpile_infra::projections::Page;
use stockpile_infra::read_model::InMemoryTenantStore;
use stockpile_infra::serial_registry::SerialRegistry;
use stockpile_ledger::{
    BranchStock, BranchStockId, LedgerCommand, MovementLine, RecordAdjustment, ReleaseSerials,
    ReserveSerials, SerialNumber,
};
use stockpile_transfers::{StockTransfer, TransferId, TransferStatus};

pub type SharedStore = Arc<InMemoryEventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;

const BRANCH_STOCK_TYPE: &str = "stock.branch";
const TEMPLATE_TYPE: &str = "catalog.template";

/// Application services: one instance per process, shared across requests.
///
/// Projections are folded inline after each commit (the subscription is
/// drained under a lock), so reads observe their own writes — the print/label
/// consumer bounds label quantities against current data. The bus still
/// carries every envelope for external subscribers.
pub struct AppServices {
    dispatcher: Dispatcher,
    bus: SharedBus,
    subscription: Mutex<Subscription<EventEnvelope<JsonValue>>>,
    registry: SerialRegistry,
    catalog: CatalogProjection<
        Arc<InMemoryTenantStore<TemplateId, TemplateView>>,
        Arc<InMemoryTenantStore<VariantId, VariantView>>,
    >,
    stock_levels:
        StockLevelsProjection<Arc<InMemoryTenantStore<(BranchId, VariantId), StockLevel>>>,
    serial_index: SerialIndexProjection<Arc<InMemoryTenantStore<SerialNumber, SerialView>>>,
    movements: MovementHistoryProjection<Arc<InMemoryTenantStore<Uuid, MovementView>>>,
}

pub fn build_services() -> AppServices {
    let store: SharedStore = Arc::new(InMemoryEventStore::new());
    let bus: SharedBus = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    let dispatcher = CommandDispatcher::new(store, bus.clone());

    AppServices {
        dispatcher,
        bus,
        subscription: Mutex::new(subscription),
        registry: SerialRegistry::new(),
        catalog: CatalogProjection::new(
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryTenantStore::new()),
        ),
        stock_levels: StockLevelsProjection::new(Arc::new(InMemoryTenantStore::new())),
        serial_index: SerialIndexProjection::new(Arc::new(InMemoryTenantStore::new())),
        movements: MovementHistoryProjection::new(Arc::new(InMemoryTenantStore::new())),
    }
}

impl AppServices {
    /// Drain committed envelopes into the projections. Idempotent (cursor
    /// guarded), called after every write and before every read.
    fn pump(&self) {
        let subscription = match self.subscription.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        while let Ok(envelope) = subscription.try_recv() {
            if let Err(e) = self.catalog.apply_envelope(&envelope) {
                tracing::error!(error = %e, "catalog projection apply failed");
            }
            if let Err(e) = self.stock_levels.apply_envelope(&envelope) {
                tracing::error!(error = %e, "stock levels projection apply failed");
            }
            if let Err(e) = self.serial_index.apply_envelope(&envelope) {
                tracing::error!(error = %e, "serial index projection apply failed");
            }
            if let Err(e) = self.movements.apply_envelope(&envelope) {
                tracing::error!(error = %e, "movement history projection apply failed");
            }
        }
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    // ----- catalog -------------------------------------------------------

    pub fn create_template(
        &self,
        tenant_id: TenantId,
        name: String,
        base_sku: String,
        tracking: TrackingMode,
        attributes: Vec<Attribute>,
    ) -> Result<TemplateId, DispatchError> {
        let template_id = TemplateId::new(AggregateId::new());
        self.dispatcher.dispatch::<ProductTemplate>(
            tenant_id,
            template_id.0,
            TEMPLATE_TYPE,
            CatalogCommand::CreateTemplate(CreateTemplate {
                tenant_id,
                template_id,
                name,
                base_sku,
                tracking,
                attributes,
                occurred_at: Utc::now(),
            }),
            |_t, id| ProductTemplate::empty(TemplateId::new(id)),
        )?;
        self.pump();
        Ok(template_id)
    }

    pub fn add_attribute_value(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
        attribute: String,
        value: String,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch::<ProductTemplate>(
            tenant_id,
            template_id.0,
            TEMPLATE_TYPE,
            CatalogCommand::AddAttributeValue(AddAttributeValue {
                tenant_id,
                template_id,
                attribute,
                value,
                occurred_at: Utc::now(),
            }),
            |_t, id| ProductTemplate::empty(TemplateId::new(id)),
        )?;
        self.pump();
        Ok(())
    }

    pub fn synchronize_variants(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
        selections: BTreeMap<String, Vec<String>>,
    ) -> Result<SyncReport, DispatchError> {
        self.pump();
        let report = coordinators::synchronize_variants(
            &self.dispatcher,
            &self.catalog,
            &self.stock_levels,
            tenant_id,
            template_id,
            selections,
        )?;
        self.pump();
        Ok(report)
    }

    pub fn set_bundle_recipe(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
        bundle_variant_id: VariantId,
        components: Vec<stockpile_catalog::BundleComponent>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch::<ProductTemplate>(
            tenant_id,
            template_id.0,
            TEMPLATE_TYPE,
            CatalogCommand::SetBundleRecipe(SetBundleRecipe {
                tenant_id,
                template_id,
                bundle_variant_id,
                components,
                occurred_at: Utc::now(),
            }),
            |_t, id| ProductTemplate::empty(TemplateId::new(id)),
        )?;
        self.pump();
        Ok(())
    }

    pub fn deactivate_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<(), DispatchError> {
        self.pump();
        coordinators::deactivate_variant(
            &self.dispatcher,
            &self.catalog,
            &self.stock_levels,
            tenant_id,
            variant_id,
        )?;
        self.pump();
        Ok(())
    }

    pub fn template_variants(&self, tenant_id: TenantId, template_id: TemplateId) -> Vec<VariantView> {
        self.pump();
        self.catalog.variants_for_template(tenant_id, template_id)
    }

    pub fn template(&self, tenant_id: TenantId, template_id: TemplateId) -> Option<TemplateView> {
        self.pump();
        self.catalog.template(tenant_id, template_id)
    }

    pub fn variant(&self, tenant_id: TenantId, variant_id: VariantId) -> Option<VariantView> {
        self.pump();
        self.catalog.variant(tenant_id, variant_id)
    }

    // ----- stock ---------------------------------------------------------

    pub fn receive_stock(
        &self,
        tenant_id: TenantId,
        request: ReceiptRequest,
    ) -> Result<usize, DispatchError> {
        let committed =
            coordinators::receive_stock(&self.dispatcher, &self.registry, tenant_id, request)?;
        self.pump();
        Ok(committed.len())
    }

    pub fn record_adjustment(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        line: MovementLine,
        reason: String,
        notes: Option<String>,
        operation_id: Uuid,
        user_id: Option<UserId>,
    ) -> Result<Vec<Uuid>, DispatchError> {
        let stock_id = BranchStockId::for_branch(branch_id);
        let committed = self.dispatcher.dispatch::<BranchStock>(
            tenant_id,
            stock_id.0,
            BRANCH_STOCK_TYPE,
            LedgerCommand::RecordAdjustment(RecordAdjustment {
                tenant_id,
                branch_id,
                operation_id,
                user_id,
                line,
                reason,
                notes,
                occurred_at: Utc::now(),
            }),
            |_t, id| BranchStock::empty(BranchStockId::new(id)),
        )?;
        self.pump();
        Ok(committed.iter().map(|e| e.event_id).collect())
    }

    pub fn reserve_serials(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
        serials: Vec<SerialNumber>,
        operation_id: Uuid,
    ) -> Result<(), DispatchError> {
        let stock_id = BranchStockId::for_branch(branch_id);
        self.dispatcher.dispatch::<BranchStock>(
            tenant_id,
            stock_id.0,
            BRANCH_STOCK_TYPE,
            LedgerCommand::ReserveSerials(ReserveSerials {
                tenant_id,
                branch_id,
                operation_id,
                variant_id,
                serials,
                occurred_at: Utc::now(),
            }),
            |_t, id| BranchStock::empty(BranchStockId::new(id)),
        )?;
        self.pump();
        Ok(())
    }

    pub fn release_serials(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
        serials: Vec<SerialNumber>,
        operation_id: Uuid,
    ) -> Result<(), DispatchError> {
        let stock_id = BranchStockId::for_branch(branch_id);
        self.dispatcher.dispatch::<BranchStock>(
            tenant_id,
            stock_id.0,
            BRANCH_STOCK_TYPE,
            LedgerCommand::ReleaseSerials(ReleaseSerials {
                tenant_id,
                branch_id,
                operation_id,
                variant_id,
                serials,
                occurred_at: Utc::now(),
            }),
            |_t, id| BranchStock::empty(BranchStockId::new(id)),
        )?;
        self.pump();
        Ok(())
    }

    pub fn stock_levels(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        self.pump();
        self.stock_levels.list(tenant_id)
    }

    pub fn lot_quantity(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        variant_id: VariantId,
        batch: Option<&str>,
    ) -> i64 {
        self.pump();
        self.stock_levels
            .lot_quantity(tenant_id, branch_id, variant_id, batch)
    }

    pub fn available_serials(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        branch_id: BranchId,
        search: Option<&str>,
        page: Page,
    ) -> Vec<SerialView> {
        self.pump();
        self.serial_index
            .available(tenant_id, variant_id, branch_id, search, page)
    }

    pub fn movement_history(
        &self,
        tenant_id: TenantId,
        branch_id: Option<BranchId>,
        variant_id: Option<VariantId>,
        page: Page,
    ) -> Vec<MovementView> {
        self.pump();
        self.movements.history(tenant_id, branch_id, variant_id, page)
    }

    // ----- transfers -----------------------------------------------------

    pub fn create_transfer(
        &self,
        tenant_id: TenantId,
        from_branch_id: BranchId,
        to_branch_id: BranchId,
        lines: Vec<MovementLine>,
    ) -> Result<TransferId, DispatchError> {
        let id = coordinators::create_transfer(
            &self.dispatcher,
            tenant_id,
            from_branch_id,
            to_branch_id,
            lines,
        )?;
        self.pump();
        Ok(id)
    }

    pub fn dispatch_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
        operation_id: Uuid,
        user_id: Option<UserId>,
    ) -> Result<TransferStatus, DispatchError> {
        let status = coordinators::dispatch_transfer(
            &self.dispatcher,
            tenant_id,
            transfer_id,
            operation_id,
            user_id,
        );
        self.pump();
        status
    }

    pub fn receive_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
        operation_id: Uuid,
        user_id: Option<UserId>,
    ) -> Result<TransferStatus, DispatchError> {
        let status = coordinators::receive_transfer(
            &self.dispatcher,
            tenant_id,
            transfer_id,
            operation_id,
            user_id,
        );
        self.pump();
        status
    }

    pub fn cancel_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<TransferStatus, DispatchError> {
        let status = coordinators::cancel_transfer(&self.dispatcher, tenant_id, transfer_id);
        self.pump();
        status
    }

    pub fn transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<StockTransfer, DispatchError> {
        coordinators::load_transfer(&self.dispatcher, tenant_id, transfer_id)
    }

    // ----- assemblies ----------------------------------------------------

    pub fn execute_assembly(
        &self,
        tenant_id: TenantId,
        request: AssemblyRequest,
    ) -> Result<AssemblyReceipt, DispatchError> {
        self.pump();
        let receipt =
            coordinators::execute_assembly(&self.dispatcher, &self.catalog, tenant_id, request)?;
        self.pump();
        Ok(receipt)
    }
}
