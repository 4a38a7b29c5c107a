//! Request/response DTOs and JSON mapping helpers.

use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use stockpile_catalog::{Attribute, BundleComponent, TrackingMode, VariantId};
use stockpile_core::BranchId;
use stockpile_infra::coordinators::SyncReport;
use stockpile_infra::projections::movement_history::MovementView;
use stockpile_infra::projections::serial_index::SerialView;
use stockpile_infra::projections::stock_levels::StockLevel;
use stockpile_infra::projections::catalog::VariantView;
use stockpile_ledger::{MovementLine, SerialNumber, StockSelection};
use stockpile_transfers::StockTransfer;

/// Uniform success envelope.
pub fn json_ok(status: StatusCode, data: JsonValue) -> axum::response::Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

// ----- requests ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub base_sku: String,
    pub tracking: TrackingMode,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
pub struct SyncVariantsRequest {
    pub attribute_selections: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AddAttributeValueRequest {
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct BundleRecipeRequest {
    pub bundle_variant_id: VariantId,
    pub components: Vec<BundleComponent>,
}

/// One stock line: either a bulk quantity (with optional batch) or an
/// explicit serial list.
#[derive(Debug, Deserialize)]
pub struct StockLineRequest {
    pub variant_id: VariantId,
    pub quantity: Option<i64>,
    pub batch: Option<String>,
    pub serials: Option<Vec<String>>,
}

impl StockLineRequest {
    pub fn into_line(self) -> Result<MovementLine, &'static str> {
        let selection = match (self.quantity, self.serials) {
            (Some(quantity), None) => StockSelection::Quantity {
                quantity,
                batch: self.batch,
            },
            (None, Some(serials)) if !serials.is_empty() => {
                StockSelection::Serials(serials.into_iter().map(SerialNumber::new).collect())
            }
            _ => return Err("each line must carry either a quantity or a non-empty serial list"),
        };
        Ok(MovementLine {
            variant_id: self.variant_id,
            selection,
        })
    }
}

pub fn into_lines(lines: Vec<StockLineRequest>) -> Result<Vec<MovementLine>, &'static str> {
    lines.into_iter().map(StockLineRequest::into_line).collect()
}

#[derive(Debug, Deserialize)]
pub struct ReceiptRequestBody {
    pub branch_id: BranchId,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<StockLineRequest>,
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequestBody {
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub quantity_change: Option<i64>,
    pub batch: Option<String>,
    pub serials: Option<Vec<String>>,
    pub reason: String,
    pub notes: Option<String>,
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SerialActionBody {
    pub branch_id: BranchId,
    pub variant_id: VariantId,
    pub serials: Vec<String>,
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferBody {
    pub from_branch_id: BranchId,
    pub to_branch_id: BranchId,
    pub lines: Vec<StockLineRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationBody {
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AssemblyBody {
    pub branch_id: BranchId,
    pub bundle_variant_id: VariantId,
    pub quantity_to_assemble: i64,
    pub component_selections: Vec<StockLineRequest>,
    pub output_batch: Option<String>,
    pub operation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LevelsQuery {
    pub branch_id: Option<BranchId>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LotQuantityQuery {
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub batch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSerialsQuery {
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub branch_id: Option<BranchId>,
    pub variant_id: Option<VariantId>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

// ----- responses ---------------------------------------------------------

pub fn variant_to_json(v: &VariantView) -> JsonValue {
    json!({
        "variant_id": v.variant_id.to_string(),
        "template_id": v.template_id.to_string(),
        "signature": v.signature,
        "name": v.name,
        "sku": v.sku,
        "is_active": v.is_active,
        "tracking": v.tracking,
        "recipe": v.recipe.as_ref().map(|components| {
            components
                .iter()
                .map(|c| json!({
                    "variant_id": c.variant_id.to_string(),
                    "quantity_per_kit": c.quantity_per_kit,
                }))
                .collect::<Vec<_>>()
        }),
    })
}

pub fn sync_report_to_json(report: &SyncReport) -> JsonValue {
    json!({
        "created": report
            .created
            .iter()
            .map(|v| json!({
                "variant_id": v.variant_id.to_string(),
                "signature": v.signature.canonical(),
                "name": v.name,
                "sku": v.sku,
            }))
            .collect::<Vec<_>>(),
        "reactivated": ids_to_json(&report.reactivated),
        "deactivated": ids_to_json(&report.deactivated),
        "blocked_deactivations": ids_to_json(&report.blocked_deactivations),
    })
}

fn ids_to_json(ids: &[VariantId]) -> Vec<JsonValue> {
    ids.iter().map(|id| json!(id.to_string())).collect()
}

pub fn stock_level_to_json(level: &StockLevel, variant: Option<&VariantView>) -> JsonValue {
    json!({
        "branch_id": level.branch_id.to_string(),
        "variant_id": level.variant_id.to_string(),
        "variant_name": variant.map(|v| v.name.clone()),
        "sku": variant.map(|v| v.sku.clone()),
        "on_hand": level.on_hand(),
        "reserved": level.reserved_serials,
        "lots": level
            .lots
            .iter()
            .map(|(batch, quantity)| json!({ "batch": batch, "quantity": quantity }))
            .collect::<Vec<_>>(),
    })
}

pub fn serial_to_json(view: &SerialView) -> JsonValue {
    json!({
        "serial": view.serial.as_str(),
        "variant_id": view.variant_id.to_string(),
        "branch_id": view.branch_id.to_string(),
        "status": view.status,
    })
}

pub fn movement_to_json(m: &MovementView) -> JsonValue {
    json!({
        "movement_id": m.movement_id.to_string(),
        "branch_id": m.branch_id.to_string(),
        "variant_id": m.variant_id.to_string(),
        "batch": m.batch,
        "quantity_change": m.quantity_change,
        "serials": m.serials.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "type": m.kind.as_str(),
        "reason": m.reason,
        "notes": m.notes,
        "reference": m.reference,
        "user_id": m.user_id.map(|u| u.to_string()),
        "occurred_at": m.occurred_at,
    })
}

pub fn line_to_json(line: &MovementLine) -> JsonValue {
    match &line.selection {
        StockSelection::Quantity { quantity, batch } => json!({
            "variant_id": line.variant_id.to_string(),
            "quantity": quantity,
            "batch": batch,
        }),
        StockSelection::Serials(serials) => json!({
            "variant_id": line.variant_id.to_string(),
            "serials": serials.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        }),
    }
}

pub fn transfer_to_json(transfer: &StockTransfer) -> JsonValue {
    json!({
        "transfer_id": transfer.id_typed().to_string(),
        "from_branch_id": transfer.from_branch_id().map(|b| b.to_string()),
        "to_branch_id": transfer.to_branch_id().map(|b| b.to_string()),
        "status": transfer.status(),
        "lines": transfer.lines().iter().map(line_to_json).collect::<Vec<_>>(),
    })
}
