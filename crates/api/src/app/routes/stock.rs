use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::json;
use uuid::Uuid;

use stockpile_infra::coordinators::ReceiptRequest;
use stockpile_infra::projections::Page;
use stockpile_ledger::{MovementLine, SerialNumber, StockSelection};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/stock/receipts", post(receive_stock))
        .route("/stock/adjustments", post(record_adjustment))
        .route("/stock/levels", get(stock_levels))
        .route("/stock/lot-quantity", get(lot_quantity))
        .route("/stock/available-serials", get(available_serials))
        .route("/stock/movements", get(movements))
        .route("/stock/serials/reserve", post(reserve_serials))
        .route("/stock/serials/release", post(release_serials))
}

pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::ReceiptRequestBody>,
) -> axum::response::Response {
    let lines = match dto::into_lines(body.lines) {
        Ok(lines) => lines,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };

    let request = ReceiptRequest {
        branch_id: body.branch_id,
        reference: body.reference,
        lines,
        notes: body.notes,
        operation_id: body.operation_id.unwrap_or_else(Uuid::now_v7),
        user_id: actor.user_id(),
    };

    match services.receive_stock(tenant.tenant_id(), request) {
        Ok(entries) => dto::json_ok(StatusCode::CREATED, json!({ "ledger_entries": entries })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn record_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::AdjustmentRequestBody>,
) -> axum::response::Response {
    let selection = match (body.quantity_change, body.serials) {
        (Some(quantity), None) => StockSelection::Quantity {
            quantity,
            batch: body.batch,
        },
        (None, Some(serials)) if !serials.is_empty() => {
            StockSelection::Serials(serials.into_iter().map(SerialNumber::new).collect())
        }
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "adjustment must carry either quantity_change or a non-empty serial list",
            );
        }
    };

    let result = services.record_adjustment(
        tenant.tenant_id(),
        body.branch_id,
        MovementLine {
            variant_id: body.variant_id,
            selection,
        },
        body.reason,
        body.notes,
        body.operation_id.unwrap_or_else(Uuid::now_v7),
        actor.user_id(),
    );

    match result {
        Ok(movement_ids) => dto::json_ok(
            StatusCode::CREATED,
            json!({
                "movement_ids": movement_ids.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
                "already_applied": movement_ids.is_empty(),
            }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn stock_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::LevelsQuery>,
) -> axum::response::Response {
    let page = Page::new(query.page, query.per_page);
    let search = query.search.as_deref().map(str::to_lowercase);

    let mut levels = services.stock_levels(tenant.tenant_id());
    levels.retain(|l| query.branch_id.map(|b| l.branch_id == b).unwrap_or(true));

    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(levels.len());
    for level in levels {
        let variant = services.variant(tenant.tenant_id(), level.variant_id);
        if let Some(term) = &search {
            let matches = variant
                .as_ref()
                .map(|v| {
                    v.name.to_lowercase().contains(term) || v.sku.to_lowercase().contains(term)
                })
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        rows.push(dto::stock_level_to_json(&level, variant.as_ref()));
    }
    rows.sort_by_key(|r| {
        (
            r["variant_id"].as_str().unwrap_or_default().to_string(),
            r["branch_id"].as_str().unwrap_or_default().to_string(),
        )
    });

    dto::json_ok(StatusCode::OK, json!({ "levels": page.slice(rows) }))
}

pub async fn lot_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::LotQuantityQuery>,
) -> axum::response::Response {
    let quantity = services.lot_quantity(
        tenant.tenant_id(),
        query.branch_id,
        query.variant_id,
        query.batch.as_deref(),
    );
    dto::json_ok(
        StatusCode::OK,
        json!({
            "variant_id": query.variant_id.to_string(),
            "branch_id": query.branch_id.to_string(),
            "batch": query.batch,
            "quantity": quantity,
        }),
    )
}

pub async fn available_serials(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::AvailableSerialsQuery>,
) -> axum::response::Response {
    let page = Page::new(query.page, query.per_page);
    let serials = services.available_serials(
        tenant.tenant_id(),
        query.variant_id,
        query.branch_id,
        query.search.as_deref(),
        page,
    );
    dto::json_ok(
        StatusCode::OK,
        json!({
            "serials": serials.iter().map(dto::serial_to_json).collect::<Vec<_>>(),
        }),
    )
}

pub async fn movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::MovementsQuery>,
) -> axum::response::Response {
    let page = Page::new(query.page, query.per_page);
    let rows = services.movement_history(
        tenant.tenant_id(),
        query.branch_id,
        query.variant_id,
        page,
    );
    dto::json_ok(
        StatusCode::OK,
        json!({
            "movements": rows.iter().map(dto::movement_to_json).collect::<Vec<_>>(),
        }),
    )
}

pub async fn reserve_serials(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::SerialActionBody>,
) -> axum::response::Response {
    let serials: Vec<SerialNumber> = body.serials.into_iter().map(SerialNumber::new).collect();
    match services.reserve_serials(
        tenant.tenant_id(),
        body.branch_id,
        body.variant_id,
        serials,
        body.operation_id.unwrap_or_else(Uuid::now_v7),
    ) {
        Ok(()) => dto::json_ok(StatusCode::OK, json!({ "reserved": true })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn release_serials(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::SerialActionBody>,
) -> axum::response::Response {
    let serials: Vec<SerialNumber> = body.serials.into_iter().map(SerialNumber::new).collect();
    match services.release_serials(
        tenant.tenant_id(),
        body.branch_id,
        body.variant_id,
        serials,
        body.operation_id.unwrap_or_else(Uuid::now_v7),
    ) {
        Ok(()) => dto::json_ok(StatusCode::OK, json!({ "released": true })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
