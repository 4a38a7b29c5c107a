use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::json;
use uuid::Uuid;

use stockpile_core::AggregateId;
use stockpile_transfers::TransferId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/stock/transfers", post(create_transfer))
        .route("/stock/transfers/:id", get(get_transfer))
        .route("/stock/transfers/:id/dispatch", post(dispatch_transfer))
        .route("/stock/transfers/:id/receive", post(receive_transfer))
        .route("/stock/transfers/:id/cancel", post(cancel_transfer))
}

fn parse_transfer_id(id: &str) -> Result<TransferId, axum::response::Response> {
    id.parse::<AggregateId>().map(TransferId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid transfer id")
    })
}

pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateTransferBody>,
) -> axum::response::Response {
    let lines = match dto::into_lines(body.lines) {
        Ok(lines) => lines,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };

    match services.create_transfer(
        tenant.tenant_id(),
        body.from_branch_id,
        body.to_branch_id,
        lines,
    ) {
        Ok(transfer_id) => dto::json_ok(
            StatusCode::CREATED,
            json!({ "transfer_id": transfer_id.to_string(), "status": "pending" }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfer(tenant.tenant_id(), transfer_id) {
        Ok(transfer) => dto::json_ok(StatusCode::OK, dto::transfer_to_json(&transfer)),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn dispatch_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::OperationBody>>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let operation_id = body
        .and_then(|b| b.0.operation_id)
        .unwrap_or_else(Uuid::now_v7);

    match services.dispatch_transfer(tenant.tenant_id(), transfer_id, operation_id, actor.user_id())
    {
        Ok(status) => dto::json_ok(
            StatusCode::OK,
            json!({ "transfer_id": transfer_id.to_string(), "status": status }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn receive_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::OperationBody>>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let operation_id = body
        .and_then(|b| b.0.operation_id)
        .unwrap_or_else(Uuid::now_v7);

    match services.receive_transfer(tenant.tenant_id(), transfer_id, operation_id, actor.user_id())
    {
        Ok(status) => dto::json_ok(
            StatusCode::OK,
            json!({ "transfer_id": transfer_id.to_string(), "status": status }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn cancel_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.cancel_transfer(tenant.tenant_id(), transfer_id) {
        Ok(status) => dto::json_ok(
            StatusCode::OK,
            json!({ "transfer_id": transfer_id.to_string(), "status": status }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
