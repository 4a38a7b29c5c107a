use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{Json, Router, extract::Extension, http::StatusCode, routing::post};
use serde_json::json;
use uuid::Uuid;

use stockpile_infra::coordinators::AssemblyRequest;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new().route("/assemblies", post(execute_assembly))
}

pub async fn execute_assembly(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::AssemblyBody>,
) -> axum::response::Response {
    let mut component_selections = BTreeMap::new();
    for line in body.component_selections {
        let line = match line.into_line() {
            Ok(line) => line,
            Err(msg) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg);
            }
        };
        if component_selections
            .insert(line.variant_id, line.selection)
            .is_some()
        {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "duplicate component selection",
            );
        }
    }

    let request = AssemblyRequest {
        branch_id: body.branch_id,
        bundle_variant_id: body.bundle_variant_id,
        quantity_to_assemble: body.quantity_to_assemble,
        component_selections,
        output_batch: body.output_batch,
        operation_id: body.operation_id.unwrap_or_else(Uuid::now_v7),
        user_id: actor.user_id(),
    };

    match services.execute_assembly(tenant.tenant_id(), request) {
        Ok(receipt) => dto::json_ok(
            StatusCode::CREATED,
            json!({
                "assembly_id": receipt.assembly_id.to_string(),
                "bundle_variant_id": receipt.bundle_variant_id.to_string(),
                "quantity_produced": receipt.quantity_produced,
                "ledger_entries": receipt.ledger_entries,
            }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
