use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::json;

use stockpile_catalog::{TemplateId, VariantId};
use stockpile_core::AggregateId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/templates", post(create_template))
        .route("/templates/:id/sync-variants", post(sync_variants))
        .route("/templates/:id/attributes/values", post(add_attribute_value))
        .route("/templates/:id/bundle-recipe", post(set_bundle_recipe))
        .route("/templates/:id/variants", get(template_variants))
        .route("/variants/:id/deactivate", post(deactivate_variant))
}

fn parse_template_id(id: &str) -> Result<TemplateId, axum::response::Response> {
    id.parse::<AggregateId>().map(TemplateId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid template id")
    })
}

pub async fn create_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateTemplateRequest>,
) -> axum::response::Response {
    match services.create_template(
        tenant.tenant_id(),
        body.name,
        body.base_sku,
        body.tracking,
        body.attributes,
    ) {
        Ok(template_id) => dto::json_ok(
            StatusCode::CREATED,
            json!({ "template_id": template_id.to_string() }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn sync_variants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SyncVariantsRequest>,
) -> axum::response::Response {
    let template_id = match parse_template_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.synchronize_variants(tenant.tenant_id(), template_id, body.attribute_selections)
    {
        Ok(report) => dto::json_ok(StatusCode::OK, dto::sync_report_to_json(&report)),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn add_attribute_value(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddAttributeValueRequest>,
) -> axum::response::Response {
    let template_id = match parse_template_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.add_attribute_value(tenant.tenant_id(), template_id, body.attribute, body.value)
    {
        Ok(()) => dto::json_ok(StatusCode::OK, json!({ "template_id": template_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn set_bundle_recipe(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::BundleRecipeRequest>,
) -> axum::response::Response {
    let template_id = match parse_template_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.set_bundle_recipe(
        tenant.tenant_id(),
        template_id,
        body.bundle_variant_id,
        body.components,
    ) {
        Ok(()) => dto::json_ok(
            StatusCode::OK,
            json!({ "bundle_variant_id": body.bundle_variant_id.to_string() }),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn template_variants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let template_id = match parse_template_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if services.template(tenant.tenant_id(), template_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "template not found");
    }

    let variants = services.template_variants(tenant.tenant_id(), template_id);
    dto::json_ok(
        StatusCode::OK,
        json!({
            "variants": variants.iter().map(dto::variant_to_json).collect::<Vec<_>>(),
        }),
    )
}

pub async fn deactivate_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let variant_id: VariantId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid variant id");
        }
    };

    match services.deactivate_variant(tenant.tenant_id(), variant_id) {
        Ok(()) => dto::json_ok(StatusCode::OK, json!({ "variant_id": variant_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
