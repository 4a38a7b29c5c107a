use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockpile_infra::command_dispatcher::DispatchError;

/// Map a dispatch error to the uniform `{success: false, error}` envelope.
///
/// Validation problems are 400, missing resources 404, conflicts and
/// insufficient stock 409, illegal state transitions 422. Infrastructure
/// failures are logged and surfaced as opaque 5xx.
pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::InsufficientStock(msg) => {
            json_error(StatusCode::CONFLICT, "insufficient_stock", msg)
        }
        DispatchError::State(msg) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "state_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::TenantIsolation(msg) => {
            tracing::error!(error = %msg, "tenant isolation violation");
            json_error(StatusCode::FORBIDDEN, "tenant_isolation", "forbidden")
        }
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "event deserialization failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
        DispatchError::Store(e) => {
            tracing::error!(error = ?e, "event store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
        DispatchError::Publish(msg) => {
            tracing::error!(error = %msg, "event publication failed");
            json_error(StatusCode::BAD_GATEWAY, "publish_error", "publication failed")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    kind: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": {
                "kind": kind,
                "message": message.into(),
            },
        })),
    )
        .into_response()
}
