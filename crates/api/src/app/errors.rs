use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tileerp_infra::command_dispatcher::DispatchError;
use tileerp_infra::fulfillment::FulfillmentError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "concurrent_modification", msg),
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        DispatchError::Publish(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "publish_error", msg),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
    }
}

/// A reverted operation answers like the step that failed. Stock and order
/// left out of step need an operator, so those are server errors.
pub fn fulfillment_error_to_response(err: FulfillmentError) -> axum::response::Response {
    match err {
        FulfillmentError::Dispatch(e) | FulfillmentError::Reverted { cause: e, .. } => dispatch_error_to_response(e),
        err @ FulfillmentError::CompensationFailed { .. } => {
            tracing::error!(error = %err, "fulfilment compensation failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "compensation_failed", err.to_string())
        }
        err @ FulfillmentError::Incomplete { .. } => {
            tracing::error!(error = %err, "fulfilment left incomplete");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "partially_applied", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
