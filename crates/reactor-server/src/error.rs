//! Maps `ReactorError`'s kind taxonomy onto HTTP status codes (§7) for every
//! handler in this crate.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reactor_core::{ErrorKind, ReactorError};
use serde_json::json;

/// §5 "If the queue is full -> 503 with Retry-After, rare by design": the
/// queue is sized so this should essentially never trigger, so a fixed
/// short hint is enough rather than a computed one.
const QUEUE_RETRY_AFTER_SECS: &str = "5";

pub struct ApiError(pub ReactorError);

impl From<ReactorError> for ApiError {
    fn from(err: ReactorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::PolicyRejection => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::QueueSaturated => StatusCode::SERVICE_UNAVAILABLE,
        };
        let mut response = (status, Json(json!({"error": self.0.to_string()}))).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(QUEUE_RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_becomes_503_with_retry_after() {
        let response = ApiError(ReactorError::QueueFull).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), QUEUE_RETRY_AFTER_SECS);
    }
}
