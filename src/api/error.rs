//! Domain errors as HTTP responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::engine::EngineError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::Engine(EngineError::Queue(e))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid"),
            ApiError::Engine(EngineError::Busy) => (StatusCode::CONFLICT, "busy"),
            ApiError::Engine(EngineError::Queue(q)) => match q {
                QueueError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid"),
                QueueError::ExceedsCapacity { .. } => (StatusCode::BAD_REQUEST, "exceeds_capacity"),
                QueueError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                QueueError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                QueueError::NotQueued { .. } => (StatusCode::CONFLICT, "not_queued"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(%code, error = %self, "request refused");
        }
        let body = json!({
            "data": null,
            "error": { "code": code, "message": self.to_string() },
            "meta": { "timestamp": chrono::Utc::now().to_rfc3339() }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Engine(EngineError::Busy), StatusCode::CONFLICT),
            (QueueError::Duplicate("A".into()).into(), StatusCode::CONFLICT),
            (QueueError::NotFound("A".into()).into(), StatusCode::NOT_FOUND),
            (
                QueueError::ExceedsCapacity {
                    task_id: "A".into(),
                    required_gb: 500.0,
                    capacity_gb: 192.0,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
