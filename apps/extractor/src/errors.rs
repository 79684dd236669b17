use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::extraction::parser::ExtractionFailure;
use crate::extraction::state_machine::FailureCode;
use crate::feedback::repository::FeedbackError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// HTTP status and error code for an extraction failure.
pub fn extraction_status(code: FailureCode) -> (StatusCode, &'static str) {
    match code {
        FailureCode::Disabled => (StatusCode::SERVICE_UNAVAILABLE, "EXTRACTION_DISABLED"),
        FailureCode::Unconfigured => (StatusCode::SERVICE_UNAVAILABLE, "LLM_UNCONFIGURED"),
        FailureCode::ValidationFailed => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED"),
        FailureCode::AuthFailed => (StatusCode::BAD_GATEWAY, "LLM_AUTH_FAILED"),
        FailureCode::Timeout => (StatusCode::GATEWAY_TIMEOUT, "LLM_TIMEOUT"),
        FailureCode::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "LLM_RATE_LIMITED"),
        FailureCode::Generic => (StatusCode::BAD_GATEWAY, "EXTRACTION_FAILED"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Extraction(failure) => {
                let (status, code) = extraction_status(failure.code);
                if status.is_server_error() {
                    tracing::error!("Extraction failed: {failure}");
                }
                let body = Json(json!({
                    "error": {
                        "code": code,
                        "message": failure.message,
                        "latencyMs": failure.latency_ms,
                        "retryCount": failure.retry_count,
                        "validationErrors": failure.validation_errors,
                    }
                }));
                return (status, body).into_response();
            }
            AppError::Feedback(FeedbackError::Invalid(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Feedback(FeedbackError::Database(e)) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes_map_to_statuses() {
        assert_eq!(extraction_status(FailureCode::Disabled).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(extraction_status(FailureCode::Unconfigured).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            extraction_status(FailureCode::ValidationFailed).0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(extraction_status(FailureCode::AuthFailed).0, StatusCode::BAD_GATEWAY);
        assert_eq!(extraction_status(FailureCode::Timeout).0, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(extraction_status(FailureCode::RateLimited).0, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(extraction_status(FailureCode::Generic).0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_invalid_feedback_is_bad_request() {
        let response = AppError::from(FeedbackError::Invalid("tenant must not be empty".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_extraction_failure_response_status() {
        let response = AppError::from(ExtractionFailure {
            code: FailureCode::Timeout,
            message: "LLM call timed out".into(),
            latency_ms: 12,
            retry_count: 2,
            validation_errors: vec![],
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
