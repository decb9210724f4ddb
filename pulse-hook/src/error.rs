//! Error types for pulse-hook
//!
//! Every handler error renders as `{"success": false, "error": {"code", "message"}}`.
//! Messages are short reasons; secrets and I/O detail stay in the logs.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pulse_common::events::NormalizeError;
use pulse_common::provider::ProviderError;
use pulse_common::signature::SignatureError;
use pulse_common::store::StoreError;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid signature (401)
    #[error("{0}")]
    Authentication(#[from] SignatureError),

    /// Malformed JSON, missing subject id or required field (400)
    #[error("{0}")]
    Validation(String),

    /// Body over the configured limit (413)
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Invalid admin request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Aggregate store read/write failure (500)
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Upstream provider not configured (503)
    #[error("Provider API is not configured")]
    ProviderUnavailable,

    /// Upstream provider call failed (502)
    #[error("Provider request failed: {0}")]
    Provider(#[from] ProviderError),

    /// pulse-common error
    #[error("Common error: {0}")]
    Common(#[from] pulse_common::Error),
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

/// Unparseable admin bodies, wrong field types and non-JSON content types
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(_) | ApiError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Authentication(_) => "UNAUTHORIZED",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ApiError::Provider(_) => "PROVIDER_ERROR",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }

    /// Client-facing message
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Storage(_) => "Failed to persist aggregate".to_string(),
            ApiError::Common(_) => "Internal server error".to_string(),
            ApiError::Provider(ProviderError::Status { status, .. }) => {
                format!("Provider returned HTTP {}", status)
            }
            ApiError::Provider(_) => "Provider request failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
