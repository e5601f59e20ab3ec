//! HTTP error envelope shared by every medgate endpoint.
//!
//! Failures leave the server as `{"error": <category>, "message": <detail>}`
//! with an optional `details` object. [`ApiError`] is the one place where an
//! error kind becomes a status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use medgate_core::{CoreError, ErrorCategory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire shape of an error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// High-level API errors mapped to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400. `error` is a short code such as `invalid` or `invalid id`.
    #[error("Bad request ({error}): {message}")]
    BadRequest {
        error: &'static str,
        message: String,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    /// 408, an upstream deadline elapsed.
    #[error("Request timeout: {0}")]
    Timeout(String),
    /// 500 for storage, upstream and internal failures.
    #[error("Internal server error ({category}): {message}")]
    Internal {
        category: &'static str,
        message: String,
        details: Option<Value>,
    },
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest {
            error: "invalid",
            message: msg.into(),
        }
    }

    /// Local ids that are not non-negative integers.
    pub fn invalid_id(raw: &str) -> Self {
        Self::BadRequest {
            error: "invalid id",
            message: format!("'{raw}' is not a valid patient id"),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            category: "internal",
            message: msg.into(),
            details: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        match self {
            ApiError::BadRequest { error, message } => ErrorBody {
                error: (*error).to_string(),
                message: message.clone(),
                details: None,
            },
            ApiError::NotFound(message) => ErrorBody {
                error: ErrorCategory::NotFound.to_string(),
                message: message.clone(),
                details: None,
            },
            ApiError::Timeout(message) => ErrorBody {
                error: ErrorCategory::Timeout.to_string(),
                message: message.clone(),
                details: None,
            },
            ApiError::Internal {
                category,
                message,
                details,
            } => ErrorBody {
                error: (*category).to_string(),
                message: message.clone(),
                details: details.clone(),
            },
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Invalid { .. } => Self::bad_request(message),
            CoreError::NotFound { .. } => Self::NotFound(message),
            CoreError::Timeout { .. } => Self::Timeout(message),
            CoreError::Upstream { status, body } => Self::Internal {
                category: "upstream",
                message,
                details: Some(serde_json::json!({
                    "upstream_status": status,
                    "upstream_body": body,
                })),
            },
            CoreError::MalformedResponse { .. } => Self::Internal {
                category: "invalid",
                message,
                details: None,
            },
            CoreError::UpstreamUnavailable { .. } => Self::Internal {
                category: "upstream",
                message,
                details: None,
            },
            CoreError::Storage { .. } => Self::Internal {
                category: "storage",
                message,
                details: None,
            },
            CoreError::Internal { .. } => Self::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(self.to_body())).into_response()
    }
}
