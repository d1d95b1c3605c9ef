//! # API Error Taxonomy
//!
//! Every handler and domain operation returns [`ApiError`]. Storage and gateway
//! internals keep returning `anyhow::Result`; anything that reaches the boundary
//! unclassified becomes [`ApiError::Internal`] and is rendered as a generic
//! "Internal server error" so internals never leak to clients.
//!
//! | Variant | Status | Retry? |
//! |---------|--------|--------|
//! | `Validation` | 400 | no |
//! | `Conflict` | 400 | no, prompt the user |
//! | `Rejected` | 400 | no, proof missing |
//! | `Forbidden` | 403 | no |
//! | `NotFound` | 404 | no |
//! | `External` | 502 | yes |
//! | `Internal` | 500 | yes |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input, out-of-range ids.
    #[error("{0}")]
    Validation(String),

    /// Username/subname taken, ticket already used, task already claimed.
    #[error("{0}")]
    Conflict(String),

    /// An external proof check ran and returned "no".
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A verifier or chain write could not be completed.
    #[error("{0}")]
    External(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        ApiError::Rejected(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::Rejected(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::External(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Conflict(_) => "conflict",
            ApiError::Rejected(_) => "rejected",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::External(_) => "external",
            ApiError::Internal(_) => "internal",
        }
    }

    /// Message safe to show the end user.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref e) = self {
            error!(error = %e, "internal error");
        }
        let status = self.status();
        (
            status,
            Json(serde_json::json!({ "message": self.public_message() })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}
