use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use cmsync_core::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Renders as `{ "error": <message>, "code": <CODE> }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong Basic credentials; answers with a challenge.
    #[error("Authentication required")]
    AuthRequired,

    /// Webhook signature missing or invalid.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::Busy { .. } => (
                    StatusCode::CONFLICT,
                    "SYNC_IN_PROGRESS",
                    "Sync already in progress".to_owned(),
                ),
                CoreError::ModelNotFound { .. } | CoreError::JobNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", core.to_string())
                }
                CoreError::ValidationFailed { .. } => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", core.to_string())
                }
                CoreError::WorkerStopped => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    core.to_string(),
                ),
                CoreError::Source(_) | CoreError::Catalog(_) => {
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", core.to_string())
                }
                _ => {
                    tracing::error!(error = %core, "internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_owned(),
                    )
                }
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::AuthRequired => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
            ),
            AppError::InvalidSignature(msg) => {
                (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", msg.clone())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if matches!(self, AppError::AuthRequired) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"cmsync\""),
            );
        }
        response
    }
}
