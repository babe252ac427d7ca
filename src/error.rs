use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Crate-wide error taxonomy (spec §7). Internal plumbing returns
/// `anyhow::Result`; this is the boundary type the API surface converts to.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid credentials")]
    AuthInvalid,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Upstream LLM/target provider exhausted its retry budget.
    #[error("upstream rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("upstream failed: {0}")]
    UpstreamFailed(String),

    #[error("bad ciphertext")]
    BadCiphertext,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<redb::Error> for AppError {
    fn from(err: redb::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::AuthRequired => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::AuthInvalid => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::RateLimitExceeded(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::UpstreamFailed(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            AppError::BadCiphertext => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };

        let mut response = Json(json!({
            "success": false,
            "message": message,
        }))
        .into_response();

        if let AppError::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        *response.status_mut() = status;
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;
