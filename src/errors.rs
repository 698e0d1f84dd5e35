use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::directory::DirectoryError;
use crate::token::{InvalidReason, IssueError, TokenError};

/// Client-visible message for every signature/structure failure. Tampered,
/// malformed and wrong-secret tokens all read the same from outside.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or tampered token";
pub const EXPIRED_TOKEN_MESSAGE: &str = "Token has expired";

/// Everything the HTTP layer can answer with. Converted to
/// `{ "success": false, "error": ... }` at the boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("user not found")]
    UserNotFound,

    #[error("invalid token ({0})")]
    InvalidToken(InvalidReason),

    #[error("token expired")]
    TokenExpired,

    #[error("insufficient permissions")]
    InsufficientPermissions {
        required: Vec<String>,
        actual: Vec<String>,
    },

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("directory error: {0}")]
    Transient(#[from] DirectoryError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid(reason) => AppError::InvalidToken(reason),
            TokenError::Expired { .. } => AppError::TokenExpired,
            TokenError::InsufficientPermissions { required, actual } => {
                AppError::InsufficientPermissions { required, actual }
            }
        }
    }
}

impl From<IssueError> for AppError {
    fn from(e: IssueError) -> Self {
        match e {
            IssueError::InvalidRequest(msg) => AppError::BadRequest(msg),
            IssueError::UserNotFound => AppError::UserNotFound,
            IssueError::Directory(e) => AppError::Transient(e),
            IssueError::Encode(e) => AppError::Internal(e.into()),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::InvalidToken(_) | AppError::TokenExpired => StatusCode::UNAUTHORIZED,
            AppError::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Transient(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::BadRequest(msg) => json!({ "success": false, "error": msg }),
            AppError::UserNotFound => json!({ "success": false, "error": "User not found" }),
            AppError::InvalidToken(_) => {
                json!({ "success": false, "error": INVALID_TOKEN_MESSAGE })
            }
            AppError::TokenExpired => json!({ "success": false, "error": EXPIRED_TOKEN_MESSAGE }),
            AppError::InsufficientPermissions { required, actual } => json!({
                "success": false,
                "error": "Insufficient permissions",
                "required": required,
                "user_permissions": actual,
            }),
            AppError::RateLimitExceeded { .. } => {
                json!({ "success": false, "error": "Rate limit exceeded" })
            }
            AppError::Transient(e) => {
                tracing::error!("Directory error: {}", e);
                json!({ "success": false, "error": "Internal server error" })
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                json!({ "success": false, "error": "Internal server error" })
            }
        };

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", v);
            }
        }

        response
    }
}
