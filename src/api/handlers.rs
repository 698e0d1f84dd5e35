use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::token::{IssueRequest, IssuedToken, PublicUser, ValidatedToken};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub user_id: String,
    pub target_app: String,
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: i64,
    pub user: PublicUser,
}

impl From<IssuedToken> for GenerateResponse {
    fn from(t: IssuedToken) -> Self {
        Self {
            success: true,
            token: t.token,
            expires_at: t.expires_at,
            user: t.user,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: ValidatedToken,
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(v)| v).map_err(|e| {
        tracing::debug!(error = %e, "rejected request body");
        AppError::BadRequest(format!("invalid request body: {}", e.body_text()))
    })
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /sso/generate: mint a token for an authenticated user.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let req = parse_body(payload)?;

    let issued = state
        .issuer
        .issue(IssueRequest {
            user_id: req.user_id,
            target_app: req.target_app,
            expires_in: req.expires_in,
            permissions: req.permissions,
            metadata: req.metadata,
        })
        .await?;

    Ok(Json(issued.into()))
}

/// POST /sso/validate: verify a token presented to a trusted application.
pub async fn validate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, AppError> {
    let req = parse_body(payload)?;

    // An empty token is malformed like any other and gets the same 401.
    let result = state
        .validator
        .validate(&req.token, &req.required_permissions)?;

    Ok(Json(ValidateResponse {
        success: true,
        result,
    }))
}
