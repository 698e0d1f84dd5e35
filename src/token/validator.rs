use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::{codec, now_ms, InvalidReason, TokenError, TokenPayload, ISSUER};
use crate::keys::KeyProvider;
use crate::telemetry::mask_id;

/// Identity claims as handed back to the receiving application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenUser {
    pub id: String,
    pub profile_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub target_app: String,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedToken {
    pub valid: bool,
    pub user: TokenUser,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub expires_at: i64,
}

impl From<TokenPayload> for ValidatedToken {
    fn from(p: TokenPayload) -> Self {
        Self {
            valid: true,
            user: TokenUser {
                id: p.user_id,
                profile_id: p.profile_id,
                email: p.email,
                full_name: p.full_name,
                role: p.role,
                target_app: p.target_app,
                permissions: p.permissions,
            },
            metadata: p.metadata,
            expires_at: p.expires_at,
        }
    }
}

/// Checks signature, expiry and required permissions, in that order.
///
/// Permissions are read from the token only; live user state is never
/// consulted here.
pub struct TokenValidator {
    keys: Arc<dyn KeyProvider>,
}

impl TokenValidator {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn validate(
        &self,
        token: &str,
        required_permissions: &[String],
    ) -> Result<ValidatedToken, TokenError> {
        self.validate_at(token, required_permissions, now_ms())
    }

    /// Validate with an explicit clock reading (Unix ms).
    pub fn validate_at(
        &self,
        token: &str,
        required_permissions: &[String],
        now: i64,
    ) -> Result<ValidatedToken, TokenError> {
        let payload = self.verify(token)?;

        if payload.is_expired_at(now) {
            tracing::info!(
                user = %mask_id(&payload.user_id),
                target_app = %payload.target_app,
                expired_at = payload.expires_at,
                "sso token expired"
            );
            return Err(TokenError::Expired {
                expires_at: payload.expires_at,
            });
        }

        let missing: Vec<&String> = required_permissions
            .iter()
            .filter(|p| !payload.permissions.contains(p.as_str()))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                user = %mask_id(&payload.user_id),
                target_app = %payload.target_app,
                missing = ?missing,
                "sso token lacks required permissions"
            );
            return Err(TokenError::InsufficientPermissions {
                required: required_permissions.to_vec(),
                actual: payload.permissions.iter().cloned().collect(),
            });
        }

        tracing::debug!(
            user = %mask_id(&payload.user_id),
            target_app = %payload.target_app,
            "sso token validated"
        );
        Ok(payload.into())
    }

    fn verify(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let payload = codec::decode(token.trim(), &self.keys.signing_key())
            .and_then(|p| {
                if p.issuer != ISSUER {
                    Err(InvalidReason::ForeignIssuer)
                } else if p.expires_at <= p.issued_at {
                    Err(InvalidReason::Claims)
                } else {
                    Ok(p)
                }
            })
            .map_err(|reason| {
                tracing::warn!(reason = %reason, len = token.len(), "sso token rejected");
                TokenError::Invalid(reason)
            })?;
        Ok(payload)
    }
}
