//! Signed SSO tokens: the claim set, its wire codec, and the issue/validate
//! services built on top of it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod codec;
pub mod issuer;
pub mod validator;

pub use issuer::{IssueError, IssueRequest, IssuedToken, TokenIssuer};
pub use validator::{TokenUser, TokenValidator, ValidatedToken};

/// Value of the `issuer` claim on every token minted by this service.
pub const ISSUER: &str = "sso-gateway";

/// TTL applied when the caller does not pass `expires_in`.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// The signed claim set. Timestamps are Unix epoch milliseconds.
///
/// Field order here is the serialization order and therefore part of the
/// signed encoding. `permissions` is a sorted set and `metadata` a sorted
/// map, so the same claims always produce the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub user_id: String,
    pub profile_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub target_app: String,
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub issuer: String,
}

impl TokenPayload {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}

/// Redacted view of a user returned to the caller at issuance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
}

/// Why a token failed the signature/structure stage. Only ever logged;
/// every variant surfaces to the caller as the same "invalid token" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Wrong number of segments, empty segment, or oversized input.
    Malformed,
    /// A segment is not valid unpadded base64url.
    Encoding,
    /// HMAC does not match: tampered payload or a different secret.
    SignatureMismatch,
    /// Signature is good but the claims do not decode or violate invariants.
    Claims,
    /// Signed by someone sharing our key but claiming another issuer.
    ForeignIssuer,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvalidReason::Malformed => "malformed",
            InvalidReason::Encoding => "bad_encoding",
            InvalidReason::SignatureMismatch => "signature_mismatch",
            InvalidReason::Claims => "bad_claims",
            InvalidReason::ForeignIssuer => "foreign_issuer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(InvalidReason),

    #[error("token expired at {expires_at}")]
    Expired { expires_at: i64 },

    #[error("insufficient permissions")]
    InsufficientPermissions {
        required: Vec<String>,
        actual: Vec<String>,
    },
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
