use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::{codec, now_ms, PublicUser, TokenPayload, DEFAULT_TTL_SECS, ISSUER};
use crate::directory::{DirectoryError, UserDirectory};
use crate::keys::KeyProvider;
use crate::telemetry::mask_id;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything needed to mint a token for one user and one target app.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub user_id: String,
    pub target_app: String,
    /// Seconds. `None` means `DEFAULT_TTL_SECS`.
    pub expires_in: Option<i64>,
    pub permissions: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IssueRequest {
    pub fn new(user_id: impl Into<String>, target_app: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            target_app: target_app.into(),
            ..Default::default()
        }
    }

    pub fn expires_in(mut self, secs: i64) -> Self {
        self.expires_in = Some(secs);
        self
    }

    pub fn permissions<I, S>(mut self, perms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
    pub user: PublicUser,
}

/// Mints signed tokens for users known to the directory.
pub struct TokenIssuer {
    keys: Arc<dyn KeyProvider>,
    directory: Arc<dyn UserDirectory>,
    max_ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(
        keys: Arc<dyn KeyProvider>,
        directory: Arc<dyn UserDirectory>,
        max_ttl_secs: u64,
    ) -> Self {
        Self {
            keys,
            directory,
            max_ttl_secs: i64::try_from(max_ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub async fn issue(&self, req: IssueRequest) -> Result<IssuedToken, IssueError> {
        self.issue_at(req, now_ms()).await
    }

    /// Issue with an explicit clock reading (Unix ms).
    pub async fn issue_at(&self, req: IssueRequest, now: i64) -> Result<IssuedToken, IssueError> {
        let ttl_secs = self.check_request(&req)?;

        let user = match self.directory.find_user(&req.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::info!(user = %mask_id(&req.user_id), "sso issue: user not found");
                return Err(IssueError::UserNotFound);
            }
            Err(e) => {
                tracing::error!(user = %mask_id(&req.user_id), error = %e, "sso issue: directory lookup failed");
                return Err(e.into());
            }
        };

        let payload = TokenPayload {
            user_id: user.user_id.clone(),
            profile_id: user.profile_id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role.clone(),
            target_app: req.target_app,
            permissions: req.permissions.into_iter().collect::<BTreeSet<_>>(),
            metadata: req.metadata,
            issued_at: now,
            expires_at: now.saturating_add(ttl_secs.saturating_mul(1000)),
            issuer: ISSUER.to_string(),
        };

        let token = codec::encode(&payload, &self.keys.signing_key())?;

        tracing::info!(
            user = %mask_id(&payload.user_id),
            target_app = %payload.target_app,
            permissions = payload.permissions.len(),
            ttl_secs,
            "sso token issued"
        );

        Ok(IssuedToken {
            token,
            expires_at: payload.expires_at,
            user: PublicUser {
                id: user.user_id,
                email: user.email,
                full_name: user.full_name,
                role: user.role,
            },
        })
    }

    fn check_request(&self, req: &IssueRequest) -> Result<i64, IssueError> {
        if req.user_id.trim().is_empty() || req.target_app.trim().is_empty() {
            return Err(IssueError::InvalidRequest(
                "user_id and target_app are required".into(),
            ));
        }
        let ttl = req.expires_in.unwrap_or(DEFAULT_TTL_SECS);
        if ttl <= 0 {
            return Err(IssueError::InvalidRequest(
                "expires_in must be a positive number of seconds".into(),
            ));
        }
        if ttl > self.max_ttl_secs {
            return Err(IssueError::InvalidRequest(format!(
                "expires_in must not exceed {} seconds",
                self.max_ttl_secs
            )));
        }
        Ok(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, UserRecord};
    use crate::keys::StaticKeyProvider;
    use async_trait::async_trait;

    struct DownDirectory;

    #[async_trait]
    impl UserDirectory for DownDirectory {
        async fn find_user(&self, _: &str) -> Result<Option<UserRecord>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".into()))
        }
    }

    fn issuer_with(directory: Arc<dyn UserDirectory>) -> TokenIssuer {
        let keys = Arc::new(StaticKeyProvider::new("test-secret").unwrap());
        TokenIssuer::new(keys, directory, 3600)
    }

    fn issuer() -> TokenIssuer {
        issuer_with(Arc::new(InMemoryDirectory::new([UserRecord {
            user_id: "user-0001-abcd".into(),
            profile_id: "profile-1".into(),
            email: "ada@example.com".into(),
            full_name: Some("Ada Lovelace".into()),
            role: "admin".into(),
        }])))
    }

    #[tokio::test]
    async fn test_issue_sets_expiry_and_public_user() {
        let issued = issuer()
            .issue_at(IssueRequest::new("user-0001-abcd", "crm").expires_in(60), 1_000_000)
            .await
            .unwrap();
        assert_eq!(issued.expires_at, 1_000_000 + 60_000);
        assert_eq!(issued.user.id, "user-0001-abcd");
        assert_eq!(issued.user.email, "ada@example.com");
        assert_eq!(issued.user.role, "admin");
        assert!(!issued.token.is_empty());
    }

    #[tokio::test]
    async fn test_default_ttl() {
        let issued = issuer()
            .issue_at(IssueRequest::new("user-0001-abcd", "crm"), 0)
            .await
            .unwrap();
        assert_eq!(issued.expires_at, DEFAULT_TTL_SECS * 1000);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let err = issuer()
            .issue(IssueRequest::new("ghost", "crm"))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::UserNotFound));
    }

    #[tokio::test]
    async fn test_rejects_bad_ttl() {
        for ttl in [0, -5, 3601] {
            let err = issuer()
                .issue(IssueRequest::new("user-0001-abcd", "crm").expires_in(ttl))
                .await
                .unwrap_err();
            assert!(matches!(err, IssueError::InvalidRequest(_)), "ttl {}", ttl);
        }
    }

    #[tokio::test]
    async fn test_rejects_missing_fields() {
        let err = issuer()
            .issue(IssueRequest::new("", "crm"))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::InvalidRequest(_)));
        let err = issuer()
            .issue(IssueRequest::new("user-0001-abcd", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_directory_failure_is_transient() {
        let err = issuer_with(Arc::new(DownDirectory))
            .issue(IssueRequest::new("user-0001-abcd", "crm"))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::Directory(_)));
    }
}
