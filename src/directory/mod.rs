pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryDirectory;
pub use postgres::PgDirectory;

/// Identity attributes of a user, as held by the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub user_id: String,
    pub profile_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
}

/// Lookup failed for reasons unrelated to the user existing. Safe to retry.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves user ids to identity attributes. Consulted only at issuance.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` means the user does not exist.
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>, DirectoryError>;
}
