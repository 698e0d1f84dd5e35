use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{DirectoryError, UserDirectory, UserRecord};

/// User directory backed by the `profiles` table of the main application.
///
/// The schema is owned by that application; this side only reads. Columns are
/// cast to text so uuid-typed ids decode into plain strings.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let row = sqlx::query_as::<_, UserRecord>(
            r#"SELECT user_id::text AS user_id,
                      id::text AS profile_id,
                      COALESCE(email, '') AS email,
                      full_name,
                      COALESCE(role, 'user') AS role
               FROM profiles
               WHERE user_id::text = $1
               LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
