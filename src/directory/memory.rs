use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use super::{DirectoryError, UserDirectory, UserRecord};

/// Directory held entirely in memory, keyed by `user_id`.
///
/// Loaded from a JSON array of user records for small deployments, or built
/// in code for tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    users: HashMap<String, UserRecord>,
}

impl InMemoryDirectory {
    pub fn new(users: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.user_id.clone(), u))
                .collect(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read user directory {}", path.display()))?;
        let users: Vec<UserRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid user directory JSON in {}", path.display()))?;
        Ok(Self::new(users))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ada() -> UserRecord {
        UserRecord {
            user_id: "u-1".into(),
            profile_id: "p-1".into(),
            email: "ada@example.com".into(),
            full_name: Some("Ada".into()),
            role: "admin".into(),
        }
    }

    #[test]
    fn test_lookup() {
        let dir = InMemoryDirectory::new([ada()]);
        let found = tokio_test::block_on(dir.find_user("u-1")).unwrap();
        assert_eq!(found, Some(ada()));
        let missing = tokio_test::block_on(dir.find_user("u-2")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"user_id":"u-1","profile_id":"p-1","email":"ada@example.com","full_name":"Ada","role":"admin"}},
               {{"user_id":"u-2","profile_id":"p-2","email":"bob@example.com","full_name":null,"role":"user"}}]"#
        )
        .unwrap();

        let dir = InMemoryDirectory::from_json_file(file.path()).unwrap();
        assert_eq!(dir.len(), 2);
        let bob = tokio_test::block_on(dir.find_user("u-2")).unwrap().unwrap();
        assert_eq!(bob.full_name, None);
    }

    #[test]
    fn test_from_json_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(InMemoryDirectory::from_json_file(file.path()).is_err());
    }
}
