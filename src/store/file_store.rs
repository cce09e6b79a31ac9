use std::path::PathBuf;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CredentialStore;
use crate::models::StoredSession;

/// The config struct for the plain-file backend.
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory where per-group records are written as `<group>.json`.
    pub directory: PathBuf,
}

/// A `CredentialStore` that writes plain JSON records to disk. Intended for
/// headless Linux hosts where no secret service is running; the records are
/// chmod 0600 but otherwise unprotected.
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(config: &FileStoreConfig) -> Self {
        Self {
            directory: config.directory.clone(),
        }
    }

    fn record_path(&self, group: &str) -> PathBuf {
        self.directory.join(format!("{}.json", group))
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn save(&self, group: &str, session: &StoredSession) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| format!("failed to create store directory: {}", e))?;

        let path = self.record_path(group);
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| format!("failed to serialize session: {}", e))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, perms)
                .await
                .map_err(|e| format!("failed to chmod {}: {}", path.display(), e))?;
        }

        debug!(group, path = %path.display(), "Session saved to file store.");
        Ok(())
    }

    async fn load(&self, group: &str) -> Result<Option<StoredSession>, String> {
        let path = self.record_path(group);
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| format!("failed to parse {}: {}", path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read {}: {}", path.display(), e)),
        }
    }

    async fn delete(&self, group: &str) -> Result<(), String> {
        let path = self.record_path(group);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("failed to delete {}: {}", path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_session() -> StoredSession {
        let mut cookies = HashMap::new();
        cookies.insert("session".to_string(), "v1".to_string());
        StoredSession {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            cookies: Some(cookies),
        }
    }

    #[tokio::test]
    async fn test_file_store_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&FileStoreConfig {
            directory: dir.path().to_path_buf(),
        });

        assert_eq!(store.load("nogizaka46").await.unwrap(), None);

        let session = sample_session();
        store.save("nogizaka46", &session).await.unwrap();
        let loaded = store.load("nogizaka46").await.unwrap().unwrap();
        assert_eq!(loaded, session);

        store.delete("nogizaka46").await.unwrap();
        assert_eq!(store.load("nogizaka46").await.unwrap(), None);
        // Deleting again is a no-op, not an error.
        store.delete("nogizaka46").await.unwrap();
    }

    #[tokio::test]
    async fn test_records_are_isolated_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&FileStoreConfig {
            directory: dir.path().to_path_buf(),
        });

        let session = sample_session();
        store.save("hinatazaka46", &session).await.unwrap();
        assert_eq!(store.load("sakurazaka46").await.unwrap(), None);
        assert!(store.load("hinatazaka46").await.unwrap().is_some());
    }
}
