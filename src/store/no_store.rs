use async_trait::async_trait;

use super::CredentialStore;
use crate::models::StoredSession;

/// A no-op store that always returns an error if called,
/// indicating the store is disabled.
pub struct NoStore;

impl NoStore {
    pub fn new() -> Self {
        NoStore
    }
}

impl Default for NoStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for NoStore {
    async fn save(&self, _group: &str, _session: &StoredSession) -> Result<(), String> {
        Err("Credential store is disabled".into())
    }

    async fn load(&self, _group: &str) -> Result<Option<StoredSession>, String> {
        Err("Credential store is disabled".into())
    }

    async fn delete(&self, _group: &str) -> Result<(), String> {
        Err("Credential store is disabled".into())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every operation on NoStore reports the store as disabled.
    #[tokio::test]
    async fn test_no_store_errors_on_use() {
        let no_store = NoStore::new();
        let session = StoredSession {
            access_token: "dummy".to_string(),
            refresh_token: None,
            cookies: None,
        };
        assert!(no_store.save("hinatazaka46", &session).await.is_err());
        assert!(no_store.load("hinatazaka46").await.is_err());
        assert!(no_store.delete("hinatazaka46").await.is_err());
        assert!(!no_store.is_enabled());
    }
}
