use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::base::{decode_record, encode_record};
use super::CredentialStore;
use crate::models::StoredSession;

/// Default service name under which records are filed in the OS keyring.
const SERVICE_NAME: &str = "hakotalk";

/// The config struct for the OS keyring backend.
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone)]
pub struct KeyringStoreConfig {
    /// Service name the records are filed under. Defaults to "hakotalk".
    pub service: Option<String>,
}

/// A concrete `CredentialStore` backed by the platform secret service
/// (Keychain on macOS, Credential Manager on Windows, Secret Service on
/// Linux). Records are compressed JSON; see `base::encode_record`.
///
/// The keyring API is blocking, so every operation runs on the blocking
/// thread pool.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(config: &KeyringStoreConfig) -> Self {
        let service = config
            .service
            .clone()
            .unwrap_or_else(|| SERVICE_NAME.to_string());
        info!(service = %service, "Using OS keyring credential store.");
        Self { service }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }
}

fn entry(service: &str, group: &str) -> Result<keyring::Entry, String> {
    keyring::Entry::new(service, group).map_err(|e| format!("keyring unavailable: {}", e))
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn save(&self, group: &str, session: &StoredSession) -> Result<(), String> {
        let encoded = encode_record(session)?;
        let service = self.service.clone();
        let key = group.to_string();
        tokio::task::spawn_blocking(move || {
            entry(&service, &key)?
                .set_password(&encoded)
                .map_err(|e| format!("failed to save credentials to keyring: {}", e))
        })
        .await
        .map_err(|e| format!("keyring task failed: {}", e))??;
        debug!(group, "Session saved to keyring.");
        Ok(())
    }

    async fn load(&self, group: &str) -> Result<Option<StoredSession>, String> {
        let service = self.service.clone();
        let group = group.to_string();
        let record = tokio::task::spawn_blocking(move || match entry(&service, &group) {
            Ok(e) => match e.get_password() {
                Ok(data) => Ok(Some(data)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(format!("failed to read keyring entry: {}", e)),
            },
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| format!("keyring task failed: {}", e))??;

        match record {
            Some(data) => decode_record(&data).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, group: &str) -> Result<(), String> {
        let service = self.service.clone();
        let group = group.to_string();
        tokio::task::spawn_blocking(move || match entry(&service, &group) {
            Ok(e) => match e.delete_credential() {
                // Deleting a non-existent record is not an error.
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(format!("failed to delete keyring entry: {}", e)),
            },
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| format!("keyring task failed: {}", e))?
    }
}
