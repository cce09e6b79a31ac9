use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::store::file_store::FileStoreConfig;
use crate::store::keyring_store::KeyringStoreConfig;

/// A wrapper for the credential store configuration:
/// - enabled: if false, the store is effectively disabled (NoStore).
/// - backend: the actual store backend (keyring, file).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct StoreConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub backend: Option<StoreBackend>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        // Enabled with no backend named means the OS keyring.
        StoreConfig {
            enabled: true,
            backend: None,
        }
    }
}

/// The existing store backends. We differentiate them via a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(tag = "type")]
pub enum StoreBackend {
    #[serde(rename = "keyring")]
    Keyring(KeyringStoreConfig),
    #[serde(rename = "file")]
    File(FileStoreConfig),
}
