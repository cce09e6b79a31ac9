use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::{info, warn};

use super::file_store::FileStore;
use super::keyring_store::KeyringStore;
use super::no_store::NoStore;
use crate::config::{StoreBackend, StoreConfig};
use crate::models::StoredSession;

/// The CredentialStore trait abstracts persisted session records
/// (save, load, delete), keyed by group slug.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, group: &str, session: &StoredSession) -> Result<(), String>;
    async fn load(&self, group: &str) -> Result<Option<StoredSession>, String>;
    async fn delete(&self, group: &str) -> Result<(), String>;
    fn is_enabled(&self) -> bool {
        // Default implementation should return always True for real stores.
        // NoStore will return false so we can write better debug messages.
        true
    }
}

/// Creates a concrete store implementation based on the StoreConfig.
/// If `store.enabled = false`, returns NoStore. Otherwise, picks the
/// specified backend (keyring by default).
pub fn create_store(config: &StoreConfig) -> Arc<dyn CredentialStore> {
    if !config.enabled {
        info!("Credential store is disabled. Using NoStore.");
        return Arc::new(NoStore::new());
    }

    match &config.backend {
        Some(StoreBackend::File(file_config)) => {
            info!(directory = %file_config.directory.display(), "Using file credential store.");
            Arc::new(FileStore::new(file_config))
        }
        Some(StoreBackend::Keyring(keyring_config)) => {
            Arc::new(KeyringStore::new(keyring_config))
        }
        None => {
            // Enabled with no backend named: the OS keyring is the default.
            warn!("Store enabled without an explicit backend; defaulting to keyring.");
            Arc::new(KeyringStore::default())
        }
    }
}

/// Serialize a session record, zlib-compress and base64-wrap it. Some
/// backends (Windows Credential Manager in particular) cap value sizes, and
/// cookie maps can push a plain JSON record past the limit.
pub(super) fn encode_record(session: &StoredSession) -> Result<String, String> {
    let json =
        serde_json::to_vec(session).map_err(|e| format!("failed to serialize session: {}", e))?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map(|compressed| general_purpose::STANDARD.encode(compressed))
        .map_err(|e| format!("failed to compress session: {}", e))
}

/// Inverse of [`encode_record`]. Records written by older versions were plain
/// JSON; those still decode via the fallback path.
pub(super) fn decode_record(data: &str) -> Result<StoredSession, String> {
    if let Ok(compressed) = general_purpose::STANDARD.decode(data) {
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        if decoder.read_to_end(&mut json).is_ok() {
            if let Ok(session) = serde_json::from_slice::<StoredSession>(&json) {
                return Ok(session);
            }
        }
    }
    // Legacy uncompressed record.
    serde_json::from_str(data).map_err(|e| format!("failed to parse session record: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_session() -> StoredSession {
        let mut cookies = HashMap::new();
        cookies.insert("session".to_string(), "value-1".to_string());
        StoredSession {
            access_token: "token".to_string(),
            refresh_token: None,
            cookies: Some(cookies),
        }
    }

    #[test]
    fn test_record_codec_round_trip() {
        let session = sample_session();
        let encoded = encode_record(&session).unwrap();
        // The encoded form must not leak the token in the clear.
        assert!(!encoded.contains("token"));
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_decode_accepts_legacy_plain_json() {
        let session = sample_session();
        let plain = serde_json::to_string(&session).unwrap();
        let decoded = decode_record(&plain).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_record("not a record").is_err());
    }
}
