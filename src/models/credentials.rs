//! Credential bundle captured from the browser and its persisted form.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything the session acquirer captures from a successful login:
/// the bearer token plus the headers and cookies the web client was using
/// when it authenticated.
///
/// Invariant: `access_token` is non-empty whenever the bundle is considered
/// valid; the acquirer never returns a bundle with an empty token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// Opaque server-issued bearer token.
    pub access_token: String,
    /// Currently unused by the observed web flow; kept for a hypothetical
    /// mobile flow that does issue one.
    pub refresh_token: Option<String>,
    /// Cookies scoped to the service domain (third-party IdP cookies are
    /// filtered out before the bundle is built).
    pub cookies: HashMap<String, String>,
    /// The `x-talk-app-id` header observed on the authenticated request.
    pub app_id: String,
    /// The `user-agent` header observed on the authenticated request.
    pub user_agent: String,
}

/// The externally stored form of a session, keyed by group slug in the
/// credential store. Writes after a refresh are fire-and-forget best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub cookies: Option<HashMap<String, String>>,
}

impl From<&CredentialBundle> for StoredSession {
    fn from(bundle: &CredentialBundle) -> Self {
        StoredSession {
            access_token: bundle.access_token.clone(),
            refresh_token: bundle.refresh_token.clone(),
            cookies: Some(bundle.cookies.clone()),
        }
    }
}
