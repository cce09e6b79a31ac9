//! Mutable per-client session state.

use std::collections::HashMap;
use std::path::PathBuf;

/// The credential material one client instance holds. Mutated only through
/// the client's update-token operation (the sole writer of the bearer
/// header) and the refresh chain's grant application; lives for the life of
/// the process.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub cookies: Option<HashMap<String, String>>,
    /// Persistent browser profile backing the headless-refresh path.
    pub auth_dir: Option<PathBuf>,
}

impl SessionState {
    /// Whether any refresh path could possibly apply. When this is false the
    /// chain exits early without issuing a single network call.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
            || self.cookies.as_ref().is_some_and(|c| !c.is_empty())
            || self.auth_dir.as_ref().is_some_and(|d| d.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_refresh_requires_some_material() {
        let state = SessionState::default();
        assert!(!state.can_refresh());

        let state = SessionState {
            refresh_token: Some("rt".into()),
            ..Default::default()
        };
        assert!(state.can_refresh());

        let mut cookies = HashMap::new();
        cookies.insert("session".to_string(), "v".to_string());
        let state = SessionState {
            cookies: Some(cookies),
            ..Default::default()
        };
        assert!(state.can_refresh());

        // An empty cookie map is no refresh material at all.
        let state = SessionState {
            cookies: Some(HashMap::new()),
            ..Default::default()
        };
        assert!(!state.can_refresh());

        // A configured but missing auth dir doesn't count either.
        let state = SessionState {
            auth_dir: Some(PathBuf::from("/definitely/not/here")),
            ..Default::default()
        };
        assert!(!state.can_refresh());
    }

    #[test]
    fn test_can_refresh_with_existing_auth_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState {
            auth_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(state.can_refresh());
    }
}
