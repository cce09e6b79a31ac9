//! Last-resort refresh: replay the saved browser profile headlessly.
//!
//! Slow (seconds, plus a one-time browser download when auto-install is on)
//! but recovers sessions the lighter strategies cannot. Only usable when a
//! persistent profile directory from a previous interactive login exists.

use async_trait::async_trait;
use tracing::{debug, info};

use super::base::{RefreshContext, RefreshOutcome, RefreshStrategy, TokenGrant};
use crate::auth::BrowserAuth;
use crate::client::session::SessionState;

pub struct BrowserRefresh {
    auto_install: bool,
}

impl BrowserRefresh {
    pub fn new(auto_install: bool) -> Self {
        Self { auto_install }
    }
}

#[async_trait]
impl RefreshStrategy for BrowserRefresh {
    fn get_name(&self) -> &str {
        "headless-browser"
    }

    fn is_available(&self, session: &SessionState) -> bool {
        session.auth_dir.as_ref().is_some_and(|d| d.is_dir())
    }

    async fn attempt(&self, ctx: &RefreshContext<'_>) -> RefreshOutcome {
        let Some(auth_dir) = ctx.session.auth_dir.as_ref().filter(|d| d.is_dir()) else {
            debug!("No saved browser profile; headless refresh skipped");
            return RefreshOutcome::Unavailable;
        };

        info!(group = %ctx.group, "Attempting headless browser refresh");
        match BrowserAuth::refresh_token_headless(ctx.group, auth_dir, self.auto_install).await {
            Some(bundle) => RefreshOutcome::Refreshed(TokenGrant {
                access_token: bundle.access_token,
                refresh_token: bundle.refresh_token,
                // A full re-auth yields a complete cookie set; anything not
                // in it is dead.
                rotated_cookies: bundle.cookies,
                replace_cookies: true,
                write_through: true,
            }),
            None => RefreshOutcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_profile_dir() {
        let strategy = BrowserRefresh::new(false);
        assert!(!strategy.is_available(&SessionState::default()));

        let missing = SessionState {
            auth_dir: Some(std::path::PathBuf::from("/nonexistent/hakotalk-profile")),
            ..Default::default()
        };
        assert!(!strategy.is_available(&missing));
    }

    #[test]
    fn test_available_with_existing_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState {
            auth_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(BrowserRefresh::new(false).is_available(&session));
    }
}
