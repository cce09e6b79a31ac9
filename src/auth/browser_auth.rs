//! Browser-based session acquisition.
//!
//! The acquirer never fills a login form and never needs credentials: it
//! navigates to the group's web app, lets the app authenticate however it
//! wants (usually via an external identity provider), and passively observes
//! API traffic until a request carrying a bearer token appears.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::page::domain_matches;
use crate::browser::{launch, BrowserError, BrowserHandle, LaunchOptions, PageSession};
use crate::client::group::Group;
use crate::models::CredentialBundle;

/// How long to wait for token capture when a human is driving the login.
const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(300);
/// Headless waits cover only session resumption, never a fresh login.
const HEADLESS_TIMEOUT: Duration = Duration::from_secs(45);

/// External identity-provider domains whose cookies must survive a
/// fresh-login state clear; wiping them would force a full re-login at the
/// IdP instead of just at the service.
const KNOWN_IDP_DOMAINS: &[&str] = &[
    "accounts.google.com",
    "google.com",
    "appleid.apple.com",
    "apple.com",
    "access.line.me",
    "line.me",
];

#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub headless: bool,
    /// Persistent browser profile; ephemeral when absent.
    pub profile_dir: Option<PathBuf>,
    /// Browser channel ("chrome", "msedge").
    pub channel: Option<String>,
}

/// Handles browser-based authentication against the talk service.
pub struct BrowserAuth;

impl BrowserAuth {
    /// Launch a browser for login and capture a credential bundle.
    ///
    /// Returns `None` on timeout or on any captured failure; the browser is
    /// closed on every exit path.
    pub async fn login(group: Group, options: &LoginOptions) -> Option<CredentialBundle> {
        info!(group = %group, headless = options.headless, "Launching browser for login");

        let handle = match launch(&LaunchOptions {
            headless: options.headless,
            profile_dir: options.profile_dir.clone(),
            channel: options.channel.clone(),
            auto_install: false,
        })
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(group = %group, "Browser launch failed: {}", e);
                return None;
            }
        };

        let timeout = if options.headless {
            HEADLESS_TIMEOUT
        } else {
            INTERACTIVE_TIMEOUT
        };
        // Fresh logins clear stale service state; resumption paths must not.
        let result = capture_credentials(&handle, group, timeout, true).await;

        // Cleanup happens on every path, and never raises.
        handle.close().await;

        match result {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(group = %group, "Login failed: {}", e);
                None
            }
        }
    }

    /// Silently re-derive a bearer token from an existing persistent browser
    /// profile. The profile directory must already exist; its on-disk
    /// session state is exactly what makes the silent path work, so nothing
    /// is cleared here.
    pub async fn refresh_token_headless(
        group: Group,
        profile_dir: &Path,
        auto_install: bool,
    ) -> Option<CredentialBundle> {
        if !profile_dir.exists() {
            warn!(
                group = %group,
                profile = %profile_dir.display(),
                "Headless refresh requires an existing browser profile."
            );
            return None;
        }

        info!(group = %group, "Attempting headless token refresh");
        let handle = match launch(&LaunchOptions {
            headless: true,
            profile_dir: Some(profile_dir.to_path_buf()),
            channel: None,
            auto_install,
        })
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(group = %group, "Headless browser launch failed: {}", e);
                return None;
            }
        };

        let result = capture_credentials(&handle, group, HEADLESS_TIMEOUT, false).await;
        handle.close().await;

        match result {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(group = %group, "Headless refresh failed: {}", e);
                None
            }
        }
    }
}

/// The shared capture flow: attach a page, install stealth, observe traffic
/// until the app authenticates, then collect service-domain cookies.
async fn capture_credentials(
    handle: &BrowserHandle,
    group: Group,
    timeout: Duration,
    clear_state: bool,
) -> Result<Option<CredentialBundle>, BrowserError> {
    let config = group.config();
    let page = PageSession::attach(&handle.cdp).await?;
    page.add_stealth_script().await?;

    if clear_state {
        // Failure to clear is not fatal: worst case the app resumes a stale
        // session and we time out instead of capturing a mismatched pair.
        if let Err(e) = page
            .clear_site_state(group.service_domain(), KNOWN_IDP_DOMAINS)
            .await
        {
            warn!("Could not clear stale site state: {}", e);
        }
    }

    // Subscribe before navigating so the first authenticated request cannot
    // be missed.
    let mut events = handle.cdp.subscribe();

    if let Err(e) = page.navigate(config.auth_url).await {
        // The observer decides success; slow or aborted page loads are fine.
        warn!("Navigation error (ignoring): {}", e);
    }

    let Some(captured) = page.wait_for_bearer(&mut events, group.api_host(), timeout).await
    else {
        return Ok(None);
    };
    info!(group = %group, "Token captured successfully");

    let cookies = collect_service_cookies(&page, group).await?;

    Ok(Some(CredentialBundle {
        access_token: captured.access_token,
        refresh_token: None,
        cookies,
        app_id: captured.app_id.unwrap_or_else(|| config.app_id.to_string()),
        user_agent: captured
            .user_agent
            .unwrap_or_else(|| crate::browser::launcher::DEFAULT_USER_AGENT.to_string()),
    }))
}

/// Cookies scoped to the group's service domain. Third-party IdP cookies are
/// dropped: they belong to the identity provider's session, not ours.
async fn collect_service_cookies(
    page: &PageSession<'_>,
    group: Group,
) -> Result<HashMap<String, String>, BrowserError> {
    let service_domain = group.service_domain();
    let cookies = page
        .cookies()
        .await?
        .into_iter()
        .filter(|c| domain_matches(&c.domain, service_domain))
        .filter(|c| {
            !KNOWN_IDP_DOMAINS
                .iter()
                .any(|idp| domain_matches(&c.domain, idp))
        })
        .map(|c| (c.name, c.value))
        .collect();
    Ok(cookies)
}
