//! The token-refresh fallback chain.
//!
//! Refresh is an ordered list of named strategies, each evaluated at most
//! once per refresh invocation by a small driver loop in the client. A
//! strategy reports one of four outcomes; only `Invalidated` stops the chain
//! early, because an explicitly invalidated session must never trigger a
//! silent re-authentication that could race with the user's new session
//! elsewhere.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::browser_refresh::BrowserRefresh;
use super::cookie_refresh::CookieRefresh;
use super::token_refresh::TokenRefresh;
use crate::client::group::Group;
use crate::client::session::SessionState;

/// A successful refresh: the new token plus whatever else the path rotated.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Cookies rotated by the server during this refresh. Stale values must
    /// never survive an observed rotation.
    pub rotated_cookies: HashMap<String, String>,
    /// Replace the held cookie set instead of merging into it (browser
    /// re-auth produces a complete fresh set).
    pub replace_cookies: bool,
    /// Persist immediately rather than best-effort: set by expensive paths
    /// whose result should not be lost to a later crash.
    pub write_through: bool,
}

/// Outcome of a single strategy attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    Refreshed(TokenGrant),
    /// Preconditions absent; skipped without any network traffic.
    Unavailable,
    /// Soft failure: fall through to the next strategy.
    Failed,
    /// The server explicitly invalidated the session; abort the whole chain.
    Invalidated,
}

/// Everything a strategy may read while attempting a refresh. Strategies
/// never mutate client state; the driver applies the grant afterwards.
pub struct RefreshContext<'a> {
    pub http: &'a reqwest::Client,
    pub api_base: &'a str,
    /// The client's standing headers minus Authorization (the expired token
    /// must not accompany a refresh).
    pub headers: &'a HeaderMap,
    pub session: &'a SessionState,
    pub group: Group,
}

impl RefreshContext<'_> {
    /// The refresh endpoint shared by the token and cookie paths.
    pub fn update_token_url(&self) -> String {
        format!("{}/update_token", self.api_base)
    }
}

/// A refresh strategy must be able to report its availability from session
/// state alone, and produce an outcome when attempted.
#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    fn get_name(&self) -> &str;
    fn is_available(&self, session: &SessionState) -> bool;
    async fn attempt(&self, ctx: &RefreshContext<'_>) -> RefreshOutcome;
}

/// The chain, in fallback order: refresh token, session cookies, headless
/// browser re-authentication.
pub fn build_strategies(auto_install_browser: bool) -> Vec<Box<dyn RefreshStrategy>> {
    vec![
        Box::new(TokenRefresh),
        Box::new(CookieRefresh),
        Box::new(BrowserRefresh::new(auto_install_browser)),
    ]
}

/// Wire shape of a successful `/update_token` response.
#[derive(Debug, Deserialize)]
pub(super) struct UpdateTokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Join a cookie map into a `Cookie` request header value.
pub(super) fn cookie_header(cookies: &HashMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Extract the `name=value` pair from a `Set-Cookie` header value,
/// discarding attributes.
pub(super) fn parse_set_cookie(value: &str) -> Option<(String, String)> {
    let first = value.split(';').next()?.trim();
    let mut kv = first.splitn(2, '=');
    let name = kv.next()?.trim();
    let val = kv.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), val.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_order_is_token_cookie_browser() {
        let names: Vec<String> = build_strategies(false)
            .iter()
            .map(|s| s.get_name().to_string())
            .collect();
        assert_eq!(names, ["refresh-token", "session-cookie", "headless-browser"]);
    }

    #[test]
    fn test_cookie_header_join() {
        let mut cookies = HashMap::new();
        cookies.insert("a".to_string(), "1".to_string());
        let header = cookie_header(&cookies);
        assert_eq!(header, "a=1");
    }

    #[test]
    fn test_parse_set_cookie_strips_attributes() {
        let parsed = parse_set_cookie("session=rot2; Path=/; HttpOnly; Secure");
        assert_eq!(parsed, Some(("session".to_string(), "rot2".to_string())));
        assert_eq!(parse_set_cookie(""), None);
        assert_eq!(parse_set_cookie("; Path=/"), None);
    }
}
