//! Refresh via the web session cookies.
//!
//! This is the path the real web client uses: POST the refresh endpoint with
//! `refresh_token: null` and the session cookies attached. The server
//! rotates the session cookie on every call, so a success must also capture
//! the rotated values; and a structured `invalid_parameter` rejection means
//! the session was superseded elsewhere, which aborts the whole chain.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::base::{
    cookie_header, parse_set_cookie, RefreshContext, RefreshOutcome, RefreshStrategy, TokenGrant,
    UpdateTokenResponse,
};
use crate::client::session::SessionState;

pub struct CookieRefresh;

#[async_trait]
impl RefreshStrategy for CookieRefresh {
    fn get_name(&self) -> &str {
        "session-cookie"
    }

    fn is_available(&self, session: &SessionState) -> bool {
        session.cookies.as_ref().is_some_and(|c| !c.is_empty())
    }

    async fn attempt(&self, ctx: &RefreshContext<'_>) -> RefreshOutcome {
        let Some(cookies) = ctx.session.cookies.as_ref().filter(|c| !c.is_empty()) else {
            return RefreshOutcome::Unavailable;
        };

        debug!(group = %ctx.group, "Attempting refresh using session cookies");
        let response = ctx
            .http
            .post(ctx.update_token_url())
            .headers(ctx.headers.clone())
            .header(reqwest::header::COOKIE, cookie_header(cookies))
            // The browser sends an explicit null here, per captured traffic.
            .json(&json!({ "refresh_token": Value::Null }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(group = %ctx.group, "Cookie refresh attempt failed: {}", e);
                return RefreshOutcome::Failed;
            }
        };

        match response.status().as_u16() {
            200 => {
                let rotated_cookies = rotated_cookies(&response);
                match response.json::<UpdateTokenResponse>().await {
                    Ok(UpdateTokenResponse {
                        access_token: Some(access_token),
                        refresh_token,
                    }) if !access_token.is_empty() => {
                        if !rotated_cookies.is_empty() {
                            debug!(
                                rotated = ?rotated_cookies.keys().collect::<Vec<_>>(),
                                "Captured rotated session cookies from refresh response"
                            );
                        }
                        RefreshOutcome::Refreshed(TokenGrant {
                            access_token,
                            refresh_token,
                            rotated_cookies,
                            replace_cookies: false,
                            write_through: false,
                        })
                    }
                    Ok(_) => {
                        warn!(group = %ctx.group, "Cookie refresh response carried no access_token");
                        RefreshOutcome::Failed
                    }
                    Err(e) => {
                        warn!(group = %ctx.group, "Unparseable cookie refresh response: {}", e);
                        RefreshOutcome::Failed
                    }
                }
            }
            400 => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                if body.get("code").and_then(Value::as_str) == Some("invalid_parameter") {
                    // Logged in elsewhere; re-authenticating silently could
                    // race with the user's new session.
                    debug!(group = %ctx.group, "Session invalidated; user may have logged in elsewhere");
                    RefreshOutcome::Invalidated
                } else {
                    warn!(group = %ctx.group, "Cookie refresh rejected: {}", body);
                    RefreshOutcome::Failed
                }
            }
            status => {
                warn!(group = %ctx.group, status, "Cookie refresh failed");
                RefreshOutcome::Failed
            }
        }
    }
}

/// Cookie values the server rotated during this refresh.
fn rotated_cookies(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use crate::client::group::Group;

    fn session_with_cookie(name: &str, value: &str) -> SessionState {
        let mut cookies = HashMap::new();
        cookies.insert(name.to_string(), value.to_string());
        SessionState {
            cookies: Some(cookies),
            ..Default::default()
        }
    }

    #[test]
    fn test_unavailable_without_cookies() {
        assert!(!CookieRefresh.is_available(&SessionState::default()));
        let empty = SessionState {
            cookies: Some(HashMap::new()),
            ..Default::default()
        };
        assert!(!CookieRefresh.is_available(&empty));
        assert!(CookieRefresh.is_available(&session_with_cookie("session", "v")));
    }

    /// The server rotates the session cookie on every refresh; the grant
    /// must carry the new value.
    #[tokio::test]
    async fn test_success_captures_rotated_cookie() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/update_token")
            .match_header("cookie", "session=rot1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "session=rot2; Path=/; HttpOnly")
            .with_body(r#"{"access_token":"at-new"}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let headers = HeaderMap::new();
        let session = session_with_cookie("session", "rot1");
        let base = server.url();
        let ctx = RefreshContext {
            http: &http,
            api_base: &base,
            headers: &headers,
            session: &session,
            group: Group::Nogizaka46,
        };

        let outcome = CookieRefresh.attempt(&ctx).await;
        m.assert_async().await;
        match outcome {
            RefreshOutcome::Refreshed(grant) => {
                assert_eq!(grant.access_token, "at-new");
                assert_eq!(grant.rotated_cookies.get("session").map(String::as_str), Some("rot2"));
                assert!(!grant.replace_cookies);
            }
            other => panic!("expected Refreshed, got {:?}", other),
        }
    }

    /// A structured invalid_parameter rejection is a hard abort, never a
    /// fall-through.
    #[tokio::test]
    async fn test_invalid_parameter_aborts_chain() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/update_token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"invalid_parameter","message":"session superseded"}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let headers = HeaderMap::new();
        let session = session_with_cookie("session", "v");
        let base = server.url();
        let ctx = RefreshContext {
            http: &http,
            api_base: &base,
            headers: &headers,
            session: &session,
            group: Group::Nogizaka46,
        };

        let outcome = CookieRefresh.attempt(&ctx).await;
        m.assert_async().await;
        assert!(matches!(outcome, RefreshOutcome::Invalidated));
    }

    /// A 400 without the invalidation code is an ordinary soft failure.
    #[tokio::test]
    async fn test_other_400_is_soft_failure() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/update_token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"rate_limited"}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let headers = HeaderMap::new();
        let session = session_with_cookie("session", "v");
        let base = server.url();
        let ctx = RefreshContext {
            http: &http,
            api_base: &base,
            headers: &headers,
            session: &session,
            group: Group::Nogizaka46,
        };

        let outcome = CookieRefresh.attempt(&ctx).await;
        m.assert_async().await;
        assert!(matches!(outcome, RefreshOutcome::Failed));
    }
}
