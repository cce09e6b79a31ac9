//! Refresh via a stored refresh token.
//!
//! The observed web flow never issues a refresh token, so in practice this
//! slot only fires for sessions imported from a mobile-style flow. The
//! strategy is kept fully implemented so such a session works unchanged.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::base::{
    RefreshContext, RefreshOutcome, RefreshStrategy, TokenGrant, UpdateTokenResponse,
};
use crate::client::session::SessionState;

pub struct TokenRefresh;

#[async_trait]
impl RefreshStrategy for TokenRefresh {
    fn get_name(&self) -> &str {
        "refresh-token"
    }

    fn is_available(&self, session: &SessionState) -> bool {
        session.refresh_token.is_some()
    }

    async fn attempt(&self, ctx: &RefreshContext<'_>) -> RefreshOutcome {
        let Some(refresh_token) = ctx.session.refresh_token.as_deref() else {
            return RefreshOutcome::Unavailable;
        };

        debug!(group = %ctx.group, "Attempting refresh using refresh_token");
        let response = ctx
            .http
            .post(ctx.update_token_url())
            .headers(ctx.headers.clone())
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(group = %ctx.group, "Error during refresh_token attempt: {}", e);
                return RefreshOutcome::Failed;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            warn!(group = %ctx.group, status, "refresh_token attempt rejected; falling back");
            return RefreshOutcome::Failed;
        }

        match response.json::<UpdateTokenResponse>().await {
            Ok(UpdateTokenResponse {
                access_token: Some(access_token),
                refresh_token,
            }) if !access_token.is_empty() => RefreshOutcome::Refreshed(TokenGrant {
                access_token,
                refresh_token,
                rotated_cookies: Default::default(),
                replace_cookies: false,
                write_through: false,
            }),
            Ok(_) => {
                warn!(group = %ctx.group, "refresh_token response carried no access_token");
                RefreshOutcome::Failed
            }
            Err(e) => {
                warn!(group = %ctx.group, "Unparseable refresh_token response: {}", e);
                RefreshOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use crate::client::group::Group;

    fn context<'a>(
        http: &'a reqwest::Client,
        api_base: &'a str,
        headers: &'a HeaderMap,
        session: &'a SessionState,
    ) -> RefreshContext<'a> {
        RefreshContext {
            http,
            api_base,
            headers,
            session,
            group: Group::Hinatazaka46,
        }
    }

    #[test]
    fn test_unavailable_without_refresh_token() {
        let session = SessionState::default();
        assert!(!TokenRefresh.is_available(&session));
    }

    #[tokio::test]
    async fn test_successful_token_refresh() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/update_token")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"refresh_token": "rt-old"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-new","refresh_token":"rt-new"}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let headers = HeaderMap::new();
        let session = SessionState {
            refresh_token: Some("rt-old".to_string()),
            ..Default::default()
        };
        let base = server.url();
        let ctx = context(&http, &base, &headers, &session);

        let outcome = TokenRefresh.attempt(&ctx).await;
        m.assert_async().await;
        match outcome {
            RefreshOutcome::Refreshed(grant) => {
                assert_eq!(grant.access_token, "at-new");
                assert_eq!(grant.refresh_token.as_deref(), Some("rt-new"));
                assert!(!grant.write_through);
            }
            other => panic!("expected Refreshed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_token_refresh_is_soft_failure() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/update_token")
            .with_status(401)
            .with_body("{}")
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let headers = HeaderMap::new();
        let session = SessionState {
            refresh_token: Some("rt".to_string()),
            ..Default::default()
        };
        let base = server.url();
        let ctx = context(&http, &base, &headers, &session);

        let outcome = TokenRefresh.attempt(&ctx).await;
        m.assert_async().await;
        assert!(matches!(outcome, RefreshOutcome::Failed));
    }
}
