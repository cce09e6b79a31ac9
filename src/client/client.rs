//! The authenticated API client.
//!
//! One client instance owns one session (token, cookies, headers) for one
//! group. All state mutation goes through `update_token`, the sole writer of
//! the bearer header, so a successful refresh atomically replaces the
//! credential the next request will use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::group::Group;
use super::session::SessionState;
use crate::browser::launcher::DEFAULT_USER_AGENT;
use crate::error::HakoError;
use crate::models::credentials::{CredentialBundle, StoredSession};
use crate::models::message::{media_extension, media_url, MessageKind};
use crate::refresh::{build_strategies, RefreshContext, RefreshOutcome};
use crate::store::CredentialStore;

/// Delay between timeline pages, to stay under the service's informal rate
/// expectations.
const PAGE_DELAY: Duration = Duration::from_millis(500);

/// Construction-time options. Everything is optional; a client built from
/// the default options is unauthenticated until a token arrives via
/// `update_token` or a store load.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub cookies: Option<std::collections::HashMap<String, String>>,
    /// Overrides the group's default `x-talk-app-id` header.
    pub app_id: Option<String>,
    pub user_agent: Option<String>,
    /// Persistent browser profile enabling the headless-refresh path.
    pub auth_dir: Option<PathBuf>,
    /// Overrides the group's API base URL. Used by tests against a mock
    /// server; production code leaves it unset.
    pub api_base: Option<String>,
    pub verify_tls: bool,
    /// Let the headless-refresh path download a browser when none is found.
    pub auto_install_browser: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            access_token: None,
            refresh_token: None,
            cookies: None,
            app_id: None,
            user_agent: None,
            auth_dir: None,
            api_base: None,
            verify_tls: true,
            auto_install_browser: false,
        }
    }
}

pub struct Client {
    pub group: Group,
    api_base: String,
    headers: HeaderMap,
    session: SessionState,
    http: reqwest::Client,
    store: Option<Arc<dyn CredentialStore>>,
    auto_install_browser: bool,
}

impl Client {
    pub fn new(group: Group, options: ClientOptions) -> Result<Self, HakoError> {
        let config = group.config();
        let api_base = options
            .api_base
            .unwrap_or_else(|| config.api_base.to_string());
        let app_id = options.app_id.as_deref().unwrap_or(config.app_id);
        let user_agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "x-talk-app-id", app_id);
        insert_header(&mut headers, "user-agent", user_agent);
        insert_header(&mut headers, "content-type", "application/json");
        insert_header(&mut headers, "x-talk-app-platform", "web");
        insert_header(&mut headers, "origin", config.auth_url.trim_end_matches('/'));
        insert_header(&mut headers, "referer", config.auth_url);
        insert_header(&mut headers, "accept", "application/json");
        insert_header(&mut headers, "accept-language", "ja,en-US;q=0.9,en;q=0.8");

        if !options.verify_tls {
            warn!("TLS certificate verification is disabled");
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()?;

        let session = SessionState {
            access_token: None,
            refresh_token: options.refresh_token,
            cookies: options.cookies,
            auth_dir: options.auth_dir,
        };

        let mut client = Client {
            group,
            api_base,
            headers,
            session,
            http,
            store: None,
            auto_install_browser: options.auto_install_browser,
        };
        if let Some(token) = options.access_token {
            client.set_bearer(&token);
        }
        Ok(client)
    }

    /// Build a client backed by a credential store. When no explicit access
    /// token was given, the persisted record for this group is loaded; store
    /// failures degrade to storeless operation.
    pub async fn with_store(
        group: Group,
        options: ClientOptions,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, HakoError> {
        let load_saved = options.access_token.is_none() && store.is_enabled();
        let mut client = Client::new(group, options)?;

        if load_saved {
            match store.load(group.as_str()).await {
                Ok(Some(saved)) => {
                    info!(group = %group, "Loaded credentials from storage");
                    if client.session.refresh_token.is_none() {
                        client.session.refresh_token = saved.refresh_token;
                    }
                    if client.session.cookies.is_none() {
                        client.session.cookies = saved.cookies;
                    }
                    client.set_bearer(&saved.access_token);
                }
                Ok(None) => debug!(group = %group, "No stored credentials"),
                Err(e) => warn!(group = %group, "Failed to load stored credentials: {}", e),
            }
        }

        client.store = Some(store);
        Ok(client)
    }

    /// Replace the bearer token (and optionally the refresh token) and
    /// best-effort persist the session. Idempotent: calling twice with the
    /// same token leaves a single stable `Bearer <token>` header.
    pub async fn update_token(&mut self, new_token: &str, new_refresh_token: Option<String>) {
        self.set_bearer(new_token);
        if new_refresh_token.is_some() {
            self.session.refresh_token = new_refresh_token;
        }
        debug!("Access token updated");
        self.save_session().await;
    }

    /// Persist the current session to the attached store, if any. Failures
    /// are logged, never fatal.
    pub async fn save_session(&self) {
        let (Some(store), Some(access_token)) = (&self.store, &self.session.access_token) else {
            return;
        };
        if !store.is_enabled() {
            return;
        }
        let record = StoredSession {
            access_token: access_token.clone(),
            refresh_token: self.session.refresh_token.clone(),
            cookies: self.session.cookies.clone(),
        };
        if let Err(e) = store.save(self.group.as_str(), &record).await {
            warn!(group = %self.group, "Failed to save session: {}", e);
        }
    }

    /// Take over the full credential set captured by an interactive login.
    pub async fn adopt_bundle(&mut self, bundle: &CredentialBundle) {
        self.session.cookies = Some(bundle.cookies.clone());
        insert_header(&mut self.headers, "x-talk-app-id", &bundle.app_id);
        insert_header(&mut self.headers, "user-agent", &bundle.user_agent);
        self.update_token(&bundle.access_token, bundle.refresh_token.clone())
            .await;
    }

    /// Sole writer of the Authorization header.
    fn set_bearer(&mut self, token: &str) {
        self.session.access_token = Some(token.to_string());
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!("Token is not a valid header value: {}", e),
        }
    }

    /// Authenticated JSON GET with the 401 soft-fail contract: one refresh,
    /// one retry, then absence. Server errors (5xx) and transport failures
    /// propagate; everything else degrades to `Ok(None)`.
    pub async fn fetch_json(
        &mut self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Option<Value>, HakoError> {
        let url = format!("{}{}", self.api_base, endpoint);
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .query(params)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(Some(response.json().await?)),
            401 => {
                info!(endpoint, "Unauthorized (401); attempting automatic token refresh");
                if !self.refresh_access_token().await? {
                    return Ok(None);
                }
                let retry = self
                    .http
                    .get(&url)
                    .headers(self.headers.clone())
                    .query(params)
                    .send()
                    .await?;
                match retry.status().as_u16() {
                    200 => Ok(Some(retry.json().await?)),
                    401 => {
                        warn!(endpoint, "Still unauthorized after refresh");
                        Ok(None)
                    }
                    status if status >= 500 => Err(HakoError::Api {
                        status,
                        endpoint: endpoint.to_string(),
                    }),
                    status => {
                        warn!(endpoint, status, "Unexpected status on retry");
                        Ok(None)
                    }
                }
            }
            status if status >= 500 => {
                error!(endpoint, status, "Server error");
                Err(HakoError::Api {
                    status,
                    endpoint: endpoint.to_string(),
                })
            }
            status => {
                warn!(endpoint, status, "Unexpected status");
                Ok(None)
            }
        }
    }

    /// Run the refresh fallback chain. Returns `Ok(true)` when a strategy
    /// produced a new token, `Ok(false)` when the chain is exhausted or no
    /// refresh material exists at all (the latter without any network call).
    /// An explicit invalidation from the server propagates as an error.
    pub async fn refresh_access_token(&mut self) -> Result<bool, HakoError> {
        if !self.session.can_refresh() {
            debug!("No refresh token, cookies, or browser profile; cannot refresh");
            return Ok(false);
        }

        // The expired token must not accompany a refresh request.
        let mut headers = self.headers.clone();
        headers.remove(AUTHORIZATION);

        for strategy in build_strategies(self.auto_install_browser) {
            if !strategy.is_available(&self.session) {
                debug!(strategy = strategy.get_name(), "Strategy unavailable; skipping");
                continue;
            }
            let outcome = {
                let ctx = RefreshContext {
                    http: &self.http,
                    api_base: &self.api_base,
                    headers: &headers,
                    session: &self.session,
                    group: self.group,
                };
                strategy.attempt(&ctx).await
            };
            match outcome {
                RefreshOutcome::Refreshed(grant) => {
                    info!(
                        strategy = strategy.get_name(),
                        group = %self.group,
                        "Access token refreshed"
                    );
                    self.apply_grant(grant).await;
                    return Ok(true);
                }
                RefreshOutcome::Unavailable | RefreshOutcome::Failed => continue,
                RefreshOutcome::Invalidated => return Err(HakoError::SessionExpired),
            }
        }

        warn!(group = %self.group, "All refresh strategies exhausted");
        Ok(false)
    }

    /// Apply a grant from the refresh chain. Cookies are merged (or
    /// replaced) before the token update persists the session, so a stale
    /// cookie value never reaches the store once a rotation was observed.
    async fn apply_grant(&mut self, grant: crate::refresh::TokenGrant) {
        if grant.replace_cookies {
            self.session.cookies = Some(grant.rotated_cookies);
        } else if !grant.rotated_cookies.is_empty() {
            let mut held = self.session.cookies.take().unwrap_or_default();
            held.extend(grant.rotated_cookies);
            self.session.cookies = Some(held);
        }
        if grant.write_through && self.store.is_none() {
            warn!("Expensive refresh succeeded but no store is attached; result will not survive a restart");
        }
        self.update_token(&grant.access_token, grant.refresh_token)
            .await;
    }

    /// Subscribed groups (artists), filtered by subscription state.
    pub async fn get_groups(&mut self, include_inactive: bool) -> Result<Vec<Value>, HakoError> {
        let params = [("organization_id", "1".to_string())];
        let Some(groups) = self.fetch_json("/groups", &params).await? else {
            return Ok(Vec::new());
        };
        let groups = match groups {
            Value::Array(items) => items,
            _ => return Ok(Vec::new()),
        };
        Ok(groups
            .into_iter()
            .filter(|g| {
                let state = g
                    .get("subscription")
                    .and_then(|s| s.get("state"))
                    .and_then(Value::as_str);
                match state {
                    Some("active") => true,
                    Some("expired") | Some("suspended") | Some("canceled") => include_inactive,
                    _ => false,
                }
            })
            .collect())
    }

    /// Members (timelines) within a group.
    pub async fn get_members(&mut self, group_id: i64) -> Result<Vec<Value>, HakoError> {
        let data = self
            .fetch_json(&format!("/groups/{}/members", group_id), &[])
            .await?;
        Ok(match data {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }

    /// All timeline messages newer than `since_id` (exclusive), oldest
    /// first. Pages descending in batches of 200 and follows the server's
    /// `continuation` cursor; a repeated or absent cursor terminates.
    pub async fn get_messages(
        &mut self,
        group_id: i64,
        since_id: Option<i64>,
        max_id: Option<i64>,
    ) -> Result<Vec<Value>, HakoError> {
        let endpoint = format!("/groups/{}/timeline", group_id);
        let mut collected: BTreeMap<i64, Value> = BTreeMap::new();
        let mut continuation: Option<String> = None;
        let mut page = 0u32;
        let mut retried_first_page = false;

        loop {
            let mut params: Vec<(&str, String)> =
                vec![("count", "200".to_string()), ("order", "desc".to_string())];
            if let Some(cursor) = &continuation {
                params.push(("continuation", cursor.clone()));
            } else if page == 0 {
                if let Some(max_id) = max_id {
                    params.push(("max_id", max_id.to_string()));
                }
            }

            let Some(data) = self.fetch_json(&endpoint, &params).await? else {
                // An empty first page sometimes just means a stale token
                // that 401-handling could not fix inline; one refresh, one
                // retry.
                if page == 0 && !retried_first_page {
                    retried_first_page = true;
                    if self.refresh_access_token().await? {
                        continue;
                    }
                }
                break;
            };

            let messages = match data.get("messages").and_then(Value::as_array) {
                Some(items) if !items.is_empty() => items.clone(),
                _ => break,
            };

            let mut reached_since_id = false;
            for message in &messages {
                let Some(id) = message.get("id").and_then(Value::as_i64) else {
                    continue;
                };
                if since_id.is_some_and(|since| id <= since) {
                    reached_since_id = true;
                    break;
                }
                collected.insert(id, message.clone());
            }
            if reached_since_id {
                break;
            }

            let next = data
                .get("continuation")
                .and_then(Value::as_str)
                .map(str::to_string);
            match next {
                Some(cursor) if continuation.as_ref() != Some(&cursor) => {
                    continuation = Some(cursor)
                }
                _ => break,
            }

            page += 1;
            debug!(group_id, page, collected = collected.len(), "Fetching next timeline page");
            tokio::time::sleep(PAGE_DELAY).await;
        }

        // BTreeMap iteration yields ascending message ids.
        Ok(collected.into_values().collect())
    }

    /// The authenticated user's profile.
    pub async fn get_profile(&mut self) -> Result<Option<Value>, HakoError> {
        self.fetch_json("/profile", &[]).await
    }

    /// Official news (announcements).
    pub async fn get_news(&mut self, count: u32) -> Result<Vec<Value>, HakoError> {
        let params = [
            ("platform", "web".to_string()),
            ("count", count.to_string()),
        ];
        let data = self.fetch_json("/announcements", &params).await?;
        Ok(unwrap_list(data, "announcements"))
    }

    pub async fn get_tags(&mut self) -> Result<Vec<Value>, HakoError> {
        let data = self.fetch_json("/tags", &[]).await?;
        Ok(unwrap_list(data, "tags"))
    }

    /// Fan club contents for an organization.
    pub async fn get_fc_contents(&mut self, organization_id: i64) -> Result<Vec<Value>, HakoError> {
        let params = [("organization_id", organization_id.to_string())];
        let data = self.fetch_json("/fc-contents", &params).await?;
        Ok(unwrap_list(data, "contents"))
    }

    pub async fn get_organizations(&mut self) -> Result<Vec<Value>, HakoError> {
        let data = self.fetch_json("/organizations", &[]).await?;
        Ok(unwrap_list(data, "organizations"))
    }

    /// Products (subscriptions etc), optionally filtered by type.
    pub async fn get_products(
        &mut self,
        product_type: Option<&str>,
    ) -> Result<Vec<Value>, HakoError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(t) = product_type {
            params.push(("type", t.to_string()));
        }
        let data = self.fetch_json("/products", &params).await?;
        Ok(unwrap_list(data, "products"))
    }

    /// Download a URL to a local path. Returns true on success or when the
    /// file already exists; all failures are logged and return false.
    pub async fn download_file(&self, url: &str, path: &Path) -> bool {
        if url.is_empty() || path.exists() {
            return true;
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(path = %path.display(), "Failed to create directory: {}", e);
                return false;
            }
        }
        match self.http.get(url).send().await {
            Ok(response) if response.status().as_u16() == 200 => {
                match response.bytes().await {
                    Ok(bytes) => match tokio::fs::write(path, &bytes).await {
                        Ok(()) => true,
                        Err(e) => {
                            error!(path = %path.display(), "Failed to write download: {}", e);
                            false
                        }
                    },
                    Err(e) => {
                        error!(url, "Failed to read download body: {}", e);
                        false
                    }
                }
            }
            Ok(response) => {
                warn!(url, status = response.status().as_u16(), "Download failed");
                false
            }
            Err(e) => {
                error!(url, "Error downloading: {}", e);
                false
            }
        }
    }

    /// Download the media attached to a message into
    /// `<output_dir>/<kind>/<id>.<ext>`. Text messages yield `None`.
    pub async fn download_message_media(
        &self,
        message: &Value,
        output_dir: &Path,
    ) -> Option<PathBuf> {
        let kind = MessageKind::from_raw(message.get("type").and_then(Value::as_str));
        if kind == MessageKind::Text {
            return None;
        }
        let url = media_url(message)?;
        let id = message.get("id").and_then(Value::as_i64)?;
        let ext = media_extension(Some(url), kind);
        let path = output_dir.join(kind.as_str()).join(format!("{}.{}", id, ext));
        if self.download_file(url, &path).await {
            Some(path)
        } else {
            None
        }
    }

    /// Current Authorization header value, for assertions and diagnostics.
    pub fn authorization_header(&self) -> Option<&HeaderValue> {
        self.headers.get(AUTHORIZATION)
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(e) => warn!(name, "Skipping invalid header value: {}", e),
    }
}

/// Pull the list out of an `{"<key>": [...]}` envelope.
fn unwrap_list(data: Option<Value>, key: &str) -> Vec<Value> {
    match data.and_then(|mut d| d.get_mut(key).map(Value::take)) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}
