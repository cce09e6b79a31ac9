//! Attached page session: the capability surface the session acquirer needs.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, trace};

use super::cdp::{CdpConnection, CdpEvent};
use super::BrowserError;

/// Script installed before navigation so the target app's bot checks don't
/// see an automated context.
const STEALTH_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined});";

/// What the network observer extracts from the first authenticated request:
/// the token the app attached itself, plus the headers it sent alongside.
#[derive(Debug, Clone)]
pub struct CapturedAuth {
    pub access_token: String,
    pub app_id: Option<String>,
    pub user_agent: Option<String>,
}

/// A browser cookie as reported by the protocol.
#[derive(Debug, Clone)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// A page target attached in flat mode; all commands are scoped to its
/// session id.
pub struct PageSession<'a> {
    cdp: &'a CdpConnection,
    session_id: String,
}

impl<'a> PageSession<'a> {
    /// Attach to an existing page target, or create one when the context has
    /// none. Enables the Page and Network domains.
    pub async fn attach(cdp: &'a CdpConnection) -> Result<PageSession<'a>, BrowserError> {
        let targets = cdp.execute("Target.getTargets", None, json!({})).await?;
        let existing = targets["targetInfos"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| t["type"] == "page")
            .and_then(|t| t["targetId"].as_str().map(str::to_string));

        let target_id = match existing {
            Some(id) => {
                debug!("Reusing existing page target.");
                id
            }
            None => {
                let created = cdp
                    .execute("Target.createTarget", None, json!({"url": "about:blank"}))
                    .await?;
                created["targetId"]
                    .as_str()
                    .ok_or_else(|| BrowserError::Protocol("createTarget returned no id".into()))?
                    .to_string()
            }
        };

        let attached = cdp
            .execute(
                "Target.attachToTarget",
                None,
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("attachToTarget returned no session".into()))?
            .to_string();

        let session = PageSession { cdp, session_id };
        session.execute("Page.enable", json!({})).await?;
        session.execute("Network.enable", json!({})).await?;
        Ok(session)
    }

    async fn execute(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.cdp.execute(method, Some(&self.session_id), params).await
    }

    pub async fn add_stealth_script(&self) -> Result<(), BrowserError> {
        self.execute(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": STEALTH_SCRIPT}),
        )
        .await?;
        Ok(())
    }

    /// Start navigation. Navigation errors are reported, not raised: the
    /// observer decides success, not the page load.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let result = self.execute("Page.navigate", json!({"url": url})).await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(BrowserError::Protocol(format!(
                    "navigation failed: {}",
                    error_text
                )));
            }
        }
        Ok(())
    }

    /// Watch network traffic until a 200 response is observed whose
    /// *originating request* targeted `api_host` and carried a bearer
    /// Authorization header. The token is attached by client-side code after
    /// its own auth completes, so it lives on the request, never the
    /// response.
    ///
    /// Returns `None` on timeout.
    pub async fn wait_for_bearer(
        &self,
        events: &mut UnboundedReceiver<CdpEvent>,
        api_host: &str,
        timeout: Duration,
    ) -> Option<CapturedAuth> {
        let sniff = async {
            // requestId -> (url, headers) for requests still awaiting a response
            let mut in_flight: HashMap<String, (String, Value)> = HashMap::new();

            while let Some(event) = events.recv().await {
                if event.session_id.as_deref() != Some(self.session_id.as_str()) {
                    continue;
                }
                match event.method.as_str() {
                    "Network.requestWillBeSent" => {
                        let request = &event.params["request"];
                        let url = request["url"].as_str().unwrap_or_default();
                        if !url.contains(api_host) {
                            continue;
                        }
                        if let Some(id) = event.params["requestId"].as_str() {
                            in_flight.insert(
                                id.to_string(),
                                (url.to_string(), request["headers"].clone()),
                            );
                        }
                    }
                    "Network.responseReceived" => {
                        let status = event.params["response"]["status"].as_u64().unwrap_or(0);
                        let Some(id) = event.params["requestId"].as_str() else {
                            continue;
                        };
                        let Some((url, headers)) = in_flight.remove(id) else {
                            continue;
                        };
                        if status != 200 {
                            continue;
                        }
                        trace!(url = %url, "Authenticated API response observed");
                        if let Some(auth) = extract_bearer(&headers) {
                            return Some(CapturedAuth {
                                access_token: auth,
                                app_id: header_value(&headers, "x-talk-app-id"),
                                user_agent: header_value(&headers, "user-agent"),
                            });
                        }
                    }
                    _ => {}
                }
            }
            None
        };

        match tokio::time::timeout(timeout, sniff).await {
            Ok(result) => result,
            Err(_) => {
                info!("Timed out waiting for bearer token capture.");
                None
            }
        }
    }

    /// All cookies held by the browser context.
    pub async fn cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError> {
        let result = self.execute("Storage.getCookies", json!({})).await?;
        let cookies = result["cookies"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|c| {
                Some(BrowserCookie {
                    name: c["name"].as_str()?.to_string(),
                    value: c["value"].as_str()?.to_string(),
                    domain: c["domain"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect();
        Ok(cookies)
    }

    /// Selectively clear service-domain cookies and local/session storage,
    /// keeping cookies of the listed identity-provider domains intact.
    /// Without this, the target app can silently resume a stale session and
    /// hand back a token that doesn't match the cookies we capture.
    pub async fn clear_site_state(
        &self,
        service_domain: &str,
        preserve_domains: &[&str],
    ) -> Result<(), BrowserError> {
        let mut removed = 0usize;
        for cookie in self.cookies().await? {
            if !domain_matches(&cookie.domain, service_domain) {
                continue;
            }
            if preserve_domains
                .iter()
                .any(|idp| domain_matches(&cookie.domain, idp))
            {
                continue;
            }
            self.execute(
                "Network.deleteCookies",
                json!({"name": cookie.name, "domain": cookie.domain}),
            )
            .await?;
            removed += 1;
        }

        self.execute(
            "Storage.clearDataForOrigin",
            json!({
                "origin": format!("https://{}", service_domain),
                "storageTypes": "local_storage,session_storage",
            }),
        )
        .await?;

        debug!(removed, service_domain, "Cleared stale site state before fresh login.");
        Ok(())
    }
}

/// Case-insensitive lookup of a request header in a CDP headers object.
fn header_value(headers: &Value, name: &str) -> Option<String> {
    headers.as_object()?.iter().find_map(|(k, v)| {
        if k.eq_ignore_ascii_case(name) {
            v.as_str().map(str::to_string)
        } else {
            None
        }
    })
}

fn extract_bearer(headers: &Value) -> Option<String> {
    let auth = header_value(headers, "authorization")?;
    let token = auth.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Does a cookie domain (possibly dot-prefixed) cover `host`, or vice versa?
pub fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let d = cookie_domain.trim_start_matches('.');
    host == d
        || host.ends_with(&format!(".{}", d))
        || d.ends_with(&format!(".{}", host))
}
