//! Chromium process discovery and launch.
//!
//! A launched browser announces its DevTools WebSocket endpoint on stderr;
//! we scrape it and hand back a live [`CdpConnection`] together with the
//! child process so callers can always tear the pair down.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::cdp::CdpConnection;
use super::BrowserError;

const ENDPOINT_WAIT: Duration = Duration::from_secs(20);
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Default desktop user agent presented by automated contexts.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Persistent profile directory; an ephemeral temp profile is used when
    /// absent.
    pub profile_dir: Option<PathBuf>,
    /// Browser channel ("chrome", "msedge", "chromium").
    pub channel: Option<String>,
    /// Attempt a one-time browser install when no executable is found.
    pub auto_install: bool,
}

/// A running browser plus its DevTools connection. The ephemeral profile
/// temp dir (when used) lives exactly as long as the handle.
pub struct BrowserHandle {
    pub cdp: CdpConnection,
    child: Child,
    _ephemeral_profile: Option<TempDir>,
}

impl BrowserHandle {
    /// Best-effort shutdown: ask politely over the protocol, then make sure
    /// the process is gone. Never fails.
    pub async fn close(mut self) {
        let polite = self
            .cdp
            .execute("Browser.close", None, serde_json::json!({}));
        if tokio::time::timeout(CLOSE_GRACE, polite).await.is_err() {
            debug!("Browser.close timed out; killing process.");
        }
        if let Err(e) = self.child.kill().await {
            debug!("Browser process kill failed (likely already exited): {}", e);
        }
    }
}

/// Launch a browser context. Retries exactly once after an install when the
/// executable is missing and `auto_install` is set.
pub async fn launch(options: &LaunchOptions) -> Result<BrowserHandle, BrowserError> {
    let executable = match resolve_executable(options.channel.as_deref()) {
        Some(path) => path,
        None if options.auto_install => {
            install_browser().await?;
            resolve_executable(options.channel.as_deref())
                .ok_or(BrowserError::ExecutableNotFound)?
        }
        None => return Err(BrowserError::ExecutableNotFound),
    };
    info!(executable = %executable.display(), headless = options.headless, "Launching browser");

    let ephemeral = match &options.profile_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            None
        }
        None => Some(TempDir::new()?),
    };
    let profile = options
        .profile_dir
        .clone()
        .unwrap_or_else(|| ephemeral.as_ref().expect("ephemeral profile").path().to_path_buf());

    let mut cmd = Command::new(&executable);
    cmd.arg("--remote-debugging-port=0")
        .arg(format!("--user-data-dir={}", profile.display()))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-infobars")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-software-rasterizer")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--window-size=1280,800")
        .arg(format!("--user-agent={}", DEFAULT_USER_AGENT));
    if options.headless {
        cmd.arg("--headless=new");
    }
    cmd.arg("about:blank");
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| BrowserError::Launch(format!("{}: {}", executable.display(), e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BrowserError::Launch("stderr not captured".to_string()))?;

    let ws_url = match tokio::time::timeout(ENDPOINT_WAIT, scrape_endpoint(stderr)).await {
        Ok(Ok(url)) => url,
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(e);
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(BrowserError::EndpointTimeout(ENDPOINT_WAIT));
        }
    };
    debug!("DevTools endpoint: {}", redact_endpoint(&ws_url));

    let cdp = match CdpConnection::connect(&ws_url).await {
        Ok(conn) => conn,
        Err(e) => {
            let _ = child.kill().await;
            return Err(e);
        }
    };

    Ok(BrowserHandle {
        cdp,
        child,
        _ephemeral_profile: ephemeral,
    })
}

async fn scrape_endpoint(
    stderr: tokio::process::ChildStderr,
) -> Result<String, BrowserError> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(rest) = line.strip_prefix("DevTools listening on ") {
            return Ok(rest.trim().to_string());
        }
    }
    Err(BrowserError::Launch(
        "browser exited before announcing a DevTools endpoint".to_string(),
    ))
}

/// The endpoint path contains a per-launch GUID; keep logs to the authority.
fn redact_endpoint(ws_url: &str) -> String {
    match ws_url.find("/devtools/") {
        Some(idx) => format!("{}/devtools/...", &ws_url[..idx]),
        None => ws_url.to_string(),
    }
}

/// Locate a Chromium-family executable: explicit env override, requested
/// channel, well-known names on PATH, then the Playwright download cache.
pub fn resolve_executable(channel: Option<&str>) -> Option<PathBuf> {
    if let Ok(path) = std::env::var("HAKO_BROWSER") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        warn!(path = %path.display(), "HAKO_BROWSER does not point at an executable; ignoring.");
    }

    let names: &[&str] = match channel {
        Some("chrome") => &["google-chrome", "google-chrome-stable", "chrome"],
        Some("msedge") => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        Some("chromium") | None => &[
            "chromium",
            "chromium-browser",
            "google-chrome",
            "google-chrome-stable",
        ],
        Some(other) => {
            warn!("Unknown browser channel '{}'; searching defaults.", other);
            &["chromium", "chromium-browser", "google-chrome"]
        }
    };

    for name in names {
        if let Some(found) = find_in_path(name) {
            return Some(found);
        }
    }

    #[cfg(target_os = "macos")]
    {
        let mac_candidates = [
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ];
        for candidate in mac_candidates {
            let path = PathBuf::from(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
    }

    playwright_cache_chromium()
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Chromium builds installed by `playwright install` land in a versioned
/// cache directory; pick any one of them.
fn playwright_cache_chromium() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from)?;
    let cache = if cfg!(target_os = "macos") {
        home.join("Library/Caches/ms-playwright")
    } else {
        home.join(".cache/ms-playwright")
    };
    let entries = std::fs::read_dir(&cache).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("chromium") {
            continue;
        }
        let candidates = [
            entry.path().join("chrome-linux/chrome"),
            entry.path().join("chrome-linux/headless_shell"),
            entry.path().join("chrome-mac/Chromium.app/Contents/MacOS/Chromium"),
        ];
        for candidate in candidates {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// One-shot Chromium install through the Playwright CLI (the same supply
/// chain the service's own tooling uses). Any failure is terminal for the
/// calling refresh.
async fn install_browser() -> Result<(), BrowserError> {
    info!("No browser executable found; attempting one-time install via playwright.");
    let status = Command::new("npx")
        .args(["--yes", "playwright", "install", "chromium"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| BrowserError::Install(format!("failed to run npx: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(BrowserError::Install(format!(
            "playwright install exited with {}",
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_endpoint_strips_guid() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc-def-123";
        assert_eq!(redact_endpoint(url), "ws://127.0.0.1:9222/devtools/...");
    }

    #[test]
    fn test_find_in_path_misses_unknown_binary() {
        assert!(find_in_path("definitely-not-a-browser-binary-xyz").is_none());
    }
}
