//! Chromium automation over the DevTools protocol.
//!
//! The session acquirer never fills a login form; it only needs four
//! capabilities from a real browser: launch a context, navigate, observe
//! network responses, and read cookies. This module provides exactly that
//! surface on top of a raw DevTools WebSocket, plus the process plumbing to
//! find and start a Chromium binary.

pub mod cdp;
pub mod launcher;
pub mod page;

pub use cdp::{CdpConnection, CdpEvent};
pub use launcher::{launch, BrowserHandle, LaunchOptions};
pub use page::{CapturedAuth, PageSession};

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no browser executable found (set HAKO_BROWSER or enable auto-install)")]
    ExecutableNotFound,

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("browser did not announce a DevTools endpoint within {0:?}")]
    EndpointTimeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("devtools protocol error: {0}")]
    Protocol(String),

    #[error("browser connection closed")]
    ConnectionClosed,

    #[error("browser install failed: {0}")]
    Install(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
