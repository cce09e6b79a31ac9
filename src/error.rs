//! Error taxonomy for the hakotalk client.
//!
//! Authentication *absence* is never an error: operations that merely fail to
//! produce data return `Ok(None)` (or `false`) so that callers iterating over
//! many endpoints are not aborted by a single expired session. The variants
//! here are reserved for conditions that require a caller decision.

use thiserror::Error;

use crate::browser::BrowserError;
use crate::client::group::VALID_GROUPS;

#[derive(Debug, Error)]
pub enum HakoError {
    /// Configuration error: the given group slug is not a known service.
    /// Raised immediately, never retried.
    #[error("invalid group '{0}': must be one of {VALID_GROUPS:?}")]
    InvalidGroup(String),

    /// The server explicitly invalidated this session (logged in elsewhere).
    /// Requires user action (re-login); must never trigger silent re-auth.
    #[error(
        "session has been invalidated; this usually happens after logging in \
         from another browser"
    )]
    SessionExpired,

    /// Upstream returned a 5xx: not the caller's credentials, retryable at a
    /// higher level.
    #[error("server error {status} at {endpoint}")]
    Api { status: u16, endpoint: String },

    /// Transport-level failure, distinct from an ordinary "no data" outcome.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Credential store failure surfaced from save/load/delete.
    #[error("credential store error: {0}")]
    Store(String),

    /// Local filesystem failure while writing the sync archive.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("browser automation error: {0}")]
    Browser(#[from] BrowserError),
}
