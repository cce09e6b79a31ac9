pub mod browser_auth;

// Re-export so callers can do "use crate::auth::BrowserAuth;"
pub use browser_auth::{BrowserAuth, LoginOptions};
