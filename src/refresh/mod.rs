pub mod base;
pub mod browser_refresh;
pub mod cookie_refresh;
pub mod token_refresh;

// Re-export from base.rs so we can do "use crate::refresh::*;"
pub use base::{
    build_strategies, RefreshContext, RefreshOutcome, RefreshStrategy, TokenGrant,
};
