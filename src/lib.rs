//! Library exports for hakotalk, shared between the binary and tests.

pub mod auth;
pub mod browser;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod refresh;
pub mod store;
pub mod sync;
pub mod utils;
