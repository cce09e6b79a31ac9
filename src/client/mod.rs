pub mod client;
pub mod group;
pub mod session;

// Re-export the client surface so code outside can do
// "use crate::client::{Client, ClientOptions, Group};"
pub use client::{Client, ClientOptions};
pub use group::{Group, GroupConfig, VALID_GROUPS};
pub use session::SessionState;
