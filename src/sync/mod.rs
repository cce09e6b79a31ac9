pub mod manager;
pub mod state;

pub use manager::{MediaTask, SyncManager};
pub use state::SyncState;
