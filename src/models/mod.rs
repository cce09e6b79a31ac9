pub mod credentials;
pub mod message;

// Re-export the primary model types so code outside can do
// "use crate::models::{CredentialBundle, StoredSession};"
pub use credentials::{CredentialBundle, StoredSession};
pub use message::MessageKind;
