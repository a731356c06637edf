//! Collaborator seams: ownership checks and provider secrets.

pub mod api_keys;
pub mod authorizer;

pub use api_keys::{ApiKey, ApiKeyStore, InMemoryApiKeyStore};
pub use authorizer::{Authorizer, OwnerAuthorizer};
