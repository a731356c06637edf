//! Per-user provider secrets.

use std::fmt;

use dashmap::DashMap;

use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::{ProviderId, UserId};
use crate::document::storage::StoreFuture;

/// A provider secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for handing to a provider client.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Looks up the key a user has configured for a provider.
pub trait ApiKeyStore: Send + Sync {
    /// Fetch the key.
    ///
    /// # Errors
    /// Returns `ApiKeyNotFound` when neither the user nor the deployment has one.
    fn get_api_key(
        &self,
        user_id: UserId,
        provider: &ProviderId,
    ) -> StoreFuture<'_, DocResult<ApiKey>>;
}

/// Keys held in memory: per-user entries over deployment-wide defaults.
#[derive(Default)]
pub struct InMemoryApiKeyStore {
    user_keys: DashMap<(UserId, ProviderId), ApiKey>,
    global_keys: DashMap<ProviderId, ApiKey>,
}

impl InMemoryApiKeyStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed deployment keys from `LIVEDOC_<PROVIDER>_API_KEY`.
    #[must_use]
    pub fn from_env(providers: &[ProviderId]) -> Self {
        let store = Self::new();
        for provider in providers {
            let var = format!(
                "LIVEDOC_{}_API_KEY",
                provider.as_str().to_ascii_uppercase().replace('-', "_")
            );
            if let Ok(secret) = std::env::var(&var)
                && !secret.trim().is_empty()
            {
                store.set_global_key(provider.clone(), ApiKey::new(secret));
            }
        }
        store
    }

    /// Store a key for one user.
    pub fn set_user_key(&self, user_id: UserId, provider: ProviderId, key: ApiKey) {
        self.user_keys.insert((user_id, provider), key);
    }

    /// Store a deployment-wide key.
    pub fn set_global_key(&self, provider: ProviderId, key: ApiKey) {
        self.global_keys.insert(provider, key);
    }
}

impl ApiKeyStore for InMemoryApiKeyStore {
    fn get_api_key(
        &self,
        user_id: UserId,
        provider: &ProviderId,
    ) -> StoreFuture<'_, DocResult<ApiKey>> {
        let found = self
            .user_keys
            .get(&(user_id, provider.clone()))
            .map(|entry| entry.value().clone())
            .or_else(|| {
                self.global_keys
                    .get(provider)
                    .map(|entry| entry.value().clone())
            })
            .ok_or_else(|| DocError::ApiKeyNotFound(provider.to_string()));
        Box::pin(async move { found })
    }
}
