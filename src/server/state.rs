//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::document::access::{ApiKeyStore, InMemoryApiKeyStore, OwnerAuthorizer};
use crate::document::core::config::AppConfig;
use crate::document::core::errors::DocResult;
use crate::document::engine::{BlockService, ChangeHub, GenerationSettings, ResponseCoordinator};
use crate::document::storage::{
    BlockStore, ConversationStore, Database, SqliteBlockStore, SqliteConversationStore,
};
use crate::llm::{ModelProvider, RigProvider};

/// Shared application state.
pub struct AppState {
    /// Block and conversation operations.
    pub service: BlockService,
    /// Generation entry points.
    pub coordinator: ResponseCoordinator,
    /// Loaded configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Open storage and wire the rig-backed provider.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: AppConfig) -> DocResult<Arc<Self>> {
        let db = Database::open(&config.storage.sqlite_path).await?;
        let provider: Arc<dyn ModelProvider> = Arc::new(RigProvider::from_config(&config.llm));
        let api_keys: Arc<dyn ApiKeyStore> =
            Arc::new(InMemoryApiKeyStore::from_env(&RigProvider::supported()));
        Ok(Self::from_parts(config, &db, provider, api_keys))
    }

    /// Wire state from explicit collaborators.
    #[must_use]
    pub fn from_parts(
        config: AppConfig,
        db: &Database,
        provider: Arc<dyn ModelProvider>,
        api_keys: Arc<dyn ApiKeyStore>,
    ) -> Arc<Self> {
        let conversations: Arc<dyn ConversationStore> = Arc::new(SqliteConversationStore::new(db));
        let blocks: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::new(db));
        let authorizer = Arc::new(OwnerAuthorizer::new(conversations.clone()));
        let changes = ChangeHub::new(config.streaming.change_capacity);

        let service = BlockService::new(conversations, blocks, authorizer, changes);
        let settings = GenerationSettings::from_config(&config.llm, &config.streaming);
        let coordinator = ResponseCoordinator::new(service.clone(), provider, api_keys, settings);

        Arc::new(Self {
            service,
            coordinator,
            config,
        })
    }
}
