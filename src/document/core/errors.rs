//! Error types for the document engine.

use thiserror::Error;

use crate::document::core::ids::{BlockId, ConversationId, NameIdError, UserId};

/// Document engine error type.
#[derive(Debug, Error)]
pub enum DocError {
    /// The actor does not own the target conversation or block.
    #[error("user {actor} is not authorized for conversation {conversation_id}")]
    Authorization {
        /// Acting user.
        actor: UserId,
        /// Conversation the actor tried to reach.
        conversation_id: ConversationId,
    },
    /// Referenced conversation does not exist.
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
    /// Referenced block does not exist.
    #[error("block {0} not found")]
    BlockNotFound(BlockId),
    /// No API key stored for the requested provider.
    #[error("no api key for provider {0}")]
    ApiKeyNotFound(String),
    /// Rich-document payload failed validation at the boundary.
    #[error("invalid content: {0}")]
    InvalidContent(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] NameIdError),
    /// Provider id is not wired to any model backend.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    /// Model invocation failed before or during streaming.
    #[error("provider error: {0}")]
    Provider(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Stored record could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// HTTP client error from Rig.
    #[error("http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// Completion error.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocError {
    /// Whether this error is one of the not-found family.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound(_) | Self::BlockNotFound(_) | Self::ApiKeyNotFound(_)
        )
    }
}

/// Convenience result alias for document operations.
pub type DocResult<T> = Result<T, DocError>;
