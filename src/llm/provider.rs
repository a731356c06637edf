//! The model-provider seam.

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::document::access::ApiKey;
use crate::document::core::block::Author;
use crate::document::core::errors::DocResult;
use crate::document::core::ids::{ModelId, ProviderId};
use crate::llm::stream::StreamEvent;

/// Boxed future type for provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of events for one generation.
pub type ProviderStream = BoxStream<'static, StreamEvent>;

/// Speaker of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human turn.
    User,
    /// Model turn.
    Assistant,
}

impl From<Author> for Role {
    fn from(author: Author) -> Self {
        match author {
            Author::User => Self::User,
            Author::Assistant => Self::Assistant,
        }
    }
}

/// One turn sent to the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Markdown text.
    pub content: String,
}

impl ChatMessage {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A fully assembled generation request.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    /// Backend to use.
    pub provider: ProviderId,
    /// Model to use.
    pub model: ModelId,
    /// System preamble.
    pub preamble: String,
    /// Conversation turns, ending with a user turn.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Optional output cap.
    pub max_tokens: Option<u64>,
}

/// A backend able to stream completions.
pub trait ModelProvider: Send + Sync {
    /// Whether this backend can serve `provider` at all.
    fn supports(&self, provider: &ProviderId) -> bool;

    /// Whether `provider` needs a user API key.
    fn requires_api_key(&self, provider: &ProviderId) -> bool;

    /// Start a streamed completion.
    ///
    /// Failures before the first event are returned as errors; failures after
    /// it arrive as [`StreamEvent::Error`].
    ///
    /// # Errors
    /// Returns an error if the provider is unknown or the request cannot be sent.
    fn stream(
        &self,
        request: ModelRequest,
        api_key: Option<ApiKey>,
    ) -> ProviderFuture<'_, DocResult<ProviderStream>>;
}
