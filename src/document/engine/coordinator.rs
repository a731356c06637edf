//! Streaming Response Coordinator.
//!
//! A generation runs in two halves. The triggering call authorizes, reads the
//! API key, assembles the context and inserts the placeholder, then returns.
//! A background task streams the model output into the placeholder and
//! finalizes it (or marks the conversation as failed).
//!
//! Streaming writes go through a `watch` channel drained by a writer task:
//! the model stream never waits on storage, intermediate texts may be
//! coalesced, and the latest text is always written before the task ends.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::document::access::{ApiKey, ApiKeyStore};
use crate::document::core::block::{BlockMetadata, TokenUsage};
use crate::document::core::config::{LlmConfig, StreamingConfig};
use crate::document::core::conversation::{ConversationStatus, derive_title};
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::{BlockId, ConversationId, ModelId, ProviderId, StreamId, UserId};
use crate::document::engine::blocks::BlockService;
use crate::document::engine::changes::ChangeKind;
use crate::document::engine::context::build_messages;
use crate::document::markdown::markdown_to_document_async;
use crate::llm::provider::{ChatMessage, ModelProvider, ModelRequest};
use crate::llm::stream::StreamEvent;

/// Fixed parameters applied to every generation.
#[derive(Clone, Debug)]
pub struct GenerationSettings {
    /// System preamble.
    pub preamble: String,
    /// User turn appended after a trailing assistant turn.
    pub continue_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Optional output cap.
    pub max_tokens: Option<u64>,
}

impl GenerationSettings {
    /// Settings from the loaded configuration.
    #[must_use]
    pub fn from_config(llm: &LlmConfig, streaming: &StreamingConfig) -> Self {
        Self {
            preamble: streaming.system_preamble.clone(),
            continue_prompt: streaming.continue_prompt.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }
}

/// Which model to run.
#[derive(Clone, Debug)]
pub struct ModelSelection {
    /// Backend.
    pub provider: ProviderId,
    /// Model on that backend.
    pub model: ModelId,
}

/// How a background generation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The block holds the finished rich content.
    Completed {
        /// Full generated Markdown.
        text: String,
    },
    /// The conversation is in `error` status.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// A generation that has been started.
#[derive(Debug)]
pub struct GenerationHandle {
    /// Conversation being written.
    pub conversation_id: ConversationId,
    /// Placeholder receiving the output.
    pub block_id: BlockId,
    /// Stream correlation id.
    pub stream_id: StreamId,
    /// Background task; awaiting it is optional.
    pub task: JoinHandle<GenerationOutcome>,
}

/// Starts generations and drives them to completion.
#[derive(Clone)]
pub struct ResponseCoordinator {
    service: BlockService,
    provider: Arc<dyn ModelProvider>,
    api_keys: Arc<dyn ApiKeyStore>,
    settings: GenerationSettings,
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ResponseCoordinator {
    /// Wire the coordinator to its collaborators.
    #[must_use]
    pub fn new(
        service: BlockService,
        provider: Arc<dyn ModelProvider>,
        api_keys: Arc<dyn ApiKeyStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            service,
            provider,
            api_keys,
            settings,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Append a user block holding `text` and generate a reply.
    ///
    /// Without a conversation id a new conversation is created, titled after
    /// the first line of `text`.
    ///
    /// # Errors
    /// Returns authorization, not-found, API key or storage errors.
    pub async fn send_message(
        &self,
        actor: UserId,
        conversation_id: Option<ConversationId>,
        text: &str,
        selection: ModelSelection,
    ) -> DocResult<GenerationHandle> {
        if text.trim().is_empty() {
            return Err(DocError::InvalidContent("message must not be empty".to_string()));
        }
        self.ensure_supported(&selection)?;

        let conversation_id = match conversation_id {
            Some(id) => id,
            None => {
                self.service
                    .create_conversation(actor, Some(derive_title(text)))
                    .await?
                    .id
            }
        };

        let block = self
            .service
            .create_user_block(actor, conversation_id, None)
            .await?;
        let content = markdown_to_document_async(text.to_string()).await;
        self.service
            .update_content(actor, block.id, content)
            .await?;

        self.generate_block_response(actor, conversation_id, selection, None)
            .await
    }

    /// Generate an assistant block from the current document without adding
    /// user text.
    ///
    /// # Errors
    /// Returns authorization, not-found, API key or storage errors. Provider
    /// failures surface later through the conversation status.
    pub async fn generate_block_response(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        selection: ModelSelection,
        after_order: Option<f64>,
    ) -> DocResult<GenerationHandle> {
        self.service.get_conversation(actor, conversation_id).await?;
        self.ensure_supported(&selection)?;

        let api_key = if self.provider.requires_api_key(&selection.provider) {
            Some(
                self.api_keys
                    .get_api_key(actor, &selection.provider)
                    .await?,
            )
        } else {
            None
        };

        let blocks = self
            .service
            .list_included_ordered(actor, conversation_id)
            .await?;
        let mut messages = build_messages(&blocks, &self.settings.continue_prompt);
        if messages.is_empty() {
            messages.push(ChatMessage::user(self.settings.continue_prompt.clone()));
        }

        let placeholder = self
            .service
            .create_assistant_placeholder(actor, conversation_id, after_order, &selection.model)
            .await?;
        let stream_id = placeholder
            .stream_id
            .ok_or_else(|| DocError::CorruptRecord("placeholder without stream id".to_string()))?;

        let request = ModelRequest {
            provider: selection.provider,
            model: selection.model,
            preamble: self.settings.preamble.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        info!(
            %conversation_id,
            block_id = %placeholder.id,
            %stream_id,
            provider = %request.provider,
            model = %request.model,
            "generation started"
        );

        let span = info_span!(
            "generation",
            %conversation_id,
            block_id = %placeholder.id,
            %stream_id
        );
        let this = self.clone();
        let block_id = placeholder.id;
        let task = tokio::spawn(
            async move {
                this.run_serialized(conversation_id, block_id, request, api_key)
                    .await
            }
            .instrument(span),
        );

        Ok(GenerationHandle {
            conversation_id,
            block_id,
            stream_id,
            task,
        })
    }

    fn ensure_supported(&self, selection: &ModelSelection) -> DocResult<()> {
        if self.provider.supports(&selection.provider) {
            Ok(())
        } else {
            Err(DocError::UnsupportedProvider(selection.provider.to_string()))
        }
    }

    async fn run_serialized(
        &self,
        conversation_id: ConversationId,
        block_id: BlockId,
        request: ModelRequest,
        api_key: Option<ApiKey>,
    ) -> GenerationOutcome {
        let lock = self.locks.entry(conversation_id).or_default().clone();
        let outcome = {
            let _guard = lock.lock().await;
            self.run(conversation_id, block_id, request, api_key).await
        };
        drop(lock);
        self.locks
            .remove_if(&conversation_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn run(
        &self,
        conversation_id: ConversationId,
        block_id: BlockId,
        request: ModelRequest,
        api_key: Option<ApiKey>,
    ) -> GenerationOutcome {
        let model = request.model.to_string();

        if let Err(err) = self
            .service
            .set_status(conversation_id, ConversationStatus::Streaming)
            .await
        {
            return self.fail(conversation_id, &err.to_string()).await;
        }

        let (sender, receiver) = watch::channel(String::new());
        let writer = tokio::spawn(write_streaming(
            self.service.clone(),
            conversation_id,
            block_id,
            receiver,
        ));

        let consumed = self.consume(request, api_key, &sender).await;

        // Closing the channel lets the writer flush the latest text and exit.
        drop(sender);
        if let Err(err) = writer.await {
            warn!(error = %err, "streaming writer task failed");
        }

        match consumed {
            Ok((text, finish_reason, usage)) => {
                match self
                    .finalize(conversation_id, block_id, &text, model, finish_reason, usage)
                    .await
                {
                    Ok(()) => {
                        if let Err(err) = self
                            .service
                            .set_status(conversation_id, ConversationStatus::Completed)
                            .await
                        {
                            warn!(error = %err, "could not mark conversation completed");
                        }
                        info!(chars = text.len(), "generation completed");
                        GenerationOutcome::Completed { text }
                    }
                    Err(err) => self.fail(conversation_id, &err.to_string()).await,
                }
            }
            Err(reason) => self.fail(conversation_id, &reason).await,
        }
    }

    /// Read the provider stream to its end, publishing the running text.
    async fn consume(
        &self,
        request: ModelRequest,
        api_key: Option<ApiKey>,
        sender: &watch::Sender<String>,
    ) -> Result<(String, Option<String>, Option<TokenUsage>), String> {
        let mut stream = self
            .provider
            .stream(request, api_key)
            .await
            .map_err(|err| err.to_string())?;

        // Raise the streaming flag before the first fragment arrives.
        sender.send_replace(String::new());

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { text: fragment } => {
                    text.push_str(&fragment);
                    sender.send_replace(text.clone());
                }
                StreamEvent::Finish {
                    finish_reason,
                    usage,
                } => return Ok((text, finish_reason, usage)),
                StreamEvent::Error { message } => return Err(message),
            }
        }

        debug!("provider stream ended without a finish event");
        Ok((text, None, None))
    }

    async fn finalize(
        &self,
        conversation_id: ConversationId,
        block_id: BlockId,
        text: &str,
        model: String,
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
    ) -> DocResult<()> {
        let content = markdown_to_document_async(text.to_string()).await;
        let metadata = BlockMetadata {
            model: Some(model),
            tokens: usage,
            finish_reason,
        };
        self.service
            .block_store()
            .finalize(block_id, &content, &metadata, Utc::now())
            .await?;
        self.service
            .changes()
            .block(conversation_id, block_id, ChangeKind::Finalized);
        Ok(())
    }

    /// Mark the conversation failed. The block keeps whatever was last
    /// written, including a raised streaming flag.
    async fn fail(&self, conversation_id: ConversationId, reason: &str) -> GenerationOutcome {
        warn!(%reason, "generation failed");
        if let Err(err) = self
            .service
            .set_status(conversation_id, ConversationStatus::Error)
            .await
        {
            warn!(error = %err, "could not mark conversation as failed");
        }
        GenerationOutcome::Failed {
            reason: reason.to_string(),
        }
    }
}

async fn write_streaming(
    service: BlockService,
    conversation_id: ConversationId,
    block_id: BlockId,
    mut receiver: watch::Receiver<String>,
) {
    while receiver.changed().await.is_ok() {
        let text = receiver.borrow_and_update().clone();
        let written = service
            .block_store()
            .write_streaming(block_id, text, Utc::now())
            .await;
        match written {
            Ok(()) => {
                service
                    .changes()
                    .block(conversation_id, block_id, ChangeKind::StreamingUpdated);
            }
            Err(err) => warn!(%block_id, error = %err, "streaming write dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::DateTime;

    use crate::document::access::{InMemoryApiKeyStore, OwnerAuthorizer};
    use crate::document::core::block::{Author, Block};
    use crate::document::core::rich::{Node, RichDocument};
    use crate::document::engine::blocks::tests::service;
    use crate::document::engine::changes::ChangeHub;
    use crate::document::markdown::markdown_to_document;
    use crate::document::storage::{
        BlockStore, ConversationStore, Database, SqliteBlockStore, SqliteConversationStore,
        StoreFuture,
    };
    use crate::llm::provider::Role;
    use crate::llm::scripted::ScriptedProvider;

    /// Block store whose streaming writes are slow and recorded.
    struct SlowWrites {
        inner: SqliteBlockStore,
        delay: Duration,
        written: std::sync::Mutex<Vec<String>>,
    }

    impl BlockStore for SlowWrites {
        fn insert(&self, block: &Block) -> StoreFuture<'_, DocResult<()>> {
            self.inner.insert(block)
        }

        fn get(&self, id: BlockId) -> StoreFuture<'_, DocResult<Option<Block>>> {
            self.inner.get(id)
        }

        fn list_ordered(
            &self,
            conversation_id: ConversationId,
        ) -> StoreFuture<'_, DocResult<Vec<Block>>> {
            self.inner.list_ordered(conversation_id)
        }

        fn list_included_ordered(
            &self,
            conversation_id: ConversationId,
        ) -> StoreFuture<'_, DocResult<Vec<Block>>> {
            self.inner.list_included_ordered(conversation_id)
        }

        fn order_bounds(
            &self,
            conversation_id: ConversationId,
            after: Option<f64>,
        ) -> StoreFuture<'_, DocResult<(Option<f64>, Option<f64>)>> {
            self.inner.order_bounds(conversation_id, after)
        }

        fn replace_content(
            &self,
            id: BlockId,
            content: &RichDocument,
            at: DateTime<Utc>,
        ) -> StoreFuture<'_, DocResult<()>> {
            self.inner.replace_content(id, content, at)
        }

        fn set_excluded(
            &self,
            id: BlockId,
            is_excluded: bool,
            at: DateTime<Utc>,
        ) -> StoreFuture<'_, DocResult<()>> {
            self.inner.set_excluded(id, is_excluded, at)
        }

        fn write_streaming(
            &self,
            id: BlockId,
            text: String,
            at: DateTime<Utc>,
        ) -> StoreFuture<'_, DocResult<()>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.written.lock().unwrap().push(text.clone());
                self.inner.write_streaming(id, text, at).await
            })
        }

        fn finalize(
            &self,
            id: BlockId,
            content: &RichDocument,
            metadata: &BlockMetadata,
            at: DateTime<Utc>,
        ) -> StoreFuture<'_, DocResult<()>> {
            self.inner.finalize(id, content, metadata, at)
        }

        fn delete(&self, id: BlockId) -> StoreFuture<'_, DocResult<()>> {
            self.inner.delete(id)
        }
    }

    async fn service_with_slow_writes(delay: Duration) -> (BlockService, Arc<SlowWrites>) {
        let db = Database::open_in_memory().await.unwrap();
        let conversations: Arc<dyn ConversationStore> =
            Arc::new(SqliteConversationStore::new(&db));
        let slow = Arc::new(SlowWrites {
            inner: SqliteBlockStore::new(&db),
            delay,
            written: std::sync::Mutex::new(Vec::new()),
        });
        let blocks: Arc<dyn BlockStore> = slow.clone();
        let authorizer = Arc::new(OwnerAuthorizer::new(conversations.clone()));
        let service = BlockService::new(conversations, blocks, authorizer, ChangeHub::new(64));
        (service, slow)
    }

    fn settings() -> GenerationSettings {
        GenerationSettings {
            preamble: "system".to_string(),
            continue_prompt: "Continue".to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    fn selection() -> ModelSelection {
        ModelSelection {
            provider: ProviderId::new("ollama").unwrap(),
            model: ModelId::new("llama3.1:8b").unwrap(),
        }
    }

    fn finish() -> StreamEvent {
        StreamEvent::Finish {
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage {
                input: 12,
                output: 2,
            }),
        }
    }

    async fn coordinator(
        provider: Arc<ScriptedProvider>,
    ) -> (ResponseCoordinator, BlockService, Arc<InMemoryApiKeyStore>) {
        let service = service().await;
        let keys = Arc::new(InMemoryApiKeyStore::new());
        let coordinator =
            ResponseCoordinator::new(service.clone(), provider, keys.clone(), settings());
        (coordinator, service, keys)
    }

    async fn seed_text(
        service: &BlockService,
        actor: UserId,
        conversation_id: ConversationId,
        author: Author,
        text: &str,
    ) -> Block {
        let block = match author {
            Author::User => service
                .create_user_block(actor, conversation_id, None)
                .await
                .unwrap(),
            Author::Assistant => service
                .create_assistant_placeholder(
                    actor,
                    conversation_id,
                    None,
                    &ModelId::new("m").unwrap(),
                )
                .await
                .unwrap(),
        };
        let content = RichDocument::new(vec![Node::paragraph(vec![Node::text(text)])]);
        service.update_content(actor, block.id, content).await.unwrap()
    }

    #[tokio::test]
    async fn test_stream_finalizes_block() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            StreamEvent::delta("Hel"),
            StreamEvent::delta("lo"),
            finish(),
        ]));
        let (coordinator, service, _) = coordinator(provider.clone()).await;
        let actor = UserId::new();

        let handle = coordinator
            .send_message(actor, None, "Say hello", selection())
            .await
            .unwrap();
        let outcome = handle.task.await.unwrap();
        assert_eq!(
            outcome,
            GenerationOutcome::Completed {
                text: "Hello".to_string()
            }
        );

        let block = service.get_block(actor, handle.block_id).await.unwrap();
        assert!(!block.is_streaming);
        assert!(block.streaming_content.is_none());
        assert!(block.stream_id.is_none());
        assert_eq!(block.content, Some(markdown_to_document("Hello")));
        let metadata = block.metadata.unwrap();
        assert_eq!(metadata.model.as_deref(), Some("llama3.1:8b"));
        assert_eq!(metadata.finish_reason.as_deref(), Some("stop"));
        assert_eq!(metadata.tokens.map(|usage| usage.total()), Some(14));

        let conversation = service
            .get_conversation(actor, handle.conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.title, "Say hello");

        let (request, key) = provider.recorded().remove(0);
        assert!(key.is_none());
        assert_eq!(request.preamble, "system");
        assert_eq!(request.messages, vec![ChatMessage::user("Say hello")]);
    }

    #[tokio::test]
    async fn test_trailing_assistant_gets_continue_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![finish()]));
        let (coordinator, service, _) = coordinator(provider.clone()).await;
        let actor = UserId::new();
        let conversation = service.create_conversation(actor, None).await.unwrap();
        seed_text(&service, actor, conversation.id, Author::User, "question").await;
        seed_text(&service, actor, conversation.id, Author::Assistant, "answer").await;

        let handle = coordinator
            .generate_block_response(actor, conversation.id, selection(), None)
            .await
            .unwrap();
        handle.task.await.unwrap();

        let (request, _) = provider.recorded().remove(0);
        let last = request.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "Continue");
        assert_eq!(request.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_excluded_blocks_stay_out_of_context() {
        let provider = Arc::new(ScriptedProvider::new(vec![finish()]));
        let (coordinator, service, _) = coordinator(provider.clone()).await;
        let actor = UserId::new();
        let conversation = service.create_conversation(actor, None).await.unwrap();
        let hidden =
            seed_text(&service, actor, conversation.id, Author::User, "secret draft").await;
        seed_text(&service, actor, conversation.id, Author::User, "real question").await;
        service
            .toggle_exclusion(actor, hidden.id, true)
            .await
            .unwrap();

        let handle = coordinator
            .generate_block_response(actor, conversation.id, selection(), None)
            .await
            .unwrap();
        handle.task.await.unwrap();

        let (request, _) = provider.recorded().remove(0);
        assert_eq!(request.messages, vec![ChatMessage::user("real question")]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_block() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            StreamEvent::delta("partial"),
            StreamEvent::error("upstream reset"),
        ]));
        let (coordinator, service, _) = coordinator(provider).await;
        let actor = UserId::new();

        let handle = coordinator
            .send_message(actor, None, "hi", selection())
            .await
            .unwrap();
        let outcome = handle.task.await.unwrap();
        assert_eq!(
            outcome,
            GenerationOutcome::Failed {
                reason: "upstream reset".to_string()
            }
        );

        let conversation = service
            .get_conversation(actor, handle.conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.status, ConversationStatus::Error);

        let block = service.get_block(actor, handle.block_id).await.unwrap();
        assert!(block.is_streaming);
        assert_eq!(block.streaming_content.as_deref(), Some("partial"));
        assert!(block.content.is_none());
    }

    #[tokio::test]
    async fn test_provider_start_failure_marks_error() {
        let provider = Arc::new(ScriptedProvider::failing_to_start());
        let (coordinator, service, _) = coordinator(provider).await;
        let actor = UserId::new();

        let handle = coordinator
            .send_message(actor, None, "hi", selection())
            .await
            .unwrap();
        assert!(matches!(
            handle.task.await.unwrap(),
            GenerationOutcome::Failed { .. }
        ));
        let conversation = service
            .get_conversation(actor, handle.conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.status, ConversationStatus::Error);
    }

    #[tokio::test]
    async fn test_api_key_read_once_and_passed_through() {
        let provider = Arc::new(ScriptedProvider::new(vec![finish()]).with_key_required());
        let (coordinator, service, keys) = coordinator(provider.clone()).await;
        let actor = UserId::new();
        let conversation = service.create_conversation(actor, None).await.unwrap();
        seed_text(&service, actor, conversation.id, Author::User, "q").await;

        let missing = coordinator
            .generate_block_response(actor, conversation.id, selection(), None)
            .await;
        assert!(matches!(missing, Err(DocError::ApiKeyNotFound(_))));
        assert_eq!(
            service
                .list_ordered(actor, conversation.id)
                .await
                .unwrap()
                .len(),
            1
        );

        keys.set_user_key(actor, selection().provider, ApiKey::new("sk-test"));
        let handle = coordinator
            .generate_block_response(actor, conversation.id, selection(), None)
            .await
            .unwrap();
        handle.task.await.unwrap();
        let (_, key) = provider.recorded().remove(0);
        assert_eq!(key.as_ref().map(ApiKey::expose), Some("sk-test"));
    }

    #[tokio::test]
    async fn test_foreign_actor_cannot_generate() {
        let provider = Arc::new(ScriptedProvider::new(vec![finish()]));
        let (coordinator, service, _) = coordinator(provider).await;
        let owner = UserId::new();
        let conversation = service.create_conversation(owner, None).await.unwrap();

        assert!(matches!(
            coordinator
                .generate_block_response(UserId::new(), conversation.id, selection(), None)
                .await,
            Err(DocError::Authorization { .. })
        ));
        assert!(matches!(
            coordinator
                .send_message(UserId::new(), Some(conversation.id), "x", selection())
                .await,
            Err(DocError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_generations_on_one_conversation_run_in_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            StreamEvent::delta("ok"),
            finish(),
        ]));
        let (coordinator, service, _) = coordinator(provider).await;
        let actor = UserId::new();
        let first = coordinator
            .send_message(actor, None, "one", selection())
            .await
            .unwrap();
        let second = coordinator
            .generate_block_response(actor, first.conversation_id, selection(), None)
            .await
            .unwrap();

        assert!(matches!(
            first.task.await.unwrap(),
            GenerationOutcome::Completed { .. }
        ));
        assert!(matches!(
            second.task.await.unwrap(),
            GenerationOutcome::Completed { .. }
        ));

        let blocks = service
            .list_ordered(actor, first.conversation_id)
            .await
            .unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|block| !block.is_streaming));
        assert!(coordinator.locks.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_provider_rejected_before_any_write() {
        let provider = Arc::new(ScriptedProvider::new(vec![finish()]));
        let (coordinator, service, _) = coordinator(provider.clone()).await;
        let actor = UserId::new();
        let mystery = ModelSelection {
            provider: ProviderId::new("mystery").unwrap(),
            model: ModelId::new("m").unwrap(),
        };

        assert!(matches!(
            coordinator
                .send_message(actor, None, "hello", mystery.clone())
                .await,
            Err(DocError::UnsupportedProvider(_))
        ));
        assert!(service.list_conversations(actor).await.unwrap().is_empty());

        let conversation = service.create_conversation(actor, None).await.unwrap();
        seed_text(&service, actor, conversation.id, Author::User, "q").await;
        assert!(matches!(
            coordinator
                .generate_block_response(actor, conversation.id, mystery, None)
                .await,
            Err(DocError::UnsupportedProvider(_))
        ));
        assert_eq!(
            service
                .list_ordered(actor, conversation.id)
                .await
                .unwrap()
                .len(),
            1
        );
        let conversation = service
            .get_conversation(actor, conversation.id)
            .await
            .unwrap();
        assert_eq!(conversation.status, ConversationStatus::Idle);
        assert!(provider.recorded().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_slow_writes_coalesce_and_keep_latest_text() {
        let fragments = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        let mut events: Vec<StreamEvent> = fragments.iter().map(|f| StreamEvent::delta(*f)).collect();
        events.push(StreamEvent::error("cut off"));
        let provider =
            Arc::new(ScriptedProvider::new(events).with_delay(Duration::from_millis(5)));
        let (service, slow) = service_with_slow_writes(Duration::from_millis(30)).await;
        let coordinator = ResponseCoordinator::new(
            service.clone(),
            provider,
            Arc::new(InMemoryApiKeyStore::new()),
            settings(),
        );
        let actor = UserId::new();

        let handle = coordinator
            .send_message(actor, None, "count", selection())
            .await
            .unwrap();
        assert!(matches!(
            handle.task.await.unwrap(),
            GenerationOutcome::Failed { .. }
        ));

        let written = slow.written.lock().unwrap().clone();
        assert_eq!(written.last().map(String::as_str), Some("abcdefghij"));
        assert!(written.len() < fragments.len());
        assert!(written.windows(2).all(|pair| pair[1].starts_with(&pair[0])));

        let block = service.get_block(actor, handle.block_id).await.unwrap();
        assert_eq!(block.streaming_content.as_deref(), Some("abcdefghij"));
        assert!(block.is_streaming);
    }
}
