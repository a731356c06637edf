//! Block Store operations: every call is scoped to a conversation and checked
//! against the acting user before it touches storage.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::document::access::Authorizer;
use crate::document::core::block::Block;
use crate::document::core::config::TokenConfig;
use crate::document::core::conversation::{Conversation, ConversationStatus, DEFAULT_TITLE};
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::{BlockId, ConversationId, ModelId, UserId};
use crate::document::core::rich::RichDocument;
use crate::document::engine::changes::{ChangeHub, ChangeKind, ConversationChange};
use crate::document::engine::context::block_markdown;
use crate::document::ordering::{allocate_order, has_room_between};
use crate::document::storage::{BlockStore, ConversationStore};
use crate::document::tokens::ContextUsage;

/// Authorized access to conversations and their blocks.
#[derive(Clone)]
pub struct BlockService {
    conversations: Arc<dyn ConversationStore>,
    blocks: Arc<dyn BlockStore>,
    authorizer: Arc<dyn Authorizer>,
    changes: ChangeHub,
}

impl BlockService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        blocks: Arc<dyn BlockStore>,
        authorizer: Arc<dyn Authorizer>,
        changes: ChangeHub,
    ) -> Self {
        Self {
            conversations,
            blocks,
            authorizer,
            changes,
        }
    }

    /// Change feed the service publishes to.
    #[must_use]
    pub const fn changes(&self) -> &ChangeHub {
        &self.changes
    }

    pub(crate) fn block_store(&self) -> &Arc<dyn BlockStore> {
        &self.blocks
    }

    // ----- conversations -----------------------------------------------------

    /// Create an idle conversation owned by `actor`.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn create_conversation(
        &self,
        actor: UserId,
        title: Option<String>,
    ) -> DocResult<Conversation> {
        let title = title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let conversation = Conversation::new(actor, title);
        self.conversations.create(&conversation).await?;
        info!(conversation_id = %conversation.id, user_id = %actor, "conversation created");
        Ok(conversation)
    }

    /// Fetch a conversation the actor owns.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn get_conversation(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> DocResult<Conversation> {
        self.authorizer.authorize(actor, conversation_id).await
    }

    /// The actor's conversations, most recent first.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn list_conversations(&self, actor: UserId) -> DocResult<Vec<Conversation>> {
        self.conversations.list_for_user(actor).await
    }

    /// Replace a conversation title.
    ///
    /// # Errors
    /// Returns `InvalidContent` for a blank title, or `Authorization`/`ConversationNotFound`.
    pub async fn rename_conversation(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        title: &str,
    ) -> DocResult<Conversation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DocError::InvalidContent("title must not be empty".to_string()));
        }
        self.authorizer.authorize(actor, conversation_id).await?;
        self.conversations
            .rename(conversation_id, title.to_string(), Utc::now())
            .await?;
        self.changes
            .conversation(ConversationChange::Renamed { conversation_id });
        self.authorizer.authorize(actor, conversation_id).await
    }

    /// Delete a conversation together with all of its blocks.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn delete_conversation(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> DocResult<()> {
        self.authorizer.authorize(actor, conversation_id).await?;
        self.conversations.delete(conversation_id).await?;
        self.changes
            .conversation(ConversationChange::Deleted { conversation_id });
        info!(%conversation_id, "conversation deleted");
        Ok(())
    }

    pub(crate) async fn set_status(
        &self,
        conversation_id: ConversationId,
        status: ConversationStatus,
    ) -> DocResult<()> {
        self.conversations
            .set_status(conversation_id, status, Utc::now())
            .await?;
        self.changes.conversation(ConversationChange::Status {
            conversation_id,
            status,
        });
        debug!(%conversation_id, %status, "conversation status changed");
        Ok(())
    }

    // ----- listing -----------------------------------------------------------

    /// All blocks by ascending order.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn list_ordered(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> DocResult<Vec<Block>> {
        self.authorizer.authorize(actor, conversation_id).await?;
        self.blocks.list_ordered(conversation_id).await
    }

    /// Blocks that feed the model context, by ascending order.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn list_included_ordered(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> DocResult<Vec<Block>> {
        self.authorizer.authorize(actor, conversation_id).await?;
        self.blocks.list_included_ordered(conversation_id).await
    }

    /// Fetch one block.
    ///
    /// # Errors
    /// Returns `BlockNotFound` or `Authorization`.
    pub async fn get_block(&self, actor: UserId, block_id: BlockId) -> DocResult<Block> {
        let block = self
            .blocks
            .get(block_id)
            .await?
            .ok_or(DocError::BlockNotFound(block_id))?;
        self.authorizer
            .authorize(actor, block.conversation_id)
            .await?;
        Ok(block)
    }

    // ----- creation ----------------------------------------------------------

    /// Insert an empty user block after `after_order` (or at the end).
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn create_user_block(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        after_order: Option<f64>,
    ) -> DocResult<Block> {
        self.authorizer.authorize(actor, conversation_id).await?;
        let order = self.next_order(conversation_id, after_order).await?;
        self.insert(Block::user(conversation_id, order)).await
    }

    /// Insert an assistant placeholder with a fresh stream id.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn create_assistant_placeholder(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        after_order: Option<f64>,
        model: &ModelId,
    ) -> DocResult<Block> {
        self.authorizer.authorize(actor, conversation_id).await?;
        let order = self.next_order(conversation_id, after_order).await?;
        self.insert(Block::assistant_placeholder(
            conversation_id,
            order,
            model.as_str(),
        ))
        .await
    }

    async fn next_order(
        &self,
        conversation_id: ConversationId,
        after_order: Option<f64>,
    ) -> DocResult<f64> {
        let (prev, next) = self.blocks.order_bounds(conversation_id, after_order).await?;
        if let (Some(prev), Some(next)) = (prev, next)
            && !has_room_between(prev, next)
        {
            warn!(%conversation_id, prev, next, "order keys exhausted between neighbours");
        }
        Ok(allocate_order(prev, next))
    }

    async fn insert(&self, block: Block) -> DocResult<Block> {
        self.blocks.insert(&block).await?;
        self.conversations
            .touch(block.conversation_id, block.created_at)
            .await?;
        self.changes
            .block(block.conversation_id, block.id, ChangeKind::Created);
        debug!(
            conversation_id = %block.conversation_id,
            block_id = %block.id,
            author = %block.author,
            order = block.order,
            "block created"
        );
        Ok(block)
    }

    // ----- mutation ----------------------------------------------------------

    /// Replace a block's rich content wholesale.
    ///
    /// # Errors
    /// Returns `InvalidContent`, `BlockNotFound`, or `Authorization`.
    pub async fn update_content(
        &self,
        actor: UserId,
        block_id: BlockId,
        content: RichDocument,
    ) -> DocResult<Block> {
        content.validate().map_err(DocError::InvalidContent)?;
        let mut block = self.get_block(actor, block_id).await?;
        let now = Utc::now();
        self.blocks.replace_content(block_id, &content, now).await?;
        self.changes
            .block(block.conversation_id, block_id, ChangeKind::ContentUpdated);
        block.content = Some(content);
        block.updated_at = now;
        Ok(block)
    }

    /// Include or exclude a block from the model context.
    ///
    /// # Errors
    /// Returns `BlockNotFound` or `Authorization`.
    pub async fn toggle_exclusion(
        &self,
        actor: UserId,
        block_id: BlockId,
        is_excluded: bool,
    ) -> DocResult<Block> {
        let mut block = self.get_block(actor, block_id).await?;
        let now = Utc::now();
        self.blocks.set_excluded(block_id, is_excluded, now).await?;
        self.changes
            .block(block.conversation_id, block_id, ChangeKind::ExclusionToggled);
        block.is_excluded = is_excluded;
        block.updated_at = now;
        Ok(block)
    }

    /// Hard-delete a block.
    ///
    /// # Errors
    /// Returns `BlockNotFound` or `Authorization`.
    pub async fn delete_block(&self, actor: UserId, block_id: BlockId) -> DocResult<()> {
        let block = self.get_block(actor, block_id).await?;
        self.blocks.delete(block_id).await?;
        self.changes
            .block(block.conversation_id, block_id, ChangeKind::Deleted);
        debug!(conversation_id = %block.conversation_id, %block_id, "block deleted");
        Ok(())
    }

    // ----- derived views -----------------------------------------------------

    /// The included blocks as one Markdown document.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn export_markdown(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> DocResult<String> {
        let blocks = self.list_included_ordered(actor, conversation_id).await?;
        let sections: Vec<String> = blocks
            .iter()
            .map(block_markdown)
            .filter(|text| !text.trim().is_empty())
            .collect();
        Ok(sections.join("\n\n"))
    }

    /// Estimated context usage for `model`.
    ///
    /// # Errors
    /// Returns `Authorization` or `ConversationNotFound`.
    pub async fn context_usage(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        model: &ModelId,
        config: &TokenConfig,
    ) -> DocResult<ContextUsage> {
        let blocks = self.list_included_ordered(actor, conversation_id).await?;
        Ok(ContextUsage::for_model(&blocks, model.as_str(), config))
    }
}
