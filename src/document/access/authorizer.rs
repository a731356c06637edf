//! Ownership checks for conversations.

use std::sync::Arc;

use tracing::debug;

use crate::document::core::conversation::Conversation;
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::{ConversationId, UserId};
use crate::document::storage::{ConversationStore, StoreFuture};

/// Decides whether an actor may operate on a conversation.
pub trait Authorizer: Send + Sync {
    /// Return the conversation if `actor` may use it.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for unknown ids and `Authorization`
    /// when the actor is not the owner.
    fn authorize(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, DocResult<Conversation>>;
}

/// Grants access to the conversation owner only.
pub struct OwnerAuthorizer {
    conversations: Arc<dyn ConversationStore>,
}

impl OwnerAuthorizer {
    /// Build an authorizer over a conversation store.
    #[must_use]
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }
}

impl Authorizer for OwnerAuthorizer {
    fn authorize(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, DocResult<Conversation>> {
        Box::pin(async move {
            let conversation = self
                .conversations
                .get(conversation_id)
                .await?
                .ok_or(DocError::ConversationNotFound(conversation_id))?;

            if conversation.user_id != actor {
                debug!(%actor, %conversation_id, "ownership check failed");
                return Err(DocError::Authorization {
                    actor,
                    conversation_id,
                });
            }
            Ok(conversation)
        })
    }
}
