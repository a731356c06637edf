//! Change notifications for subscribers (UI layers, SSE clients).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::document::core::conversation::ConversationStatus;
use crate::document::core::ids::{BlockId, ConversationId};

/// What happened to a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// Block inserted.
    Created,
    /// Rich content replaced.
    ContentUpdated,
    /// Exclusion flag flipped.
    ExclusionToggled,
    /// Streaming text advanced.
    StreamingUpdated,
    /// Generation materialized into rich content.
    Finalized,
    /// Block removed.
    Deleted,
}

/// A change to one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Changed block.
    pub block_id: BlockId,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// A change to a conversation record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversationChange {
    /// Generation status moved.
    Status {
        /// Conversation.
        conversation_id: ConversationId,
        /// New status.
        status: ConversationStatus,
    },
    /// Title replaced.
    Renamed {
        /// Conversation.
        conversation_id: ConversationId,
    },
    /// Conversation and its blocks removed.
    Deleted {
        /// Conversation.
        conversation_id: ConversationId,
    },
}

impl ConversationChange {
    /// Conversation the change belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        match self {
            Self::Status {
                conversation_id, ..
            }
            | Self::Renamed { conversation_id }
            | Self::Deleted { conversation_id } => *conversation_id,
        }
    }
}

/// Any published change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "camelCase")]
pub enum Change {
    /// Block-level change.
    Block(BlockChange),
    /// Conversation-level change.
    Conversation(ConversationChange),
}

impl Change {
    /// Conversation the change belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        match self {
            Self::Block(change) => change.conversation_id,
            Self::Conversation(change) => change.conversation_id(),
        }
    }
}

/// Fan-out hub. Publishing never blocks; slow subscribers lag and skip.
#[derive(Clone)]
pub struct ChangeHub {
    sender: broadcast::Sender<Change>,
}

impl ChangeHub {
    /// Hub buffering `capacity` changes per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every change published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    /// Publish a block change.
    pub fn block(&self, conversation_id: ConversationId, block_id: BlockId, kind: ChangeKind) {
        self.publish(Change::Block(BlockChange {
            conversation_id,
            block_id,
            kind,
        }));
    }

    /// Publish a conversation change.
    pub fn conversation(&self, change: ConversationChange) {
        self.publish(Change::Conversation(change));
    }

    fn publish(&self, change: Change) {
        // No receivers is not an error.
        if self.sender.send(change).is_err() {
            trace!("change dropped: no subscribers");
        }
    }
}
