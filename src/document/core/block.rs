//! Block record: the atomic, independently ordered unit of a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::document::core::ids::{BlockId, ConversationId, StreamId};
use crate::document::core::rich::RichDocument;

/// Who wrote a block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// Human input.
    User,
    /// Model output.
    Assistant,
}

impl Author {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Author {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u64,
    /// Generated tokens.
    pub output: u64,
}

impl TokenUsage {
    /// Sum of input and output.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }
}

/// Generation details recorded on assistant blocks.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Model that produced the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token usage, when the provider reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    /// Provider finish reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One block of a conversation document.
///
/// While `is_streaming` is set, `streaming_content` is the text to display;
/// after finalization it is cleared and `content` is authoritative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Immutable id.
    pub id: BlockId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Block author.
    pub author: Author,
    /// Finalized rich content.
    pub content: Option<RichDocument>,
    /// Markdown accumulated during generation.
    pub streaming_content: Option<String>,
    /// Position among siblings.
    pub order: f64,
    /// Omitted from model context when set.
    pub is_excluded: bool,
    /// A generation is writing into this block.
    pub is_streaming: bool,
    /// Correlates the block with one generation.
    pub stream_id: Option<StreamId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Generation details.
    pub metadata: Option<BlockMetadata>,
}

impl Block {
    /// A user block holding an empty paragraph.
    #[must_use]
    pub fn user(conversation_id: ConversationId, order: f64) -> Self {
        let now = Utc::now();
        Self {
            id: BlockId::new(),
            conversation_id,
            author: Author::User,
            content: Some(RichDocument::empty_paragraph()),
            streaming_content: None,
            order,
            is_excluded: false,
            is_streaming: false,
            stream_id: None,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// An assistant placeholder awaiting generation.
    #[must_use]
    pub fn assistant_placeholder(conversation_id: ConversationId, order: f64, model: &str) -> Self {
        let now = Utc::now();
        Self {
            id: BlockId::new(),
            conversation_id,
            author: Author::Assistant,
            content: None,
            streaming_content: None,
            order,
            is_excluded: false,
            is_streaming: false,
            stream_id: Some(StreamId::new()),
            created_at: now,
            updated_at: now,
            metadata: Some(BlockMetadata {
                model: Some(model.to_string()),
                ..BlockMetadata::default()
            }),
        }
    }
}
