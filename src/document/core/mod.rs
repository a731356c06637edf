//! Core document types and identifiers.

pub mod block;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod rich;

pub use block::{Author, Block, BlockMetadata, TokenUsage};
pub use config::{AppConfig, LlmConfig, ServerConfig, StorageConfig, StreamingConfig, TokenConfig};
pub use conversation::{Conversation, ConversationStatus, derive_title};
pub use errors::{DocError, DocResult};
pub use ids::{BlockId, ConversationId, ModelId, NameIdError, ProviderId, StreamId, UserId};
pub use rich::{Mark, Node, RichDocument};
