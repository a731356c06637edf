//! Block operations, change feed, context assembly and generation.

pub mod blocks;
pub mod changes;
pub mod context;
pub mod coordinator;

pub use blocks::BlockService;
pub use changes::{BlockChange, Change, ChangeHub, ChangeKind, ConversationChange};
pub use context::{block_markdown, build_messages};
pub use coordinator::{
    GenerationHandle, GenerationOutcome, GenerationSettings, ModelSelection, ResponseCoordinator,
};
