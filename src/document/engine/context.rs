//! Turns the included blocks into the message list sent to a model.

use crate::document::core::block::{Author, Block};
use crate::document::markdown::document_to_markdown_lossy;
use crate::llm::provider::{ChatMessage, Role};

/// Markdown a block contributes to the model context.
#[must_use]
pub fn block_markdown(block: &Block) -> String {
    match (&block.content, &block.streaming_content) {
        (Some(doc), _) => document_to_markdown_lossy(doc),
        (None, Some(text)) => text.clone(),
        (None, None) => String::new(),
    }
}

/// Build the ordered chat turns for `blocks` (already filtered and sorted).
///
/// Blocks whose Markdown is blank are skipped. When the last turn is the
/// assistant's, `continue_prompt` is appended as a user turn so the list
/// always ends with the user.
#[must_use]
pub fn build_messages(blocks: &[Block], continue_prompt: &str) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = blocks
        .iter()
        .filter_map(|block| {
            let text = block_markdown(block);
            if text.trim().is_empty() {
                return None;
            }
            Some(match block.author {
                Author::User => ChatMessage::user(text),
                Author::Assistant => ChatMessage::assistant(text),
            })
        })
        .collect();

    if messages
        .last()
        .is_some_and(|message| message.role == Role::Assistant)
    {
        messages.push(ChatMessage::user(continue_prompt));
    }
    messages
}
