//! Approximate context-window accounting.
//!
//! Advisory only: counts characters of the Markdown the model would see and
//! divides by a fixed ratio.

use serde::Serialize;
use tracing::warn;

use crate::document::core::block::Block;
use crate::document::core::config::TokenConfig;
use crate::document::markdown::try_document_to_markdown;

/// Estimate the tokens the non-excluded `blocks` occupy.
///
/// A block that fails to serialize is counted by the length of its JSON
/// encoding instead, so one bad block never aborts the estimate.
#[must_use]
pub fn estimate_tokens(blocks: &[Block], chars_per_token: usize) -> u64 {
    let chars: usize = blocks
        .iter()
        .filter(|block| !block.is_excluded)
        .map(block_chars)
        .sum();
    let per_token = chars_per_token.max(1);
    u64::try_from(chars.div_ceil(per_token)).unwrap_or(u64::MAX)
}

fn block_chars(block: &Block) -> usize {
    match (&block.content, &block.streaming_content) {
        (Some(doc), _) => match try_document_to_markdown(doc) {
            Ok(markdown) => markdown.chars().count(),
            Err(err) => {
                warn!(block_id = %block.id, error = %err, "estimating block from raw size");
                doc.serialized_len()
            }
        },
        (None, Some(text)) => text.chars().count(),
        (None, None) => 0,
    }
}

/// How close a conversation is to its model's window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageLevel {
    /// Comfortably inside the window.
    Ok,
    /// Past the warning ratio.
    Warning,
    /// Past the window.
    Exceeded,
}

/// Estimated usage against a context window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    /// Estimated tokens.
    pub tokens: u64,
    /// Model window.
    pub limit: u64,
    /// Classification.
    pub level: UsageLevel,
}

impl ContextUsage {
    /// Estimate `blocks` against the window configured for `model`.
    #[must_use]
    pub fn for_model(blocks: &[Block], model: &str, config: &TokenConfig) -> Self {
        let limit = config
            .context_windows
            .get(model)
            .copied()
            .unwrap_or(config.default_context_window);
        Self::classify(estimate_tokens(blocks, config.chars_per_token), limit, config.warn_ratio)
    }

    /// Classify a token count against a limit.
    #[must_use]
    pub fn classify(tokens: u64, limit: u64, warn_ratio: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let ratio = if limit == 0 {
            f64::INFINITY
        } else {
            tokens as f64 / limit as f64
        };
        let level = if tokens > limit {
            UsageLevel::Exceeded
        } else if ratio >= warn_ratio {
            UsageLevel::Warning
        } else {
            UsageLevel::Ok
        };
        Self {
            tokens,
            limit,
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::core::ids::ConversationId;
    use crate::document::core::rich::{Node, RichDocument};

    fn text_block(text: &str) -> Block {
        let mut block = Block::user(ConversationId::new(), 1.0);
        block.content = Some(RichDocument::new(vec![Node::paragraph(vec![Node::text(
            text,
        )])]));
        block
    }

    #[test]
    fn test_counts_included_blocks_only() {
        let mut excluded = text_block(&"x".repeat(400));
        excluded.is_excluded = true;
        let blocks = vec![text_block("abcdefgh"), excluded];
        assert_eq!(estimate_tokens(&blocks, 4), 2);
    }

    #[test]
    fn test_streaming_text_counts_until_finalized() {
        let mut block = Block::assistant_placeholder(ConversationId::new(), 1.0, "m");
        block.streaming_content = Some("abcde".to_string());
        assert_eq!(estimate_tokens(&[block], 4), 2);
    }

    #[test]
    fn test_unserializable_block_falls_back_to_raw_size() {
        let mut bad = Block::user(ConversationId::new(), 1.0);
        let doc = RichDocument::new(vec![Node::text("stray")]);
        let raw = doc.serialized_len();
        bad.content = Some(doc);

        let blocks = vec![bad, text_block("abcd")];
        assert_eq!(estimate_tokens(&blocks, 1), u64::try_from(raw + 4).unwrap());
    }

    #[test]
    fn test_usage_levels() {
        assert_eq!(ContextUsage::classify(10, 100, 0.8).level, UsageLevel::Ok);
        assert_eq!(ContextUsage::classify(80, 100, 0.8).level, UsageLevel::Warning);
        assert_eq!(ContextUsage::classify(101, 100, 0.8).level, UsageLevel::Exceeded);

        let mut config = TokenConfig::default();
        config.context_windows.insert("tiny".to_string(), 1);
        let usage = ContextUsage::for_model(&[text_block("abcdefgh")], "tiny", &config);
        assert_eq!(usage.limit, 1);
        assert_eq!(usage.level, UsageLevel::Exceeded);
    }
}
