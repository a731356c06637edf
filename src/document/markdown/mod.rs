//! Conversion between Markdown and the rich-document tree.
//!
//! Markdown is the model-facing format: block content is serialized before it
//! is sent as a chat message, and finished model output is parsed back into a
//! document. The two directions are not exact inverses, but one round trip
//! reaches a fixed point.

pub mod parser;
pub mod serializer;

use thiserror::Error;
use tracing::warn;

use crate::document::core::rich::{Node, RichDocument};

pub use parser::{html_to_document, markdown_to_document, markdown_to_html};
pub use serializer::try_document_to_markdown;

/// Text substituted for a document that cannot be serialized.
pub const CONVERSION_FAILED: &str = "[Content conversion failed]";

/// Why a document could not be turned into Markdown.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The value is not a document at all.
    #[error("not a document: {0}")]
    NotADocument(String),

    /// A node appears where the schema does not allow it.
    #[error("unexpected {node} node in {context}")]
    UnexpectedNode {
        /// Kind of the misplaced node.
        node: &'static str,
        /// Kind of the node containing it.
        context: &'static str,
    },

    /// Nesting deeper than the serializer accepts.
    #[error("document nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Serialize an arbitrary JSON value that should hold a document.
///
/// # Errors
/// Returns [`ConversionError::NotADocument`] if the value does not decode,
/// or any serializer error.
pub fn try_value_to_markdown(value: &serde_json::Value) -> Result<String, ConversionError> {
    let doc: RichDocument = serde_json::from_value(value.clone())
        .map_err(|err| ConversionError::NotADocument(err.to_string()))?;
    try_document_to_markdown(&doc)
}

/// Serialize a document, degrading to [`CONVERSION_FAILED`] on error.
#[must_use]
pub fn document_to_markdown_lossy(doc: &RichDocument) -> String {
    match try_document_to_markdown(doc) {
        Ok(markdown) => markdown,
        Err(err) => {
            warn!(error = %err, "document to markdown conversion failed");
            CONVERSION_FAILED.to_string()
        }
    }
}

/// Parse Markdown off the async runtime.
///
/// Falls back to a single plain paragraph if the blocking task fails.
pub async fn markdown_to_document_async(markdown: String) -> RichDocument {
    let fallback = markdown.clone();
    match tokio::task::spawn_blocking(move || markdown_to_document(&markdown)).await {
        Ok(doc) => doc,
        Err(err) => {
            warn!(error = %err, "markdown parse task failed; storing plain text");
            plain_paragraph(&fallback)
        }
    }
}

fn plain_paragraph(text: &str) -> RichDocument {
    if text.is_empty() {
        return RichDocument::new(Vec::new());
    }
    RichDocument::new(vec![Node::paragraph(vec![Node::text(text)])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_markdown() {
        let value = json!({
            "type": "doc",
            "content": [{ "type": "paragraph", "content": [{ "type": "text", "text": "hi" }] }]
        });
        assert_eq!(try_value_to_markdown(&value).unwrap(), "hi");
    }

    #[test]
    fn test_malformed_value_is_not_a_document() {
        let value = json!({ "type": "doc", "content": [{ "type": "mystery" }] });
        assert!(matches!(
            try_value_to_markdown(&value),
            Err(ConversionError::NotADocument(_))
        ));
    }

    #[test]
    fn test_lossy_conversion_returns_sentinel() {
        let doc = RichDocument::new(vec![Node::text("bare text at block level")]);
        assert_eq!(document_to_markdown_lossy(&doc), CONVERSION_FAILED);
    }

    #[tokio::test]
    async fn test_async_parse_matches_sync() {
        let markdown = "# Title\n\n- a\n- b".to_string();
        let expected = markdown_to_document(&markdown);
        assert_eq!(markdown_to_document_async(markdown).await, expected);
    }
}
