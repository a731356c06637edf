//! Rich-document tree: the editor's native block content format.
//!
//! JSON shape follows the usual editor schema:
//!
//! ```text
//! { "type": "doc", "content": [
//!     { "type": "paragraph", "content": [
//!         { "type": "text", "text": "hi", "marks": [{ "type": "bold" }] } ] } ] }
//! ```
//!
//! External payloads enter through [`RichDocument::from_value`], which checks the
//! structural rules the serde layer cannot express (heading levels, nesting depth).

use serde::{Deserialize, Serialize};

use crate::document::core::errors::{DocError, DocResult};

/// Deepest node nesting accepted from the outside.
pub const MAX_DEPTH: usize = 48;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
enum DocTag {
    #[default]
    #[serde(rename = "doc")]
    Doc,
}

/// Root of a rich document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RichDocument {
    #[serde(rename = "type")]
    tag: DocTag,
    /// Top-level block nodes.
    #[serde(default)]
    pub content: Vec<Node>,
}

impl RichDocument {
    /// Build a document from block nodes.
    #[must_use]
    pub const fn new(content: Vec<Node>) -> Self {
        Self {
            tag: DocTag::Doc,
            content,
        }
    }

    /// The initial content of a fresh user block.
    #[must_use]
    pub fn empty_paragraph() -> Self {
        Self::new(vec![Node::paragraph(Vec::new())])
    }

    /// Validate and decode an external JSON payload.
    ///
    /// # Errors
    /// Returns `InvalidContent` if the payload is not a well-formed document.
    pub fn from_value(value: serde_json::Value) -> DocResult<Self> {
        let doc: Self = serde_json::from_value(value)
            .map_err(|err| DocError::InvalidContent(err.to_string()))?;
        doc.validate().map_err(DocError::InvalidContent)?;
        Ok(doc)
    }

    /// Check structural rules.
    ///
    /// # Errors
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        self.content
            .iter()
            .try_for_each(|node| validate_node(node, 1))
    }

    /// Length of the JSON encoding, used as a size fallback.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(self).map_or(0, |json| json.len())
    }
}

fn validate_node(node: &Node, depth: usize) -> Result<(), String> {
    if depth > MAX_DEPTH {
        return Err(format!("nesting deeper than {MAX_DEPTH}"));
    }
    if let Node::Heading { attrs, .. } = node
        && !(1..=6).contains(&attrs.level)
    {
        return Err(format!("heading level {} out of range", attrs.level));
    }
    node.children()
        .iter()
        .try_for_each(|child| validate_node(child, depth + 1))
}

/// Heading attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingAttrs {
    /// Level 1 through 6.
    pub level: u8,
}

/// Code block attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlockAttrs {
    /// Info string after the opening fence.
    #[serde(default, alias = "language", skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

/// Bullet list attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletListAttrs {
    /// Bullet character, `*` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullet: Option<String>,
}

/// Ordered list attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedListAttrs {
    /// Number of the first item.
    #[serde(default = "first_item", alias = "start")]
    pub order: u64,
}

const fn first_item() -> u64 {
    1
}

impl Default for OrderedListAttrs {
    fn default() -> Self {
        Self { order: 1 }
    }
}

/// Horizontal rule attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizontalRuleAttrs {
    /// Source markup, `---` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
}

/// Link attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttrs {
    /// Target URL.
    pub href: String,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Inline formatting applied to a text node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mark {
    /// Strong emphasis.
    Bold,
    /// Emphasis.
    Italic,
    /// Strikethrough.
    Strike,
    /// Inline code.
    Code,
    /// Hyperlink.
    Link {
        /// Link target and title.
        attrs: LinkAttrs,
    },
}

impl Mark {
    /// Canonical nesting rank: lower ranks wrap higher ones.
    ///
    /// Code is always innermost since its content is not escaped.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Link { .. } => 0,
            Self::Bold => 1,
            Self::Italic => 2,
            Self::Strike => 3,
            Self::Code => 4,
        }
    }
}

/// A node of the document tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    /// Paragraph of inline content.
    Paragraph {
        /// Inline children.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<Node>,
    },
    /// Heading of inline content.
    Heading {
        /// Heading level.
        attrs: HeadingAttrs,
        /// Inline children.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<Node>,
    },
    /// Quoted blocks.
    Blockquote {
        /// Block children.
        #[serde(default)]
        content: Vec<Node>,
    },
    /// Fenced code.
    CodeBlock {
        /// Info string.
        #[serde(default)]
        attrs: CodeBlockAttrs,
        /// Text children (marks ignored).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<Node>,
    },
    /// Unordered list of `listItem` nodes.
    BulletList {
        /// Bullet settings.
        #[serde(default)]
        attrs: BulletListAttrs,
        /// List items.
        #[serde(default)]
        content: Vec<Node>,
    },
    /// Ordered list of `listItem` nodes.
    OrderedList {
        /// Numbering settings.
        #[serde(default)]
        attrs: OrderedListAttrs,
        /// List items.
        #[serde(default)]
        content: Vec<Node>,
    },
    /// One list entry holding blocks.
    ListItem {
        /// Block children.
        #[serde(default)]
        content: Vec<Node>,
    },
    /// Thematic break.
    HorizontalRule {
        /// Markup settings.
        #[serde(default)]
        attrs: HorizontalRuleAttrs,
    },
    /// Forced line break inside inline content.
    HardBreak,
    /// Run of text sharing one set of marks.
    Text {
        /// The characters.
        text: String,
        /// Formatting.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        marks: Vec<Mark>,
    },
}

impl Node {
    /// Plain text node.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            marks: Vec::new(),
        }
    }

    /// Text node with marks.
    #[must_use]
    pub fn marked(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Self::Text {
            text: text.into(),
            marks,
        }
    }

    /// Paragraph node.
    #[must_use]
    pub const fn paragraph(content: Vec<Self>) -> Self {
        Self::Paragraph { content }
    }

    /// Schema name of the node, as it appears in JSON.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Paragraph { .. } => "paragraph",
            Self::Heading { .. } => "heading",
            Self::Blockquote { .. } => "blockquote",
            Self::CodeBlock { .. } => "codeBlock",
            Self::BulletList { .. } => "bulletList",
            Self::OrderedList { .. } => "orderedList",
            Self::ListItem { .. } => "listItem",
            Self::HorizontalRule { .. } => "horizontalRule",
            Self::HardBreak => "hardBreak",
            Self::Text { .. } => "text",
        }
    }

    /// Child nodes (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match self {
            Self::Paragraph { content }
            | Self::Heading { content, .. }
            | Self::Blockquote { content }
            | Self::CodeBlock { content, .. }
            | Self::BulletList { content, .. }
            | Self::OrderedList { content, .. }
            | Self::ListItem { content } => content,
            Self::HorizontalRule { .. } | Self::HardBreak | Self::Text { .. } => &[],
        }
    }
}
