//! Provider-agnostic streaming events.
//!
//! Every backend maps its native chunks onto [`StreamEvent`]; the response
//! coordinator only ever sees these three shapes.

use serde::{Deserialize, Serialize};

use crate::document::core::block::TokenUsage;

/// One item of a streamed model response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Incremental text, in emission order.
    TextDelta {
        /// Fragment to append.
        text: String,
    },
    /// Generation finished normally.
    Finish {
        /// Provider stop reason, when reported.
        finish_reason: Option<String>,
        /// Token accounting, when reported.
        usage: Option<TokenUsage>,
    },
    /// Generation failed mid-stream.
    Error {
        /// Provider message.
        message: String,
    },
}

impl StreamEvent {
    /// Text delta helper.
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Error helper.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether no event may follow this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}
