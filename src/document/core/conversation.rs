//! Conversation record: the owner of an ordered set of blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::document::core::ids::{ConversationId, UserId};

/// Title used until the user or a summarizer names the conversation.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Longest title derived from a first message.
pub const MAX_DERIVED_TITLE_CHARS: usize = 60;

/// Generation status of a conversation.
///
/// `Error` overrides any block still flagged as streaming.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A generation is running.
    Streaming,
    /// Last generation finished.
    Completed,
    /// Last generation failed.
    Error,
}

impl ConversationStatus {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(Self::Idle),
            "streaming" => Ok(Self::Streaming),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(value.to_string()),
        }
    }
}

/// A conversation owned by one user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Owner.
    pub user_id: UserId,
    /// Display title.
    pub title: String,
    /// Generation status.
    pub status: ConversationStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh idle conversation.
    #[must_use]
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            user_id,
            title: title.into(),
            status: ConversationStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive a title from the first line of a message.
#[must_use]
pub fn derive_title(text: &str) -> String {
    let first_line = text
        .lines()
        .map(|line| line.trim_start_matches(['#', '>', ' ']).trim())
        .find(|line| !line.is_empty());

    match first_line {
        Some(line) if line.chars().count() > MAX_DERIVED_TITLE_CHARS => {
            let cut: String = line.chars().take(MAX_DERIVED_TITLE_CHARS).collect();
            format!("{}...", cut.trim_end())
        }
        Some(line) => line.to_string(),
        None => DEFAULT_TITLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("\n\n# Plan the trip\nmore"), "Plan the trip");
        assert_eq!(derive_title("   "), DEFAULT_TITLE);

        let long = "word ".repeat(40);
        let title = derive_title(&long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= MAX_DERIVED_TITLE_CHARS + 3);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConversationStatus::Idle,
            ConversationStatus::Streaming,
            ConversationStatus::Completed,
            ConversationStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ConversationStatus>(), Ok(status));
        }
    }
}
