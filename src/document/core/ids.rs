// File: src/document/core/ids.rs

//! Identifier types for the block document engine.
//!
//! Strongly-typed ID newtypes (compile-time safety) with helpers for
//! generation, parsing, formatting and `SQLite` storage.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Generate a random UUID (v4).
#[inline]
#[must_use]
fn uuid_random() -> Uuid {
    Uuid::new_v4()
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

// ===== Core IDs =============================================================

define_uuid_id!(
    /// User account identifier, owned by the external auth collaborator.
    ///
    /// Default strategy: `UUIDv4` (random) to reduce timestamp leakage when exposed.
    UserId,
    generator = uuid_random
);

define_uuid_id!(
    /// Identifier of a conversation (the container of blocks).
    ConversationId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of a single block. Immutable once assigned.
    BlockId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Correlates a placeholder block with one in-flight generation.
    StreamId,
    generator = uuid_random
);

// ===== String IDs ===========================================================

/// Errors returned when parsing/validating a string identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameIdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
    /// Contains a disallowed character.
    InvalidChar {
        /// The invalid character.
        ch: char,
        /// The index where it was found.
        index: usize,
    },
}

impl fmt::Display for NameIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier must not be empty"),
            Self::TooLong { max, got } => write!(f, "identifier too long: got {got}, max {max}"),
            Self::InvalidChar { ch, index } => {
                write!(
                    f,
                    "identifier contains invalid character {ch:?} at index {index}"
                )
            }
        }
    }
}

impl std::error::Error for NameIdError {}

/// Validate a routing-key style identifier.
///
/// Rules:
/// - Non-empty after trimming.
/// - Max length limited.
/// - Conservative ASCII set: `[A-Za-z0-9._:/+-@]`.
fn validate_name(raw: &str, max_len: usize) -> Result<String, NameIdError> {
    let s = raw.trim();

    if s.is_empty() {
        return Err(NameIdError::Empty);
    }
    if s.len() > max_len {
        return Err(NameIdError::TooLong {
            max: max_len,
            got: s.len(),
        });
    }

    for (i, ch) in s.chars().enumerate() {
        let ok = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | ':' | '/' | '-' | '+' | '@');
        if !ok {
            return Err(NameIdError::InvalidChar { ch, index: i });
        }
    }

    Ok(s.to_owned())
}

/// Declare a validated string newtype.
macro_rules! define_name_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        max_len = $max:expr
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Hard ceiling to prevent pathological payloads.
            pub const MAX_LEN: usize = $max;

            /// Build a validated identifier.
            ///
            /// # Errors
            /// Returns `NameIdError` if the input is empty, too long, or contains invalid characters.
            pub fn new(raw: impl AsRef<str>) -> Result<Self, NameIdError> {
                validate_name(raw.as_ref(), Self::MAX_LEN).map(Self)
            }

            /// Borrow as `&str`.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = NameIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

define_name_id!(
    /// Identifier for a model (routing key).
    ///
    /// Examples:
    /// - `llama3.1:8b`
    /// - `gpt-4o-mini`
    ModelId,
    max_len = 192
);

define_name_id!(
    /// Identifier for a model provider (`ollama`, `openai`, ...).
    ProviderId,
    max_len = 64
);

// ===== Rusqlite integration ================================================

mod rusqlite_impl {
    use super::{BlockId, ConversationId, StreamId, UserId};
    use std::fmt;

    use rusqlite::types::{
        FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
    };

    #[derive(Debug)]
    struct InvalidUuidBlobLen {
        got: usize,
    }

    impl fmt::Display for InvalidUuidBlobLen {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "invalid UUID blob length: got {}, expected 16", self.got)
        }
    }

    impl std::error::Error for InvalidUuidBlobLen {}

    fn uuid_from_blob(b: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let bytes: [u8; 16] = b
            .try_into()
            .map_err(|_| FromSqlError::Other(Box::new(InvalidUuidBlobLen { got: b.len() })))?;
        Ok(uuid::Uuid::from_bytes(bytes))
    }

    fn uuid_from_text(t: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| FromSqlError::Other(Box::new(e)))
    }

    macro_rules! impl_rusqlite_uuid_newtype {
        ($t:ty) => {
            impl ToSql for $t {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    // Store UUIDs as TEXT for compatibility
                    Ok(ToSqlOutput::Owned(Value::Text(self.0.to_string())))
                }
            }

            impl FromSql for $t {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    match value {
                        ValueRef::Blob(b) => uuid_from_blob(b).map(Self),
                        ValueRef::Text(t) => uuid_from_text(t).map(Self),
                        _ => Err(FromSqlError::InvalidType),
                    }
                }
            }
        };
    }

    impl_rusqlite_uuid_newtype!(UserId);
    impl_rusqlite_uuid_newtype!(ConversationId);
    impl_rusqlite_uuid_newtype!(BlockId);
    impl_rusqlite_uuid_newtype!(StreamId);
}
