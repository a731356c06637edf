//! Persistent storage for conversations and blocks.

pub mod block_store;
pub mod conversation_store;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::document::core::errors::{DocError, DocResult};

pub use block_store::{BlockStore, SqliteBlockStore};
pub use conversation_store::{ConversationStore, SqliteConversationStore};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_user
        ON conversations (user_id, updated_at);

    CREATE TABLE IF NOT EXISTS blocks (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL
            REFERENCES conversations (id) ON DELETE CASCADE,
        author TEXT NOT NULL,
        content TEXT,
        streaming_content TEXT,
        sort_order REAL NOT NULL,
        is_excluded INTEGER NOT NULL DEFAULT 0,
        is_streaming INTEGER NOT NULL DEFAULT 0,
        stream_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        metadata TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_blocks_conversation_order
        ON blocks (conversation_id, sort_order);
    CREATE INDEX IF NOT EXISTS idx_blocks_conversation_included
        ON blocks (conversation_id, is_excluded, sort_order);
";

/// Shared `SQLite` handle with the schema applied.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> DocResult<Self> {
        let conn = Connection::open(path).await?;
        debug!(path = %path.display(), "opened sqlite database");
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be applied.
    pub async fn open_in_memory() -> DocResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> DocResult<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Connection handle shared by the stores.
    #[must_use]
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }
}

pub(crate) fn from_millis(millis: i64, field: &str) -> DocResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DocError::CorruptRecord(format!("invalid {field} timestamp {millis}")))
}
