//! Block persistence.
//!
//! Every mutation is a single `UPDATE` touching only the columns it owns, so
//! writes to disjoint fields of one block never clobber each other. Fields
//! written by two callers at once follow last-write-wins.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::document::core::block::{Author, Block, BlockMetadata};
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::{BlockId, ConversationId, StreamId};
use crate::document::core::rich::RichDocument;
use crate::document::storage::{Database, StoreFuture, from_millis};

/// Block store trait.
pub trait BlockStore: Send + Sync {
    /// Insert a new block.
    ///
    /// # Errors
    /// Returns an error if storage access fails (including a missing conversation).
    fn insert(&self, block: &Block) -> StoreFuture<'_, DocResult<()>>;

    /// Fetch one block.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the row is corrupt.
    fn get(&self, id: BlockId) -> StoreFuture<'_, DocResult<Option<Block>>>;

    /// All blocks of a conversation by ascending order.
    ///
    /// # Errors
    /// Returns an error if storage access fails or a row is corrupt.
    fn list_ordered(&self, conversation_id: ConversationId)
    -> StoreFuture<'_, DocResult<Vec<Block>>>;

    /// Non-excluded blocks by ascending order.
    ///
    /// # Errors
    /// Returns an error if storage access fails or a row is corrupt.
    fn list_included_ordered(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, DocResult<Vec<Block>>>;

    /// Neighbouring order keys for an insert.
    ///
    /// With `after`, returns `(after, smallest order > after)`; without it,
    /// returns `(largest order, None)` so the insert lands at the end.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn order_bounds(
        &self,
        conversation_id: ConversationId,
        after: Option<f64>,
    ) -> StoreFuture<'_, DocResult<(Option<f64>, Option<f64>)>>;

    /// Replace the rich content.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the row is missing.
    fn replace_content(
        &self,
        id: BlockId,
        content: &RichDocument,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>>;

    /// Set the exclusion flag.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the row is missing.
    fn set_excluded(
        &self,
        id: BlockId,
        is_excluded: bool,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>>;

    /// Write accumulated streaming text and raise the streaming flag.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the row is missing.
    fn write_streaming(
        &self,
        id: BlockId,
        text: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>>;

    /// Store final content and clear all streaming state.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the row is missing.
    fn finalize(
        &self,
        id: BlockId,
        content: &RichDocument,
        metadata: &BlockMetadata,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>>;

    /// Hard delete.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the row is missing.
    fn delete(&self, id: BlockId) -> StoreFuture<'_, DocResult<()>>;
}

/// `SQLite` implementation of the block store.
#[derive(Clone)]
pub struct SqliteBlockStore {
    conn: Connection,
}

/// Raw column values, decoded outside the connection thread.
struct BlockRow {
    id: BlockId,
    conversation_id: ConversationId,
    author: String,
    content: Option<String>,
    streaming_content: Option<String>,
    order: f64,
    is_excluded: bool,
    is_streaming: bool,
    stream_id: Option<StreamId>,
    created_at: i64,
    updated_at: i64,
    metadata: Option<String>,
}

const SELECT_COLUMNS: &str = "id, conversation_id, author, content, streaming_content, \
     sort_order, is_excluded, is_streaming, stream_id, created_at, updated_at, metadata";

impl BlockRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            author: row.get(2)?,
            content: row.get(3)?,
            streaming_content: row.get(4)?,
            order: row.get(5)?,
            is_excluded: row.get(6)?,
            is_streaming: row.get(7)?,
            stream_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            metadata: row.get(11)?,
        })
    }

    fn decode(self) -> DocResult<Block> {
        let author: Author = self
            .author
            .parse()
            .map_err(|raw| DocError::CorruptRecord(format!("unknown block author {raw}")))?;
        let content = self
            .content
            .map(|json| serde_json::from_str::<RichDocument>(&json))
            .transpose()?;
        let metadata = self
            .metadata
            .map(|json| serde_json::from_str::<BlockMetadata>(&json))
            .transpose()?;

        Ok(Block {
            id: self.id,
            conversation_id: self.conversation_id,
            author,
            content,
            streaming_content: self.streaming_content,
            order: self.order,
            is_excluded: self.is_excluded,
            is_streaming: self.is_streaming,
            stream_id: self.stream_id,
            created_at: from_millis(self.created_at, "created_at")?,
            updated_at: from_millis(self.updated_at, "updated_at")?,
            metadata,
        })
    }
}

impl SqliteBlockStore {
    /// Build a store over an opened database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    async fn query_blocks(
        &self,
        conversation_id: ConversationId,
        sql: String,
    ) -> DocResult<Vec<Block>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![conversation_id], BlockRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(BlockRow::decode).collect()
    }

    async fn execute_for(
        &self,
        id: BlockId,
        sql: &'static str,
        params: Vec<rusqlite::types::Value>,
    ) -> DocResult<()> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(sql, rusqlite::params_from_iter(params))?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(DocError::BlockNotFound(id));
        }
        Ok(())
    }
}

fn text_value(text: String) -> rusqlite::types::Value {
    rusqlite::types::Value::Text(text)
}

fn id_value(id: BlockId) -> rusqlite::types::Value {
    text_value(id.to_string())
}

impl BlockStore for SqliteBlockStore {
    fn insert(&self, block: &Block) -> StoreFuture<'_, DocResult<()>> {
        let block = block.clone();
        Box::pin(async move {
            let content = block.content.as_ref().map(serde_json::to_string).transpose()?;
            let metadata = block.metadata.as_ref().map(serde_json::to_string).transpose()?;
            let author = block.author.as_str();
            let created_at = block.created_at.timestamp_millis();
            let updated_at = block.updated_at.timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO blocks (id, conversation_id, author, content, streaming_content,
                             sort_order, is_excluded, is_streaming, stream_id, created_at, updated_at, metadata)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        rusqlite::params![
                            block.id,
                            block.conversation_id,
                            author,
                            content,
                            block.streaming_content,
                            block.order,
                            block.is_excluded,
                            block.is_streaming,
                            block.stream_id,
                            created_at,
                            updated_at,
                            metadata
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn get(&self, id: BlockId) -> StoreFuture<'_, DocResult<Option<Block>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {SELECT_COLUMNS} FROM blocks WHERE id = ?1"),
                            rusqlite::params![id],
                            BlockRow::read,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(BlockRow::decode).transpose()
        })
    }

    fn list_ordered(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, DocResult<Vec<Block>>> {
        Box::pin(self.query_blocks(
            conversation_id,
            format!(
                "SELECT {SELECT_COLUMNS} FROM blocks
                 WHERE conversation_id = ?1 ORDER BY sort_order ASC"
            ),
        ))
    }

    fn list_included_ordered(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, DocResult<Vec<Block>>> {
        Box::pin(self.query_blocks(
            conversation_id,
            format!(
                "SELECT {SELECT_COLUMNS} FROM blocks
                 WHERE conversation_id = ?1 AND is_excluded = 0 ORDER BY sort_order ASC"
            ),
        ))
    }

    fn order_bounds(
        &self,
        conversation_id: ConversationId,
        after: Option<f64>,
    ) -> StoreFuture<'_, DocResult<(Option<f64>, Option<f64>)>> {
        Box::pin(async move {
            let bounds = self
                .conn
                .call(move |conn| {
                    let bounds = match after {
                        Some(after) => {
                            let next: Option<f64> = conn.query_row(
                                "SELECT MIN(sort_order) FROM blocks
                                 WHERE conversation_id = ?1 AND sort_order > ?2",
                                rusqlite::params![conversation_id, after],
                                |row| row.get(0),
                            )?;
                            (Some(after), next)
                        }
                        None => {
                            let last: Option<f64> = conn.query_row(
                                "SELECT MAX(sort_order) FROM blocks WHERE conversation_id = ?1",
                                rusqlite::params![conversation_id],
                                |row| row.get(0),
                            )?;
                            (last, None)
                        }
                    };
                    Ok(bounds)
                })
                .await?;
            Ok(bounds)
        })
    }

    fn replace_content(
        &self,
        id: BlockId,
        content: &RichDocument,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>> {
        let content = serde_json::to_string(content);
        Box::pin(async move {
            self.execute_for(
                id,
                "UPDATE blocks SET content = ?1, updated_at = ?2 WHERE id = ?3",
                vec![
                    text_value(content?),
                    at.timestamp_millis().into(),
                    id_value(id),
                ],
            )
            .await
        })
    }

    fn set_excluded(
        &self,
        id: BlockId,
        is_excluded: bool,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(self.execute_for(
            id,
            "UPDATE blocks SET is_excluded = ?1, updated_at = ?2 WHERE id = ?3",
            vec![
                i64::from(is_excluded).into(),
                at.timestamp_millis().into(),
                id_value(id),
            ],
        ))
    }

    fn write_streaming(
        &self,
        id: BlockId,
        text: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(self.execute_for(
            id,
            "UPDATE blocks SET streaming_content = ?1, is_streaming = 1, updated_at = ?2
             WHERE id = ?3",
            vec![text_value(text), at.timestamp_millis().into(), id_value(id)],
        ))
    }

    fn finalize(
        &self,
        id: BlockId,
        content: &RichDocument,
        metadata: &BlockMetadata,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>> {
        let encoded = serde_json::to_string(content)
            .and_then(|content| Ok((content, serde_json::to_string(metadata)?)));
        Box::pin(async move {
            let (content, metadata) = encoded?;
            self.execute_for(
                id,
                "UPDATE blocks SET content = ?1, metadata = ?2, streaming_content = NULL,
                     is_streaming = 0, stream_id = NULL, updated_at = ?3
                 WHERE id = ?4",
                vec![
                    text_value(content),
                    text_value(metadata),
                    at.timestamp_millis().into(),
                    id_value(id),
                ],
            )
            .await
        })
    }

    fn delete(&self, id: BlockId) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(self.execute_for(
            id,
            "DELETE FROM blocks WHERE id = ?1",
            vec![id_value(id)],
        ))
    }
}
