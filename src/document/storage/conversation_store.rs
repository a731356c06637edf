//! Conversation persistence.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::document::core::conversation::{Conversation, ConversationStatus};
use crate::document::core::errors::{DocError, DocResult};
use crate::document::core::ids::{ConversationId, UserId};
use crate::document::storage::{Database, StoreFuture, from_millis};

/// Conversation store trait.
pub trait ConversationStore: Send + Sync {
    /// Insert a new conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(&self, conversation: &Conversation) -> StoreFuture<'_, DocResult<()>>;

    /// Fetch a conversation by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the row is corrupt.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, DocResult<Option<Conversation>>>;

    /// All conversations owned by a user, most recently active first.
    ///
    /// # Errors
    /// Returns an error if storage access fails or a row is corrupt.
    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, DocResult<Vec<Conversation>>>;

    /// Set the generation status and stamp `updated_at`.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` if the row is missing.
    fn set_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>>;

    /// Replace the title.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` if the row is missing.
    fn rename(
        &self,
        id: ConversationId,
        title: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>>;

    /// Stamp `updated_at` only.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` if the row is missing.
    fn touch(&self, id: ConversationId, at: DateTime<Utc>) -> StoreFuture<'_, DocResult<()>>;

    /// Delete a conversation and, by cascade, its blocks.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` if the row is missing.
    fn delete(&self, id: ConversationId) -> StoreFuture<'_, DocResult<()>>;
}

/// `SQLite` implementation of the conversation store.
#[derive(Clone)]
pub struct SqliteConversationStore {
    conn: Connection,
}

type ConversationRow = (ConversationId, UserId, String, String, i64, i64);

const SELECT_COLUMNS: &str = "id, user_id, title, status, created_at, updated_at";

impl SqliteConversationStore {
    /// Build a store over an opened database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode(row: ConversationRow) -> DocResult<Conversation> {
        let (id, user_id, title, status, created_at, updated_at) = row;
        let status = status
            .parse()
            .map_err(|raw| DocError::CorruptRecord(format!("unknown conversation status {raw}")))?;
        Ok(Conversation {
            id,
            user_id,
            title,
            status,
            created_at: from_millis(created_at, "created_at")?,
            updated_at: from_millis(updated_at, "updated_at")?,
        })
    }

    async fn update(
        &self,
        id: ConversationId,
        sql: &'static str,
        value: Option<String>,
        at: DateTime<Utc>,
    ) -> DocResult<()> {
        let at = at.timestamp_millis();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = match value {
                    Some(value) => conn.execute(sql, rusqlite::params![value, at, id])?,
                    None => conn.execute(sql, rusqlite::params![at, id])?,
                };
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(DocError::ConversationNotFound(id));
        }
        Ok(())
    }
}

impl ConversationStore for SqliteConversationStore {
    fn create(&self, conversation: &Conversation) -> StoreFuture<'_, DocResult<()>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let status = conversation.status.as_str();
            let created_at = conversation.created_at.timestamp_millis();
            let updated_at = conversation.updated_at.timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO conversations (id, user_id, title, status, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![
                            conversation.id,
                            conversation.user_id,
                            conversation.title,
                            status,
                            created_at,
                            updated_at
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn get(&self, id: ConversationId) -> StoreFuture<'_, DocResult<Option<Conversation>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {SELECT_COLUMNS} FROM conversations WHERE id = ?1"),
                            rusqlite::params![id],
                            Self::read_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(Self::decode).transpose()
        })
    }

    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, DocResult<Vec<Conversation>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM conversations
                         WHERE user_id = ?1 ORDER BY updated_at DESC, created_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![user_id], Self::read_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(Self::decode).collect()
        })
    }

    fn set_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(self.update(
            id,
            "UPDATE conversations SET status = ?1, updated_at = ?2 WHERE id = ?3",
            Some(status.as_str().to_string()),
            at,
        ))
    }

    fn rename(
        &self,
        id: ConversationId,
        title: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(self.update(
            id,
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            Some(title),
            at,
        ))
    }

    fn touch(&self, id: ConversationId, at: DateTime<Utc>) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(self.update(
            id,
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            None,
            at,
        ))
    }

    fn delete(&self, id: ConversationId) -> StoreFuture<'_, DocResult<()>> {
        Box::pin(async move {
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn
                        .execute("DELETE FROM conversations WHERE id = ?1", rusqlite::params![id])?;
                    Ok(changed)
                })
                .await?;

            if changed == 0 {
                return Err(DocError::ConversationNotFound(id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteConversationStore {
        let db = Database::open_in_memory().await.unwrap();
        SqliteConversationStore::new(&db)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let conversation = Conversation::new(UserId::new(), "Trip");
        store.create(&conversation).await.unwrap();

        let loaded = store.get(conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Trip");
        assert_eq!(loaded.status, ConversationStatus::Idle);
        assert_eq!(loaded.user_id, conversation.user_id);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            conversation.created_at.timestamp_millis()
        );

        assert!(store.get(ConversationId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_recent_first() {
        let store = store().await;
        let user = UserId::new();
        let older = Conversation::new(user, "older");
        let newer = Conversation::new(user, "newer");
        let foreign = Conversation::new(UserId::new(), "foreign");
        for conversation in [&older, &newer, &foreign] {
            store.create(conversation).await.unwrap();
        }
        store
            .touch(newer.id, Utc::now() + Duration::seconds(5))
            .await
            .unwrap();

        let titles: Vec<String> = store
            .list_for_user(user)
            .await
            .unwrap()
            .into_iter()
            .map(|conversation| conversation.title)
            .collect();
        assert_eq!(titles, ["newer", "older"]);
    }

    #[tokio::test]
    async fn test_status_rename_delete() {
        let store = store().await;
        let conversation = Conversation::new(UserId::new(), "a");
        store.create(&conversation).await.unwrap();

        store
            .set_status(conversation.id, ConversationStatus::Streaming, Utc::now())
            .await
            .unwrap();
        store
            .rename(conversation.id, "b".to_string(), Utc::now())
            .await
            .unwrap();
        let loaded = store.get(conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::Streaming);
        assert_eq!(loaded.title, "b");

        store.delete(conversation.id).await.unwrap();
        assert!(matches!(
            store.delete(conversation.id).await,
            Err(DocError::ConversationNotFound(_))
        ));
        assert!(matches!(
            store
                .set_status(conversation.id, ConversationStatus::Error, Utc::now())
                .await,
            Err(DocError::ConversationNotFound(_))
        ));
    }
}
