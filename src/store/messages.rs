//! Durable append-only log of chat messages, queryable by unordered
//! participant pair, with an idempotent read-marking update.

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::models::Message;
use crate::db::DbPool;
use crate::store::StoreError;

#[derive(Clone)]
pub struct MessageStore {
    db: DbPool,
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        read_at: row.get(5)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, created_at, read_at";

impl MessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Append a message and return it with its durable id. The insert is the
    /// serialization point: messages from one sender to one receiver are
    /// persisted in the order they were accepted.
    pub async fn append(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<Message, StoreError> {
        let db = self.db.clone();
        let content = content.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender_id, receiver_id, content, now],
            )?;

            Ok(Message {
                id: conn.last_insert_rowid(),
                sender_id,
                receiver_id,
                content,
                created_at: now,
                read_at: None,
            })
        })
        .await?
    }

    pub async fn get(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let message = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    rusqlite::params![message_id],
                    message_from_row,
                )
                .optional()?;
            Ok(message)
        })
        .await?
    }

    /// All messages between two users, in persisted order, regardless of
    /// which of the two sent which.
    pub async fn list_between(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY id ASC"
            ))?;

            let messages = stmt
                .query_map(rusqlite::params![user_a, user_b], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await?
    }

    /// Mark a message read. read_at is set only if still NULL, so a second
    /// call is a no-op, not an error. Returns the row as stored afterwards,
    /// or None for an unknown id.
    pub async fn mark_read(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                rusqlite::params![message_id, now],
            )?;

            let message = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    rusqlite::params![message_id],
                    message_from_row,
                )
                .optional()?;
            Ok(message)
        })
        .await?
    }

    /// Mark every unread message from one sender to one receiver as read.
    /// Returns the number of rows updated.
    pub async fn mark_conversation_read(
        &self,
        receiver_id: i64,
        sender_id: i64,
    ) -> Result<usize, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let now = Utc::now().to_rfc3339();

            let updated = conn.execute(
                "UPDATE messages SET read_at = ?3
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND read_at IS NULL",
                rusqlite::params![receiver_id, sender_id, now],
            )?;
            Ok(updated)
        })
        .await?
    }

    /// Count of unread messages addressed to a user. Sent to the client
    /// once, immediately after its connection registers.
    pub async fn count_unread(&self, user_id: i64) -> Result<i64, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read_at IS NULL",
                rusqlite::params![user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await?
    }
}
