//! Durable per-user notification records. Written by the fan-out router
//! exactly when a live push was not possible; read and acknowledged by the
//! external API surface.

use chrono::Utc;
use rusqlite::types::Type;

use crate::db::models::{Notification, NotificationKind};
use crate::db::DbPool;
use crate::store::StoreError;

#[derive(Clone)]
pub struct NotificationSink {
    db: DbPool,
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind_text: String = row.get(2)?;
    let kind = NotificationKind::from_str(&kind_text).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(2, kind_text, Type::Text)
    })?;

    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind,
        content: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl NotificationSink {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn write(
        &self,
        user_id: i64,
        kind: NotificationKind,
        content: &str,
    ) -> Result<Notification, StoreError> {
        let db = self.db.clone();
        let content = content.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO notifications (user_id, kind, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, kind.as_str(), content, now],
            )?;

            Ok(Notification {
                id: conn.last_insert_rowid(),
                user_id,
                kind,
                content,
                read: false,
                created_at: now,
            })
        })
        .await?
    }

    /// Notifications for a user, newest first.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Notification>, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, kind, content, read, created_at
                 FROM notifications WHERE user_id = ?1
                 ORDER BY id DESC",
            )?;

            let notifications = stmt
                .query_map(rusqlite::params![user_id], notification_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(notifications)
        })
        .await?
    }

    /// Flip the read flag on everything pending for a user. The client
    /// acknowledgment path — idempotent by construction.
    pub async fn mark_all_read(&self, user_id: i64) -> Result<usize, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                rusqlite::params![user_id],
            )?;
            Ok(updated)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db_in_memory;
    use crate::store::UserStore;

    #[tokio::test]
    async fn write_list_and_ack() {
        let db = init_db_in_memory().unwrap();
        let users = UserStore::new(db.clone());
        let sink = NotificationSink::new(db);
        let user = users.create("carol", "Carol").await.unwrap();

        sink.write(user.id, NotificationKind::Message, "New message from Ada")
            .await
            .unwrap();
        sink.write(user.id, NotificationKind::Match, "You matched with Brendan")
            .await
            .unwrap();

        let pending = sink.list_for_user(user.id).await.unwrap();
        assert_eq!(pending.len(), 2);
        // Newest first.
        assert_eq!(pending[0].kind, NotificationKind::Match);
        assert!(pending.iter().all(|n| !n.read));

        assert_eq!(sink.mark_all_read(user.id).await.unwrap(), 2);
        assert_eq!(sink.mark_all_read(user.id).await.unwrap(), 0);

        let acked = sink.list_for_user(user.id).await.unwrap();
        assert!(acked.iter().all(|n| n.read));
    }
}
