use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::models::User;
use crate::db::DbPool;
use crate::store::StoreError;

/// Minimal user lookup adapter. Registration and profile CRUD belong to the
/// external identity service; the messaging core only resolves ids it sees
/// on the wire.
#[derive(Clone)]
pub struct UserStore {
    db: DbPool,
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
        last_seen_at: row.get(4)?,
    })
}

impl UserStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Insert a user row. Exposed for the external registration flow and
    /// for test setup.
    pub async fn create(&self, username: &str, display_name: &str) -> Result<User, StoreError> {
        let db = self.db.clone();
        let username = username.to_string();
        let display_name = display_name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO users (username, display_name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![username, display_name, now],
            )?;

            Ok(User {
                id: conn.last_insert_rowid(),
                username,
                display_name,
                created_at: now,
                last_seen_at: None,
            })
        })
        .await?
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let user = conn
                .query_row(
                    "SELECT id, username, display_name, created_at, last_seen_at
                     FROM users WHERE id = ?1",
                    rusqlite::params![user_id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await?
    }

    pub async fn exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM users WHERE id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db_in_memory;

    #[tokio::test]
    async fn create_and_get() {
        let db = init_db_in_memory().unwrap();
        let store = UserStore::new(db);

        let user = store.create("ada", "Ada").await.unwrap();
        assert!(user.id > 0);
        assert!(user.last_seen_at.is_none());

        let fetched = store.get(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.username, "ada");

        assert!(store.exists(user.id).await.unwrap());
        assert!(!store.exists(user.id + 1).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let db = init_db_in_memory().unwrap();
        let store = UserStore::new(db);

        store.create("ada", "Ada").await.unwrap();
        assert!(store.create("ada", "Another Ada").await.is_err());
    }
}
