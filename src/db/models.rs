//! Database row types for all tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use serde::{Deserialize, Serialize};

/// User record in the users table. Profile management lives outside this
/// service; we keep only what the messaging core needs: an identity to
/// validate frames against and a display name for notification text.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub created_at: String,
    /// Written on disconnect/eviction only — NULL while the user has never
    /// disconnected or is currently online.
    pub last_seen_at: Option<String>,
}

/// Durable chat line between two users.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: String,
    /// Set exactly once by the read-marking operation, never cleared.
    pub read_at: Option<String>,
}

/// Durable record of an event a user was not live to receive.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}

/// Notification categories. Stored as TEXT in the notifications table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Message,
    Match,
    System,
}

impl NotificationKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "match" => Some(Self::Match),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Match => "match",
            Self::System => "system",
        }
    }
}
