//! Durable leaves consumed by the messaging core.
//!
//! Each store wraps the shared rusqlite connection and runs its queries on
//! the blocking pool. The stores provide their own internal consistency:
//! appends are atomic, read-marking is idempotent.

pub mod messages;
pub mod notifications;
pub mod users;

pub use messages::MessageStore;
pub use notifications::NotificationSink;
pub use users::UserStore;

use thiserror::Error;

/// Failures surfaced by the store layer. Recovered at the protocol engine
/// boundary — a failed store call never crashes a connection's loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
