//! Durable store for inbound events and per-conversation dispatch cursors.
//!
//! Two backends implement the same traits: [`SqliteStore`] for the real
//! database and [`InMemoryStore`] for tests and throwaway runs.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    store::{ConversationStore, EventStore, Store},
    store_memory::InMemoryStore,
    store_sqlite::SqliteStore,
    types::{Conversation, ConversationMeta, Event, UpsertOutcome},
};

/// Run database migrations for the store.
///
/// Creates the `events` and `conversations` tables. Call at startup before
/// [`SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
