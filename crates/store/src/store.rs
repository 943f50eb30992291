//! Persistence traits for events and conversations.

use std::path::Path;

use {async_trait::async_trait, courier_common::types::ConversationPolicy};

use crate::{
    Result,
    types::{Conversation, ConversationMeta, Event, UpsertOutcome},
};

/// Append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event. Re-ingesting the same `(conversation_id, id)` is a
    /// no-op reported as [`UpsertOutcome::DuplicateIgnored`].
    async fn upsert_event(&self, event: &Event) -> Result<UpsertOutcome>;

    /// Events with `timestamp > since`, ascending by timestamp then insertion
    /// order.
    async fn events_since(&self, conversation_id: &str, since: i64) -> Result<Vec<Event>>;

    /// Record where an event's attachment was stored locally.
    async fn attach_media_path(
        &self,
        conversation_id: &str,
        event_id: &str,
        path: &Path,
    ) -> Result<()>;
}

/// Conversation registry and dispatch cursors.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Note that a conversation was seen, creating it unregistered on first
    /// sight and refreshing its display metadata.
    async fn observe(
        &self,
        conversation_id: &str,
        meta: &ConversationMeta,
        seen_at: i64,
    ) -> Result<()>;

    /// Mark a conversation eligible for dispatch with the given policy.
    async fn register(
        &self,
        conversation_id: &str,
        name: Option<&str>,
        policy: &ConversationPolicy,
    ) -> Result<()>;

    /// Returns `false` if the conversation was unknown.
    async fn deregister(&self, conversation_id: &str) -> Result<bool>;

    async fn is_registered(&self, conversation_id: &str) -> Result<bool>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// All conversations, or only registered ones, ordered by id.
    async fn list_conversations(&self, registered_only: bool) -> Result<Vec<Conversation>>;

    /// Last dispatched timestamp; 0 for unknown conversations.
    async fn cursor(&self, conversation_id: &str) -> Result<i64>;

    /// Move the cursor forward. Equal values are accepted; smaller values
    /// fail with [`crate::Error::StaleCursor`].
    async fn advance_cursor(&self, conversation_id: &str, new_ts: i64) -> Result<()>;
}

/// Both halves of the durable store.
pub trait Store: EventStore + ConversationStore {}

impl<T: EventStore + ConversationStore + ?Sized> Store for T {}
