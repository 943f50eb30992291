use std::path::PathBuf;

use {
    courier_common::types::ConversationPolicy,
    serde::{Deserialize, Serialize},
};

/// A canonical inbound chat event.
///
/// `(conversation_id, id)` is the natural key. Events are never mutated
/// except to record a resolved `media_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    /// May be empty when the event only carries an attachment.
    pub body: String,
    /// Transport time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub is_self_authored: bool,
    /// Opaque transport reference to an attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    /// Local path once the attachment has been downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<PathBuf>,
}

/// Result of [`crate::EventStore::upsert_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    DuplicateIgnored,
}

/// Display metadata captured from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMeta {
    pub name: Option<String>,
    pub is_group: bool,
}

/// A chat thread and its dispatch bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    /// Only registered conversations are dispatched to the agent.
    pub registered: bool,
    pub name: Option<String>,
    pub is_group: bool,
    /// Highest event timestamp included in a successfully dispatched batch.
    pub cursor_timestamp: i64,
    pub policy: ConversationPolicy,
    pub created_at: i64,
    pub last_seen_at: i64,
}

impl Conversation {
    pub(crate) fn unregistered(conversation_id: &str, meta: &ConversationMeta, now: i64) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            registered: false,
            name: meta.name.clone(),
            is_group: meta.is_group,
            cursor_timestamp: 0,
            policy: ConversationPolicy::default(),
            created_at: now,
            last_seen_at: now,
        }
    }
}
