//! In-memory store for tests and ephemeral runs.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Mutex,
};

use {async_trait::async_trait, courier_common::types::ConversationPolicy};

use crate::{
    Error, Result,
    store::{ConversationStore, EventStore},
    types::{Conversation, ConversationMeta, Event, UpsertOutcome},
};

#[derive(Default)]
struct Inner {
    /// Per conversation, in insertion order, tagged with a global sequence.
    events: HashMap<String, Vec<(u64, Event)>>,
    keys: HashSet<(String, String)>,
    next_seq: u64,
    conversations: HashMap<String, Conversation>,
}

/// In-memory store backed by `HashMap`. No persistence.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn upsert_event(&self, event: &Event) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = (event.conversation_id.clone(), event.id.clone());
        if !inner.keys.insert(key) {
            return Ok(UpsertOutcome::DuplicateIgnored);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .events
            .entry(event.conversation_id.clone())
            .or_default()
            .push((seq, event.clone()));
        Ok(UpsertOutcome::Inserted)
    }

    async fn events_since(&self, conversation_id: &str, since: i64) -> Result<Vec<Event>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut events: Vec<_> = inner
            .events
            .get(conversation_id)
            .into_iter()
            .flatten()
            .filter(|(_, e)| e.timestamp > since)
            .collect();
        events.sort_by_key(|(seq, e)| (e.timestamp, *seq));
        Ok(events.into_iter().map(|(_, e)| e.clone()).collect())
    }

    async fn attach_media_path(
        &self,
        conversation_id: &str,
        event_id: &str,
        path: &Path,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let event = inner
            .events
            .get_mut(conversation_id)
            .and_then(|events| events.iter_mut().find(|(_, e)| e.id == event_id))
            .ok_or_else(|| Error::event_not_found(conversation_id, event_id))?;
        event.1.media_path = Some(path.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn observe(
        &self,
        conversation_id: &str,
        meta: &ConversationMeta,
        seen_at: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let conv = inner
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::unregistered(conversation_id, meta, seen_at));
        if meta.name.is_some() {
            conv.name.clone_from(&meta.name);
        }
        conv.is_group = meta.is_group;
        conv.last_seen_at = conv.last_seen_at.max(seen_at);
        Ok(())
    }

    async fn register(
        &self,
        conversation_id: &str,
        name: Option<&str>,
        policy: &ConversationPolicy,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = courier_common::time::now_ms();
        let conv = inner
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Conversation::unregistered(conversation_id, &ConversationMeta::default(), now)
            });
        conv.registered = true;
        if let Some(name) = name {
            conv.name = Some(name.to_string());
        }
        conv.policy = policy.clone();
        Ok(())
    }

    async fn deregister(&self, conversation_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(match inner.conversations.get_mut(conversation_id) {
            Some(conv) => {
                conv.registered = false;
                true
            },
            None => false,
        })
    }

    async fn is_registered(&self, conversation_id: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .conversations
            .get(conversation_id)
            .is_some_and(|c| c.registered))
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.conversations.get(conversation_id).cloned())
    }

    async fn list_conversations(&self, registered_only: bool) -> Result<Vec<Conversation>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = inner
            .conversations
            .values()
            .filter(|c| c.registered || !registered_only)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        Ok(list)
    }

    async fn cursor(&self, conversation_id: &str) -> Result<i64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .conversations
            .get(conversation_id)
            .map_or(0, |c| c.cursor_timestamp))
    }

    async fn advance_cursor(&self, conversation_id: &str, new_ts: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let conv = inner
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| Error::conversation_not_found(conversation_id))?;
        if new_ts < conv.cursor_timestamp {
            return Err(Error::StaleCursor {
                conversation_id: conversation_id.to_string(),
                current: conv.cursor_timestamp,
                requested: new_ts,
            });
        }
        conv.cursor_timestamp = new_ts;
        Ok(())
    }
}
