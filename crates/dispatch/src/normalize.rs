//! Raw transport events to canonical, deduplicated store records.

use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_channels::{InboundEvent, InboundSink},
    courier_store::{ConversationMeta, Event, Store, UpsertOutcome},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, ingest as ingest_metrics, labels};

use crate::Result;

/// Receives "new work may exist" signals for a conversation.
pub trait DispatchTrigger: Send + Sync {
    fn notify(&self, conversation_id: &str);
}

/// Why an inbound event was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The conversation is not on the allow-list.
    Unregistered,
    /// No text and no attachment.
    Empty,
}

impl DiscardReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Stored(Event),
    Duplicate(Event),
    Discarded(DiscardReason),
}

/// Ingestion entry point; implements [`InboundSink`] for transports.
pub struct Normalizer {
    store: Arc<dyn Store>,
    trigger: Arc<dyn DispatchTrigger>,
    reply_prefix: Option<String>,
}

impl Normalizer {
    pub fn new(store: Arc<dyn Store>, trigger: Arc<dyn DispatchTrigger>) -> Self {
        Self {
            store,
            trigger,
            reply_prefix: None,
        }
    }

    /// Prefix the bridge puts on its own replies. With a prefix, only
    /// `from_me` events carrying it count as self-authored; messages the
    /// account owner types by hand are treated as user input.
    pub fn with_reply_prefix(mut self, prefix: Option<String>) -> Self {
        self.reply_prefix = prefix;
        self
    }

    /// Map a raw event to its canonical form without touching the store.
    #[must_use]
    pub fn canonicalize(&self, raw: &InboundEvent) -> Event {
        let body = raw.body.clone().unwrap_or_default();
        let is_self_authored = raw.from_me
            && self
                .reply_prefix
                .as_deref()
                .is_none_or(|prefix| body.starts_with(prefix));
        Event {
            id: raw.message_id.clone(),
            conversation_id: raw.chat_id.clone(),
            sender_id: raw.sender_id.clone(),
            sender_display_name: raw
                .sender_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| raw.sender_id.clone()),
            body,
            timestamp: raw.timestamp_ms,
            is_self_authored,
            attachment_ref: raw.attachment.as_ref().map(|a| a.reference.clone()),
            media_path: None,
        }
    }

    pub async fn normalize(&self, raw: InboundEvent) -> Result<Normalized> {
        #[cfg(feature = "metrics")]
        counter!(ingest_metrics::EVENTS_RECEIVED_TOTAL).increment(1);

        let meta = ConversationMeta {
            name: raw.chat_name.clone(),
            is_group: raw.is_group,
        };
        self.store
            .observe(&raw.chat_id, &meta, courier_common::time::now_ms())
            .await?;

        if !self.store.is_registered(&raw.chat_id).await? {
            return Ok(self.discard(&raw, DiscardReason::Unregistered));
        }

        let event = self.canonicalize(&raw);
        if event.body.trim().is_empty() && event.attachment_ref.is_none() {
            return Ok(self.discard(&raw, DiscardReason::Empty));
        }

        match self.store.upsert_event(&event).await? {
            UpsertOutcome::Inserted => {
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::EVENTS_STORED_TOTAL).increment(1);
                debug!(
                    conversation_id = %event.conversation_id,
                    event_id = %event.id,
                    timestamp = event.timestamp,
                    self_authored = event.is_self_authored,
                    "event stored"
                );
                if !event.is_self_authored {
                    self.trigger.notify(&event.conversation_id);
                }
                Ok(Normalized::Stored(event))
            },
            UpsertOutcome::DuplicateIgnored => {
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::EVENTS_DUPLICATE_TOTAL).increment(1);
                debug!(
                    conversation_id = %event.conversation_id,
                    event_id = %event.id,
                    "duplicate event ignored"
                );
                Ok(Normalized::Duplicate(event))
            },
        }
    }

    fn discard(&self, raw: &InboundEvent, reason: DiscardReason) -> Normalized {
        #[cfg(feature = "metrics")]
        counter!(ingest_metrics::EVENTS_DISCARDED_TOTAL, labels::REASON => reason.as_str())
            .increment(1);
        debug!(
            conversation_id = %raw.chat_id,
            event_id = %raw.message_id,
            reason = reason.as_str(),
            "event discarded"
        );
        Normalized::Discarded(reason)
    }
}

#[async_trait]
impl InboundSink for Normalizer {
    async fn deliver(&self, event: InboundEvent) -> courier_channels::Result<()> {
        let conversation_id = event.chat_id.clone();
        match self.normalize(event).await {
            Ok(_) => Ok(()),
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::ERRORS_TOTAL).increment(1);
                warn!(conversation_id = %conversation_id, error = %e, "failed to ingest event");
                Err(courier_channels::Error::external("ingest event", e))
            },
        }
    }
}
