//! Builds the next batch of pending events for a conversation.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    courier_channels::gating::matches_any,
    courier_common::types::EchoPolicy,
    courier_config::{DispatchConfig, MediaConfig},
    courier_media::MediaResolver,
    courier_store::{Event, Store},
    futures::future::join_all,
    regex::Regex,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, media as media_metrics};

use crate::{Result, context};

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Marks an event as addressed to the agent.
    pub trigger: Regex,
    /// Sender ID glob patterns of other automated participants.
    pub bot_senders: Vec<String>,
    /// Keep only the most recent N events in the document. Older pending
    /// events are skipped for good once the batch is delivered.
    pub max_batch_events: Option<usize>,
    /// Bound on each attachment lookup.
    pub media_timeout: Duration,
}

impl BatcherConfig {
    pub fn new(trigger: Regex) -> Self {
        Self {
            trigger,
            bot_senders: Vec::new(),
            max_batch_events: None,
            media_timeout: Duration::from_secs(MediaConfig::default().resolve_timeout_secs),
        }
    }

    pub fn from_config(dispatch: &DispatchConfig, media: &MediaConfig) -> Result<Self> {
        Ok(Self {
            trigger: Regex::new(&dispatch.effective_trigger_pattern())?,
            bot_senders: dispatch.bot_senders.clone(),
            max_batch_events: dispatch.max_batch_events,
            media_timeout: Duration::from_secs(media.resolve_timeout_secs),
        })
    }
}

/// Events selected for one dispatch attempt.
#[derive(Debug, Clone)]
pub struct Batch {
    pub conversation_id: String,
    /// Kept events, ascending by timestamp then arrival.
    pub events: Vec<Event>,
    /// Highest timestamp among all pending events, including filtered ones.
    /// The cursor moves here once the batch is delivered.
    pub max_timestamp: i64,
    /// Kept events left out because of `max_batch_events`.
    pub omitted: usize,
    /// Attachments that could not be resolved in time.
    pub unresolved: usize,
}

impl Batch {
    pub fn to_document(&self) -> Result<String> {
        context::render(&self.conversation_id, &self.events)
    }
}

/// Why no batch was produced. The cursor does not move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// Unknown or deregistered conversation.
    NotRegistered,
    NoEvents,
    /// Every pending event was an excluded echo.
    AllFiltered,
    /// The conversation requires a trigger and none of the pending events
    /// matched it.
    AwaitingTrigger,
}

impl EmptyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRegistered => "not_registered",
            Self::NoEvents => "no_events",
            Self::AllFiltered => "all_filtered",
            Self::AwaitingTrigger => "awaiting_trigger",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Ready(Batch),
    Empty(EmptyReason),
}

pub struct Batcher {
    store: Arc<dyn Store>,
    media: Option<Arc<dyn MediaResolver>>,
    config: BatcherConfig,
}

impl Batcher {
    pub fn new(store: Arc<dyn Store>, config: BatcherConfig) -> Self {
        Self {
            store,
            media: None,
            config,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaResolver>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn build_batch(&self, conversation_id: &str) -> Result<BuildOutcome> {
        let Some(conversation) = self
            .store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.registered)
        else {
            return Ok(BuildOutcome::Empty(EmptyReason::NotRegistered));
        };

        let pending = self
            .store
            .events_since(conversation_id, conversation.cursor_timestamp)
            .await?;
        let Some(max_timestamp) = pending.iter().map(|e| e.timestamp).max() else {
            return Ok(BuildOutcome::Empty(EmptyReason::NoEvents));
        };

        let echo = conversation.policy.echo;
        let mut events: Vec<Event> = pending
            .into_iter()
            .filter(|e| self.keep(e, echo))
            .collect();
        if events.is_empty() {
            return Ok(BuildOutcome::Empty(EmptyReason::AllFiltered));
        }

        if conversation.policy.requires_trigger
            && !events
                .iter()
                .any(|e| !e.is_self_authored && self.config.trigger.is_match(&e.body))
        {
            debug!(
                conversation_id,
                pending = events.len(),
                "no trigger among pending events"
            );
            return Ok(BuildOutcome::Empty(EmptyReason::AwaitingTrigger));
        }

        let mut omitted = 0;
        if let Some(limit) = self.config.max_batch_events
            && events.len() > limit
        {
            omitted = events.len() - limit;
            events.drain(..omitted);
        }

        let unresolved = self.resolve_attachments(conversation_id, &mut events).await?;

        Ok(BuildOutcome::Ready(Batch {
            conversation_id: conversation_id.to_string(),
            events,
            max_timestamp,
            omitted,
            unresolved,
        }))
    }

    fn keep(&self, event: &Event, echo: EchoPolicy) -> bool {
        if event.is_self_authored {
            return echo.include_self;
        }
        echo.include_bots || !matches_any(&event.sender_id, &self.config.bot_senders)
    }

    /// Resolve missing attachment paths concurrently, persisting each hit.
    /// Returns how many stayed unresolved.
    async fn resolve_attachments(&self, conversation_id: &str, events: &mut [Event]) -> Result<usize> {
        let pending: Vec<(usize, String)> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.media_path.is_none())
            .filter_map(|(i, e)| e.attachment_ref.clone().map(|r| (i, r)))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }
        let Some(media) = &self.media else {
            return Ok(pending.len());
        };

        let timeout = self.config.media_timeout;
        let lookups = pending.iter().map(|(_, reference)| {
            let media = Arc::clone(media);
            let reference = reference.clone();
            async move { tokio::time::timeout(timeout, media.resolve(&reference)).await }
        });
        let results = join_all(lookups).await;

        let mut unresolved = 0;
        for ((index, reference), result) in pending.into_iter().zip(results) {
            #[cfg(feature = "metrics")]
            counter!(media_metrics::RESOLVE_TOTAL).increment(1);

            let path: Option<PathBuf> = match result {
                Ok(Ok(path)) => Some(path),
                Ok(Err(e)) => {
                    warn!(conversation_id, reference = %reference, error = %e, "attachment unresolved");
                    None
                },
                Err(_) => {
                    warn!(
                        conversation_id,
                        reference = %reference,
                        timeout_ms = timeout.as_millis() as u64,
                        "attachment resolution timed out"
                    );
                    None
                },
            };
            match path {
                Some(path) => {
                    let event = &mut events[index];
                    self.store
                        .attach_media_path(conversation_id, &event.id, &path)
                        .await?;
                    event.media_path = Some(path);
                },
                None => {
                    #[cfg(feature = "metrics")]
                    counter!(media_metrics::UNRESOLVED_TOTAL).increment(1);
                    unresolved += 1;
                },
            }
        }
        Ok(unresolved)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {
        async_trait::async_trait,
        courier_common::types::ConversationPolicy,
        courier_store::{ConversationStore, EventStore, InMemoryStore},
    };

    use super::*;

    struct FakeMedia {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaResolver for FakeMedia {
        async fn resolve(&self, reference: &str) -> courier_media::Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match reference {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(PathBuf::from("/never"))
                },
                "missing" => Err(courier_media::Error::not_found(reference)),
                other => Ok(PathBuf::from(format!("/media/{other}"))),
            }
        }
    }

    fn event(id: &str, ts: i64) -> Event {
        Event {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "u1".into(),
            sender_display_name: "Alice".into(),
            body: format!("message {id}"),
            timestamp: ts,
            is_self_authored: false,
            attachment_ref: None,
            media_path: None,
        }
    }

    fn config() -> BatcherConfig {
        BatcherConfig::from_config(&DispatchConfig::default(), &MediaConfig::default()).unwrap()
    }

    async fn store_with(policy: ConversationPolicy, events: &[Event]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.register("c1", None, &policy).await.unwrap();
        for e in events {
            store.upsert_event(e).await.unwrap();
        }
        store
    }

    fn ready(outcome: BuildOutcome) -> Batch {
        match outcome {
            BuildOutcome::Ready(batch) => batch,
            BuildOutcome::Empty(reason) => panic!("expected a batch, got {reason:?}"),
        }
    }

    fn ids(batch: &Batch) -> Vec<&str> {
        batch.events.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn unregistered_is_empty() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_event(&event("e1", 10)).await.unwrap();
        let batcher = Batcher::new(store, config());
        assert!(matches!(
            batcher.build_batch("c1").await.unwrap(),
            BuildOutcome::Empty(EmptyReason::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn reads_past_cursor_in_order() {
        let store = store_with(
            ConversationPolicy::default(),
            &[event("e2", 20), event("e1", 10), event("e0", 5)],
        )
        .await;
        store.advance_cursor("c1", 5).await.unwrap();
        let batcher = Batcher::new(store, config());

        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(ids(&batch), ["e1", "e2"]);
        assert_eq!(batch.max_timestamp, 20);
    }

    #[tokio::test]
    async fn no_events_past_cursor_is_empty() {
        let store = store_with(ConversationPolicy::default(), &[event("e1", 10)]).await;
        store.advance_cursor("c1", 10).await.unwrap();
        let batcher = Batcher::new(store, config());
        assert!(matches!(
            batcher.build_batch("c1").await.unwrap(),
            BuildOutcome::Empty(EmptyReason::NoEvents)
        ));
    }

    #[tokio::test]
    async fn echoes_are_filtered_but_count_toward_max_timestamp() {
        let mut own = event("own", 30);
        own.is_self_authored = true;
        let mut bot = event("bot", 25);
        bot.sender_id = "relay@bots.example".into();
        let store = store_with(ConversationPolicy::default(), &[event("e1", 10), bot, own]).await;

        let mut cfg = config();
        cfg.bot_senders = vec!["*@bots.example".into()];
        let batcher = Batcher::new(store, cfg);

        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(ids(&batch), ["e1"]);
        assert_eq!(batch.max_timestamp, 30);
    }

    #[tokio::test]
    async fn echo_policy_can_include_echoes() {
        let mut own = event("own", 30);
        own.is_self_authored = true;
        let mut bot = event("bot", 25);
        bot.sender_id = "relay@bots.example".into();
        let policy = ConversationPolicy {
            echo: EchoPolicy {
                include_self: true,
                include_bots: true,
            },
            ..Default::default()
        };
        let store = store_with(policy, &[bot, own]).await;
        let mut cfg = config();
        cfg.bot_senders = vec!["*@bots.example".into()];
        let batcher = Batcher::new(store, cfg);

        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(ids(&batch), ["bot", "own"]);
    }

    #[tokio::test]
    async fn only_echoes_is_all_filtered() {
        let mut own = event("own", 30);
        own.is_self_authored = true;
        let store = store_with(ConversationPolicy::default(), &[own]).await;
        let batcher = Batcher::new(store, config());
        assert!(matches!(
            batcher.build_batch("c1").await.unwrap(),
            BuildOutcome::Empty(EmptyReason::AllFiltered)
        ));
    }

    #[tokio::test]
    async fn trigger_required() {
        let policy = ConversationPolicy {
            requires_trigger: true,
            ..Default::default()
        };
        let store = store_with(policy, &[event("e1", 10)]).await;
        let batcher = Batcher::new(store.clone(), config());
        assert!(matches!(
            batcher.build_batch("c1").await.unwrap(),
            BuildOutcome::Empty(EmptyReason::AwaitingTrigger)
        ));

        let mut mention = event("e2", 20);
        mention.body = "@Andy can you summarise?".into();
        store.upsert_event(&mention).await.unwrap();
        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(ids(&batch), ["e1", "e2"]);
    }

    #[tokio::test]
    async fn max_batch_events_keeps_newest() {
        let store = store_with(
            ConversationPolicy::default(),
            &[event("e1", 10), event("e2", 20), event("e3", 30)],
        )
        .await;
        let mut cfg = config();
        cfg.max_batch_events = Some(2);
        let batcher = Batcher::new(store, cfg);

        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(ids(&batch), ["e2", "e3"]);
        assert_eq!(batch.omitted, 1);
        assert_eq!(batch.max_timestamp, 30);

        // Once delivered, the truncated event is behind the cursor for good.
        batcher
            .store()
            .advance_cursor("c1", batch.max_timestamp)
            .await
            .unwrap();
        assert!(matches!(
            batcher.build_batch("c1").await.unwrap(),
            BuildOutcome::Empty(EmptyReason::NoEvents)
        ));
    }

    #[tokio::test]
    async fn attachments_resolve_or_flag() {
        let mut ok = event("ok", 10);
        ok.attachment_ref = Some("photo".into());
        ok.body.clear();
        let mut missing = event("missing", 20);
        missing.attachment_ref = Some("missing".into());
        let mut slow = event("slow", 30);
        slow.attachment_ref = Some("slow".into());
        let store = store_with(ConversationPolicy::default(), &[ok, missing, slow]).await;

        let mut cfg = config();
        cfg.media_timeout = Duration::from_millis(50);
        let media = Arc::new(FakeMedia {
            calls: AtomicUsize::new(0),
        });
        let batcher = Batcher::new(store.clone(), cfg).with_media(media.clone());

        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(batch.unresolved, 2);
        assert_eq!(
            batch.events[0].media_path.as_deref(),
            Some(std::path::Path::new("/media/photo"))
        );
        assert!(batch.events[1].media_path.is_none());

        let doc = batch.to_document().unwrap();
        assert!(doc.contains("<attachment path=\"/media/photo\"/>"));
        assert!(doc.contains("<attachment ref=\"missing\" unresolved=\"true\"/>"));

        // The resolved path was persisted, so it is not looked up again.
        let stored = store.events_since("c1", 0).await.unwrap();
        assert!(stored[0].media_path.is_some());
        let before = media.calls.load(Ordering::SeqCst);
        ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(media.calls.load(Ordering::SeqCst), before + 2);
    }

    #[tokio::test]
    async fn attachments_without_resolver_are_unresolved() {
        let mut e = event("e1", 10);
        e.attachment_ref = Some("r1".into());
        let store = store_with(ConversationPolicy::default(), &[e]).await;
        let batcher = Batcher::new(store, config());
        let batch = ready(batcher.build_batch("c1").await.unwrap());
        assert_eq!(batch.unresolved, 1);
    }
}
