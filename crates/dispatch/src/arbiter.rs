//! Per-conversation dispatch state machine.
//!
//! ```text
//!   notify           attempt done, no rerun
//! Idle ───▶ Running ─────────────────────────▶ Idle
//!             │  ▲
//!      notify │  │ attempt done
//!             ▼  │
//!          PendingRerun ◀── notify (no-op)
//! ```
//!
//! A conversation in `Running` has exactly one task looping over dispatch
//! attempts. Notifies that arrive meanwhile collapse into a single
//! `PendingRerun`, so a burst of events costs at most one extra attempt.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Instant,
};

use {
    courier_store::Store,
    dashmap::DashMap,
    futures::FutureExt,
    tokio_util::task::TaskTracker,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, gauge, histogram, labels};

use crate::{
    Error, Result,
    batch::{Batcher, BuildOutcome, EmptyReason},
    invoker::BatchInvoker,
    normalize::DispatchTrigger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running,
    /// Running, and at least one notify arrived since the attempt started.
    PendingRerun,
}

/// Hooks for attempt outcomes. Failures never reach the caller of
/// [`DispatchArbiter::notify`]; this is where they surface.
pub trait DispatchObserver: Send + Sync {
    fn on_dispatched(&self, _conversation_id: &str, _events: usize, _max_timestamp: i64) {}

    fn on_empty(&self, _conversation_id: &str, _reason: EmptyReason) {}

    fn on_failure(&self, _conversation_id: &str, _error: &Error) {}
}

enum Attempt {
    Dispatched { events: usize, max_timestamp: i64 },
    Empty(EmptyReason),
}

struct Inner {
    states: DashMap<String, DispatchState>,
    batcher: Arc<Batcher>,
    invoker: Arc<dyn BatchInvoker>,
    observer: Option<Arc<dyn DispatchObserver>>,
    tracker: TaskTracker,
}

/// Guarantees at most one in-flight agent invocation per conversation.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DispatchArbiter {
    inner: Arc<Inner>,
}

impl DispatchArbiter {
    pub fn new(batcher: Arc<Batcher>, invoker: Arc<dyn BatchInvoker>) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: DashMap::new(),
                batcher,
                invoker,
                observer: None,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Must be called before the arbiter is cloned or notified.
    pub fn with_observer(self, observer: Arc<dyn DispatchObserver>) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.observer = Some(observer);
                Self {
                    inner: Arc::new(inner),
                }
            },
            Err(inner) => {
                warn!("observer ignored: arbiter already shared");
                Self { inner }
            },
        }
    }

    /// Signal that new events may exist for `conversation_id`.
    ///
    /// Starts a dispatch task when idle, otherwise marks a rerun. Never
    /// blocks on the agent. Must be called from within a tokio runtime.
    pub fn notify(&self, conversation_id: &str) {
        // Held until the task is spawned, so `shutdown` cannot finish waiting
        // between the closed check and the spawn.
        let _pending = self.inner.tracker.token();
        if self.inner.tracker.is_closed() {
            debug!(conversation_id, "arbiter shut down, notify ignored");
            return;
        }
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::NOTIFY_TOTAL).increment(1);

        let start = {
            let mut state = self
                .inner
                .states
                .entry(conversation_id.to_string())
                .or_insert(DispatchState::Idle);
            match *state {
                DispatchState::Idle => {
                    *state = DispatchState::Running;
                    true
                },
                DispatchState::Running => {
                    *state = DispatchState::PendingRerun;
                    #[cfg(feature = "metrics")]
                    counter!(dispatch_metrics::COALESCED_TOTAL).increment(1);
                    false
                },
                DispatchState::PendingRerun => false,
            }
        };

        if start {
            let inner = Arc::clone(&self.inner);
            let conversation_id = conversation_id.to_string();
            self.inner.tracker.spawn(inner.run(conversation_id));
        }
    }

    #[must_use]
    pub fn state(&self, conversation_id: &str) -> DispatchState {
        self.inner
            .states
            .get(conversation_id)
            .map_or(DispatchState::Idle, |s| *s)
    }

    /// Conversations with a dispatch task alive.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .states
            .iter()
            .filter(|entry| *entry.value() != DispatchState::Idle)
            .count()
    }

    /// Notify every registered conversation once, picking up events stored
    /// before a restart but never dispatched. Returns how many were notified.
    pub async fn recover(&self) -> Result<usize> {
        let conversations = self.inner.batcher.store().list_conversations(true).await?;
        for conversation in &conversations {
            self.notify(&conversation.conversation_id);
        }
        info!(conversations = conversations.len(), "recovery sweep queued");
        Ok(conversations.len())
    }

    /// Stop accepting notifies and wait for running attempts to finish.
    /// Pending reruns are dropped; their events stay behind the cursor.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        let running = self.in_flight();
        if running > 0 {
            info!(running, "waiting for in-flight dispatches");
        }
        self.inner.tracker.wait().await;
    }
}

impl DispatchTrigger for DispatchArbiter {
    fn notify(&self, conversation_id: &str) {
        DispatchArbiter::notify(self, conversation_id);
    }
}

impl Inner {
    fn store(&self) -> &Arc<dyn Store> {
        self.batcher.store()
    }

    async fn run(self: Arc<Self>, conversation_id: String) {
        #[cfg(feature = "metrics")]
        gauge!(dispatch_metrics::IN_FLIGHT).increment(1.0);

        loop {
            self.attempt(&conversation_id).await;
            if !self.finish_attempt(&conversation_id) {
                break;
            }
            debug!(conversation_id = %conversation_id, "rerunning for events that arrived mid-dispatch");
        }

        #[cfg(feature = "metrics")]
        gauge!(dispatch_metrics::IN_FLIGHT).decrement(1.0);
    }

    /// Leave `Running`. Returns `true` if another attempt should follow.
    fn finish_attempt(&self, conversation_id: &str) -> bool {
        let rerun = match self.states.get_mut(conversation_id) {
            Some(mut state) => {
                let rerun =
                    *state == DispatchState::PendingRerun && !self.tracker.is_closed();
                *state = if rerun {
                    DispatchState::Running
                } else {
                    DispatchState::Idle
                };
                rerun
            },
            None => false,
        };
        if !rerun {
            self.states
                .remove_if(conversation_id, |_, state| *state == DispatchState::Idle);
        }
        rerun
    }

    async fn attempt(&self, conversation_id: &str) {
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::ATTEMPTS_TOTAL).increment(1);
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(self.dispatch_once(conversation_id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(Error::panicked(panic_message(panic.as_ref()))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Attempt::Dispatched {
                events,
                max_timestamp,
            }) => {
                #[cfg(feature = "metrics")]
                {
                    histogram!(dispatch_metrics::DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    histogram!(dispatch_metrics::BATCH_EVENTS).record(events as f64);
                }
                info!(
                    conversation_id,
                    events, max_timestamp, elapsed_ms, "batch dispatched"
                );
                if let Some(observer) = &self.observer {
                    observer.on_dispatched(conversation_id, events, max_timestamp);
                }
            },
            Ok(Attempt::Empty(reason)) => {
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::EMPTY_TOTAL, labels::REASON => reason.as_str())
                    .increment(1);
                debug!(conversation_id, reason = reason.as_str(), "nothing to dispatch");
                if let Some(observer) = &self.observer {
                    observer.on_empty(conversation_id, reason);
                }
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::FAILURES_TOTAL, labels::KIND => e.kind())
                    .increment(1);
                if e.is_retryable() {
                    warn!(conversation_id, kind = e.kind(), error = %e, elapsed_ms, "dispatch failed, cursor unchanged");
                } else {
                    error!(conversation_id, kind = e.kind(), error = %e, elapsed_ms, "dispatch failed");
                }
                if let Some(observer) = &self.observer {
                    observer.on_failure(conversation_id, &e);
                }
            },
        }
    }

    async fn dispatch_once(&self, conversation_id: &str) -> Result<Attempt> {
        let batch = match self.batcher.build_batch(conversation_id).await? {
            BuildOutcome::Ready(batch) => batch,
            BuildOutcome::Empty(reason) => return Ok(Attempt::Empty(reason)),
        };
        debug!(
            conversation_id,
            events = batch.events.len(),
            omitted = batch.omitted,
            unresolved = batch.unresolved,
            max_timestamp = batch.max_timestamp,
            "batch built"
        );

        let document = batch.to_document()?;
        self.invoker.invoke(conversation_id, &document).await?;
        self.store()
            .advance_cursor(conversation_id, batch.max_timestamp)
            .await?;

        Ok(Attempt::Dispatched {
            events: batch.events.len(),
            max_timestamp: batch.max_timestamp,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
