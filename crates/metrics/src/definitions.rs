//! Metric name and label definitions.
//!
//! All metric names used by courier live here so the set of exported series
//! is documented in one place.

/// Ingestion normalizer metrics
pub mod ingest {
    /// Raw events received from a transport
    pub const EVENTS_RECEIVED_TOTAL: &str = "courier_ingest_events_received_total";
    /// Events newly written to the store
    pub const EVENTS_STORED_TOTAL: &str = "courier_ingest_events_stored_total";
    /// Redelivered events ignored by the idempotent upsert
    pub const EVENTS_DUPLICATE_TOTAL: &str = "courier_ingest_events_duplicate_total";
    /// Events discarded before storage (label: reason)
    pub const EVENTS_DISCARDED_TOTAL: &str = "courier_ingest_events_discarded_total";
    /// Storage failures during ingestion
    pub const ERRORS_TOTAL: &str = "courier_ingest_errors_total";
}

/// Dispatch arbiter metrics
pub mod dispatch {
    /// Notifications received by the arbiter
    pub const NOTIFY_TOTAL: &str = "courier_dispatch_notify_total";
    /// Notifications coalesced into a pending rerun
    pub const COALESCED_TOTAL: &str = "courier_dispatch_coalesced_total";
    /// Dispatch attempts started
    pub const ATTEMPTS_TOTAL: &str = "courier_dispatch_attempts_total";
    /// Attempts that found nothing to send (label: reason)
    pub const EMPTY_TOTAL: &str = "courier_dispatch_empty_total";
    /// Attempts that failed (label: kind)
    pub const FAILURES_TOTAL: &str = "courier_dispatch_failures_total";
    /// Duration of one dispatch attempt in seconds
    pub const DURATION_SECONDS: &str = "courier_dispatch_duration_seconds";
    /// Events included in dispatched batches
    pub const BATCH_EVENTS: &str = "courier_dispatch_batch_events";
    /// Conversations with a dispatch currently in flight
    pub const IN_FLIGHT: &str = "courier_dispatch_in_flight";
}

/// Agent invoker metrics
pub mod invoker {
    /// Agent runtime invocations
    pub const INVOCATIONS_TOTAL: &str = "courier_invoker_invocations_total";
    /// Invocations that exceeded their timeout
    pub const TIMEOUTS_TOTAL: &str = "courier_invoker_timeouts_total";
    /// Replies delivered to the transport
    pub const REPLIES_SENT_TOTAL: &str = "courier_invoker_replies_sent_total";
    /// Agent runtime duration in seconds
    pub const RUNTIME_DURATION_SECONDS: &str = "courier_invoker_runtime_duration_seconds";
}

/// Media resolution metrics
pub mod media {
    /// Attachment resolutions attempted
    pub const RESOLVE_TOTAL: &str = "courier_media_resolve_total";
    /// Attachments left unresolved in a batch
    pub const UNRESOLVED_TOTAL: &str = "courier_media_unresolved_total";
}

/// Transport metrics
pub mod channels {
    /// Messages received from the transport
    pub const MESSAGES_RECEIVED_TOTAL: &str = "courier_channel_messages_received_total";
    /// Messages acknowledged by the transport
    pub const MESSAGES_SENT_TOTAL: &str = "courier_channel_messages_sent_total";
    /// Transport errors
    pub const ERRORS_TOTAL: &str = "courier_channel_errors_total";
}

/// Common label keys
pub mod labels {
    pub const REASON: &str = "reason";
    pub const KIND: &str = "kind";
    pub const CHANNEL: &str = "channel";
}

/// Histogram buckets
pub mod buckets {
    /// Dispatch and agent runtime durations: 100ms to one hour.
    pub const DISPATCH_DURATION: [f64; 14] = [
        0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
    ];

    /// Batch sizes in events.
    pub const BATCH_EVENTS: [f64; 10] = [1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0];
}
