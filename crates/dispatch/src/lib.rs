//! Message orchestration and agent dispatch.
//!
//! Inbound transport events flow through the [`Normalizer`] into the durable
//! store. The [`DispatchArbiter`] keeps at most one agent invocation in
//! flight per conversation, coalescing triggers that arrive while busy. Each
//! attempt asks the [`Batcher`] for everything past the conversation cursor,
//! hands the rendered context to a [`BatchInvoker`], and advances the cursor
//! only after the invoker succeeds.

pub mod arbiter;
pub mod batch;
pub mod context;
pub mod error;
pub mod invoker;
pub mod normalize;

pub use {
    arbiter::{DispatchArbiter, DispatchObserver, DispatchState},
    batch::{Batch, Batcher, BatcherConfig, BuildOutcome, EmptyReason},
    error::{Error, Result},
    invoker::{AgentInvoker, BatchInvoker, InvokerConfig, strip_internal},
    normalize::{DiscardReason, DispatchTrigger, Normalized, Normalizer},
};
