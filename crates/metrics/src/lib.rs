//! Metrics collection and export for courier.
//!
//! Instrumented crates record through the `metrics` facade macros re-exported
//! here, behind their own `metrics` cargo feature. With the `prometheus`
//! feature, [`init_metrics`] installs a Prometheus recorder that can serve a
//! scrape endpoint.
//!
//! ```rust,ignore
//! use courier_metrics::{counter, dispatch};
//!
//! counter!(dispatch::ATTEMPTS_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
