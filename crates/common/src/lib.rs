//! Shared types, error helpers, and utilities used across all courier crates.

pub mod error;
pub mod time;
pub mod types;

pub use error::FromMessage;
