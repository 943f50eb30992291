//! Agent runtime contract and the command-spawning implementation.
//!
//! The bridge hands a context document to an [`AgentRuntime`] and gets back
//! an optional reply. [`CommandRuntime`] runs one process per invocation
//! (typically a container) and speaks JSON over stdin/stdout.

pub mod command;
pub mod error;
pub mod runtime;

pub use {
    command::{CommandRuntime, OUTPUT_END_MARKER, OUTPUT_START_MARKER},
    error::{Error, Result},
    runtime::{AgentReply, AgentRequest, AgentRuntime},
};
