use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] courier_store::Error),

    #[error("invalid trigger pattern: {0}")]
    TriggerPattern(#[from] regex::Error),

    #[error("agent invocation timed out after {}s", after.as_secs())]
    InvokerTimeout { after: Duration },

    #[error("agent invocation failed: {source}")]
    InvokerCrash {
        #[source]
        source: courier_agents::Error,
    },

    #[error("reply delivery failed: {source}")]
    SendFailed {
        #[source]
        source: courier_channels::Error,
    },

    #[error("context rendering failed: {0}")]
    Render(#[from] askama::Error),

    #[error("dispatch attempt panicked: {message}")]
    Panicked { message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(courier_store::Error::StaleCursor { .. }) => "stale_cursor",
            Self::Store(_) => "store",
            Self::TriggerPattern(_) => "config",
            Self::InvokerTimeout { .. } => "timeout",
            Self::InvokerCrash { .. } => "crash",
            Self::SendFailed { .. } => "send",
            Self::Render(_) => "render",
            Self::Panicked { .. } => "panic",
            Self::Message { .. } => "other",
        }
    }

    /// Invoker failures leave the cursor untouched, so the next attempt
    /// retries the same events.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvokerTimeout { .. } | Self::InvokerCrash { .. } | Self::SendFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
