use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A cursor may never move backwards.
    #[error(
        "stale cursor for {conversation_id}: current {current}, requested {requested}"
    )]
    StaleCursor {
        conversation_id: String,
        current: i64,
        requested: i64,
    },

    #[error("conversation not found: {conversation_id}")]
    ConversationNotFound { conversation_id: String },

    #[error("event not found: {conversation_id}/{event_id}")]
    EventNotFound {
        conversation_id: String,
        event_id: String,
    },

    /// A stored value failed to decode, with context.
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn conversation_not_found(conversation_id: impl Into<String>) -> Self {
        Self::ConversationNotFound {
            conversation_id: conversation_id.into(),
        }
    }

    #[must_use]
    pub fn event_not_found(
        conversation_id: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self::EventNotFound {
            conversation_id: conversation_id.into(),
            event_id: event_id.into(),
        }
    }

    #[must_use]
    pub fn is_stale_cursor(&self) -> bool {
        matches!(self, Self::StaleCursor { .. })
    }
}

impl courier_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

courier_common::impl_context!();
