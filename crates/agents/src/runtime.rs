use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::Result;

/// One agent invocation for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub conversation_id: String,
    pub assistant_name: String,
    /// Serialized context document for the batch.
    pub context: String,
}

/// What the agent produced. `text: None` means it chose not to answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub text: Option<String>,
}

impl AgentReply {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }
}

/// Runs an agent to completion on a context document.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: AgentRequest) -> Result<AgentReply>;
}
