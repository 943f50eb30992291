use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::Result;

/// A raw inbound chat event as delivered by a transport.
///
/// Transports deliver at least once and in no particular order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Transport account that received the event.
    pub account_id: String,
    /// Conversation (chat/thread) identifier.
    pub chat_id: String,
    /// Transport-assigned message ID, unique within the chat.
    pub message_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Transport time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Sent from the bridge's own account.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub chat_name: Option<String>,
    #[serde(default)]
    pub attachment: Option<InboundAttachment>,
}

/// Attachment announced with an inbound event; the bytes are fetched
/// separately by the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAttachment {
    /// Opaque reference understood by the media pipeline.
    pub reference: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Receives raw inbound events from a transport.
///
/// An `Err` means the event was not durably recorded and the transport may
/// redeliver it.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(&self, event: InboundEvent) -> Result<()>;
}

/// Core channel plugin trait. Each messaging platform implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Channel identifier (e.g. "whatsapp").
    fn id(&self) -> &str;

    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start an account connection.
    async fn start_account(&mut self, account_id: &str) -> Result<()>;

    /// Stop an account connection.
    async fn stop_account(&mut self, account_id: &str) -> Result<()>;

    /// Get outbound adapter for sending messages.
    fn outbound(&self) -> Option<&dyn ChannelOutbound>;

    /// Get status adapter for health checks.
    fn status(&self) -> Option<&dyn ChannelStatus>;
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Returns once the transport has acknowledged the message.
    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<()>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _account_id: &str, _to: &str) -> Result<()> {
        Ok(())
    }
}

/// Probe channel account health.
#[async_trait]
pub trait ChannelStatus: Send + Sync {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot>;
}

/// Channel health snapshot.
#[derive(Debug, Clone)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: String,
    pub details: Option<String>,
}
