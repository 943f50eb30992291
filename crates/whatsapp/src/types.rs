//! Sidecar wire protocol. One JSON object per WebSocket text frame, tagged
//! by `type`.

use serde::{Deserialize, Serialize};

/// Frames sent by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        account_id: String,
        qr: String,
    },
    Connected {
        account_id: String,
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected {
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    LoggedOut {
        account_id: String,
    },
    InboundMessage {
        account_id: String,
        message_id: String,
        chat_jid: String,
        sender_jid: String,
        #[serde(default)]
        sender_name: Option<String>,
        #[serde(default)]
        from_me: bool,
        #[serde(default)]
        is_group: bool,
        #[serde(default)]
        chat_name: Option<String>,
        #[serde(default)]
        body: Option<String>,
        /// Reference of a downloaded attachment in the media directory.
        #[serde(default)]
        media_ref: Option<String>,
        #[serde(default)]
        media_type: Option<String>,
        /// Seconds since the Unix epoch.
        timestamp: i64,
    },
    /// Acknowledgement for a [`GatewayMessage::SendText`].
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

/// Frames sent to the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        account_id: String,
    },
    Logout {
        account_id: String,
    },
    SendText {
        request_id: String,
        account_id: String,
        to: String,
        text: String,
    },
    SendTyping {
        account_id: String,
        to: String,
    },
}

/// Account connection state as reported by the sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    WaitingForQr,
    QrReceived(String),
    Connected {
        phone_number: Option<String>,
    },
}
