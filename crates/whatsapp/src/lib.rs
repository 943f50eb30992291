//! WhatsApp Web transport for courier.
//!
//! Talks JSON over WebSocket to a Baileys sidecar (a Node.js process run
//! separately) to receive and send messages.

pub mod outbound;
pub mod plugin;
pub mod sidecar;
pub mod state;
pub mod types;

pub use {
    outbound::WhatsAppOutbound,
    plugin::{ConnectedHook, WhatsAppPlugin},
    sidecar::{SidecarHandle, connect_with_retry},
    types::{ConnectionState, GatewayMessage, SidecarMessage},
};
