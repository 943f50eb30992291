//! Transport plugin contracts.
//!
//! A transport (WhatsApp, ...) implements [`ChannelPlugin`] for its
//! connection lifecycle, pushes raw inbound events into an [`InboundSink`],
//! and exposes [`ChannelOutbound`] for replies. Connection state stays
//! inside the transport.

pub mod error;
pub mod gating;
pub mod plugin;

pub use {
    error::{Error, Result},
    plugin::{
        ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin, ChannelStatus, InboundAttachment,
        InboundEvent, InboundSink,
    },
};
