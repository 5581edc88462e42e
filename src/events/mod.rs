//! Typed control events and the data-channel bridge that carries them.
//!
//! * [`ClientEvent`] — outbound, serialised as snake_case JSON.
//! * [`ServerEvent`] — inbound, decoded in arrival order.
//! * [`ControlEventBridge`] — send path plus the single-consumer
//!   [`EventStream`].

pub mod bridge;
pub mod client;
pub mod server;

pub use bridge::{ChannelError, ControlEventBridge, EventResult, EventStream, CONTROL_CHANNEL_LABEL};
pub use client::{
    ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, ResponseSettings,
    SessionSettings, TurnDetection,
};
pub use server::{ApiError, RateLimit, ServerEvent};
