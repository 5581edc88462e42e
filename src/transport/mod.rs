//! Peer-to-peer transport: the engine seam and the session that drives it.
//!
//! The engine reports everything through one [`EventSink`]; the
//! [`TransportSession`] dispatcher is its only consumer, so status changes
//! and inbound control messages are handled strictly in arrival order.

pub mod engine;
pub mod session;

pub use engine::{
    ChannelState, EngineError, EventSink, OfferConstraints, PeerEngine, PeerState, SdpType,
    SessionDescription, TransportEvent,
};
pub use session::{SessionStatus, TransportSession, LOCAL_AUDIO_TRACK_ID};

#[cfg(test)]
pub use engine::MockEngine;
