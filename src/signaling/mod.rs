//! SDP offer/answer exchange with the realtime endpoint.

pub mod client;
pub mod handshake;

pub use client::{
    HttpSignaling, SignalingClient, SignalingRequest, SignalingResponse, SDP_CONTENT_TYPE,
};
pub use handshake::{classify_response, HandshakeCoordinator, HandshakePhase, NegotiationError};

#[cfg(test)]
pub use client::MockSignaling;
