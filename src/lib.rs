//! Realtime audio + control session over a peer-to-peer transport.
//!
//! ```text
//! RealtimeSession::connect
//!   → TransportSession (audio track + "oai-events" channel)
//!   → HandshakeCoordinator (SDP offer/answer over HTTP)
//!   → dispatcher: status updates, inbound events → ControlEventBridge
//! RealtimeSession::start_recording
//!   → AudioCaptureRecorder (microphone, plus assistant audio when exposed)
//! ```

pub mod audio;
pub mod config;
pub mod events;
pub mod session;
pub mod signaling;
pub mod transport;

pub use audio::{AudioCaptureRecorder, RecordingError, RecordingOutput};
pub use config::AppConfig;
pub use events::{ClientEvent, ControlEventBridge, EventStream, ServerEvent};
pub use session::{RealtimeSession, RecordingCapabilities, SessionError, SessionStatus};
pub use signaling::{HandshakeCoordinator, NegotiationError, SignalingRequest};
pub use transport::{PeerEngine, TransportSession};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
