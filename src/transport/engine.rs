//! The peer-connection engine seam.
//!
//! ICE/DTLS/SRTP, codecs and jitter buffering live in an external engine.
//! [`PeerEngine`] is the narrow surface this crate consumes: offer/answer,
//! one outbound audio track, one data channel, and a single stream of
//! [`TransportEvent`]s replacing the engine's delegate callbacks.
//!
//! [`MockEngine`] (available under `#[cfg(test)]`) records every call and
//! lets tests inject events as the engine's own threads would.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::AudioSource;

// ---------------------------------------------------------------------------
// Session descriptions
// ---------------------------------------------------------------------------

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// A textual session description tagged with its role in the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Fixed constraints passed to `create_offer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferConstraints {
    /// Ask the engine to negotiate server-side audio level reporting.
    pub audio_level_reporting: bool,
    /// Offer to receive the remote peer's audio.
    pub receive_audio: bool,
}

impl Default for OfferConstraints {
    fn default() -> Self {
        Self {
            audio_level_reporting: true,
            receive_audio: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport events
// ---------------------------------------------------------------------------

/// Readiness of the control data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Overall peer-connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Everything the engine reports asynchronously, from its own threads.
pub enum TransportEvent {
    PeerStateChanged(PeerState),
    ChannelStateChanged(ChannelState),
    MessageReceived(String),
    /// The remote peer's audio track became available.  `capture` is `Some`
    /// when the engine can expose it as a tappable source.
    RemoteTrackAdded {
        track_id: String,
        capture: Option<Arc<dyn AudioSource>>,
    },
    RemoteTrackRemoved {
        track_id: String,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::PeerStateChanged(s) => f.debug_tuple("PeerStateChanged").field(s).finish(),
            TransportEvent::ChannelStateChanged(s) => {
                f.debug_tuple("ChannelStateChanged").field(s).finish()
            }
            TransportEvent::MessageReceived(m) => {
                f.debug_tuple("MessageReceived").field(&m.len()).finish()
            }
            TransportEvent::RemoteTrackAdded { track_id, capture } => f
                .debug_struct("RemoteTrackAdded")
                .field("track_id", track_id)
                .field("capturable", &capture.is_some())
                .finish(),
            TransportEvent::RemoteTrackRemoved { track_id } => f
                .debug_struct("RemoteTrackRemoved")
                .field("track_id", track_id)
                .finish(),
        }
    }
}

/// Sender handed to the engine; it may be called from any thread.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),

    #[error("operation not supported by the transport engine: {0}")]
    Unsupported(String),

    #[error("peer connection is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// PeerEngine trait
// ---------------------------------------------------------------------------

/// One peer connection inside the external transport engine.
///
/// Implementations must be `Send + Sync`; the session shares the engine
/// between the caller and the event dispatcher.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Register where asynchronous events are delivered.  Called once,
    /// before any other method.
    fn set_event_sink(&self, sink: EventSink);

    /// Attach the local microphone track.
    fn add_audio_track(&self, track_id: &str) -> Result<(), EngineError>;

    /// Enable or disable the outbound audio track (mute).
    fn set_audio_track_enabled(&self, enabled: bool);

    /// Create the reliable, ordered data channel named `label`.
    fn create_data_channel(&self, label: &str) -> Result<(), EngineError>;

    /// Current data-channel readiness.
    fn channel_state(&self) -> ChannelState;

    /// Send one text message on the data channel.
    fn send_text(&self, payload: &str) -> Result<(), EngineError>;

    async fn create_offer(
        &self,
        constraints: &OfferConstraints,
    ) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;

    /// Whether remote audio can be exposed as an [`AudioSource`] at all on
    /// this platform.
    fn supports_remote_audio_capture(&self) -> bool {
        false
    }

    /// Close the connection.  Must be idempotent; teardown may finish in the
    /// background.
    fn close(&self);
}

// Compile-time assertion: Arc<dyn PeerEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Arc<dyn PeerEngine>) {}
};

// ---------------------------------------------------------------------------
// MockEngine (test double)
// ---------------------------------------------------------------------------

/// Scriptable engine that records calls.
#[cfg(test)]
pub struct MockEngine {
    inner: std::sync::Mutex<MockState>,
    fail_offer: bool,
    fail_local: bool,
    fail_remote: bool,
    fail_send: bool,
    /// Held inside `create_offer` until released, to observe concurrent
    /// connects.
    offer_gate: Option<Arc<tokio::sync::Notify>>,
}

#[cfg(test)]
#[derive(Default)]
pub struct MockState {
    pub sink: Option<EventSink>,
    pub tracks: Vec<String>,
    pub channels: Vec<String>,
    pub channel_state: Option<ChannelState>,
    pub sent: Vec<String>,
    pub offers_created: usize,
    pub local_descriptions: Vec<SessionDescription>,
    pub remote_descriptions: Vec<SessionDescription>,
    pub track_enabled: Option<bool>,
    pub closed: usize,
}

#[cfg(test)]
impl MockEngine {
    pub const OFFER_SDP: &'static str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\n";

    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(MockState::default()),
            fail_offer: false,
            fail_local: false,
            fail_remote: false,
            fail_send: false,
            offer_gate: None,
        }
    }

    pub fn failing_offer() -> Self {
        Self {
            fail_offer: true,
            ..Self::new()
        }
    }

    pub fn failing_local() -> Self {
        Self {
            fail_local: true,
            ..Self::new()
        }
    }

    pub fn failing_remote() -> Self {
        Self {
            fail_remote: true,
            ..Self::new()
        }
    }

    pub fn failing_send() -> Self {
        Self {
            fail_send: true,
            ..Self::new()
        }
    }

    pub fn gated(gate: Arc<tokio::sync::Notify>) -> Self {
        Self {
            offer_gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    /// Deliver an event as the engine's own thread would.
    pub fn emit(&self, event: TransportEvent) {
        let sink = self.state().sink.clone().expect("event sink registered");
        if let TransportEvent::ChannelStateChanged(s) = &event {
            self.state().channel_state = Some(*s);
        }
        sink.send(event).expect("dispatcher alive");
    }
}

#[cfg(test)]
#[async_trait]
impl PeerEngine for MockEngine {
    fn set_event_sink(&self, sink: EventSink) {
        self.state().sink = Some(sink);
    }

    fn add_audio_track(&self, track_id: &str) -> Result<(), EngineError> {
        self.state().tracks.push(track_id.to_owned());
        Ok(())
    }

    fn set_audio_track_enabled(&self, enabled: bool) {
        self.state().track_enabled = Some(enabled);
    }

    fn create_data_channel(&self, label: &str) -> Result<(), EngineError> {
        let mut st = self.state();
        st.channels.push(label.to_owned());
        st.channel_state = Some(ChannelState::Connecting);
        Ok(())
    }

    fn channel_state(&self) -> ChannelState {
        self.state().channel_state.unwrap_or(ChannelState::Closed)
    }

    fn send_text(&self, payload: &str) -> Result<(), EngineError> {
        if self.fail_send {
            return Err(EngineError::Closed);
        }
        self.state().sent.push(payload.to_owned());
        Ok(())
    }

    async fn create_offer(
        &self,
        constraints: &OfferConstraints,
    ) -> Result<SessionDescription, EngineError> {
        assert!(constraints.audio_level_reporting);
        self.state().offers_created += 1;
        if let Some(gate) = &self.offer_gate {
            gate.notified().await;
        }
        if self.fail_offer {
            return Err(EngineError::Failed("offer rejected".into()));
        }
        Ok(SessionDescription::offer(Self::OFFER_SDP))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        if self.fail_local {
            return Err(EngineError::Failed("bad local description".into()));
        }
        self.state().local_descriptions.push(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        if self.fail_remote {
            return Err(EngineError::Failed("bad remote description".into()));
        }
        self.state().remote_descriptions.push(description);
        Ok(())
    }

    fn supports_remote_audio_capture(&self) -> bool {
        true
    }

    fn close(&self) {
        let mut st = self.state();
        st.closed += 1;
        st.channel_state = Some(ChannelState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_constraints_enable_audio_levels() {
        let c = OfferConstraints::default();
        assert!(c.audio_level_reporting);
        assert!(c.receive_audio);
    }

    #[test]
    fn description_constructors_tag_type() {
        assert_eq!(SessionDescription::offer("x").sdp_type, SdpType::Offer);
        assert_eq!(SessionDescription::answer("y").sdp_type, SdpType::Answer);
    }

    #[test]
    fn message_debug_hides_payload() {
        let ev = TransportEvent::MessageReceived("secret".into());
        assert_eq!(format!("{ev:?}"), "MessageReceived(6)");
    }
}
