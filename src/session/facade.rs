//! [`RealtimeSession`] — the public surface tying transport, handshake,
//! control events and recording together.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = RealtimeSession::from_config(engine, &config)?;
//! let mut events = session.events().expect("first call");
//!
//! session.connect(&SignalingRequest::from_config(&config.signaling)).await?;
//! session.send(&ClientEvent::ResponseCreate { response: None })?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event?);
//! }
//! session.disconnect();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;

use crate::audio::{
    AudioCaptureRecorder, AudioSource, CaptureError, MicrophoneSource, RecorderOptions,
    RecordingError, RecordingOutput,
};
use crate::config::{AppConfig, RecordingConfig};
use crate::events::{ChannelError, ClientEvent, ControlEventBridge, EventStream};
use crate::lock;
use crate::signaling::{
    HandshakeCoordinator, HttpSignaling, NegotiationError, SignalingClient, SignalingRequest,
};
use crate::transport::{EngineError, PeerEngine, SessionStatus, TransportSession};

use super::permission::{AudioAuthorization, InputDeviceAuthorization};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("microphone access is not authorized")]
    MissingAudioAuthorization,

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// `disconnect` already ran, or the connection was negotiated before.
    /// Sessions are single-use.
    #[error("session is closed")]
    Closed,
}

/// What a recording started now would contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingCapabilities {
    /// The assistant's audio would be written to its own file.
    pub remote_audio: bool,
}

// ---------------------------------------------------------------------------
// RealtimeSession
// ---------------------------------------------------------------------------

pub struct RealtimeSession {
    transport: TransportSession,
    bridge: Arc<ControlEventBridge>,
    handshake: HandshakeCoordinator,
    authorization: Arc<dyn AudioAuthorization>,
    local_audio: Arc<dyn AudioSource>,
    recorder: AudioCaptureRecorder,
    include_remote: bool,
    /// Guards the flag and the engine call together so concurrent toggles
    /// cannot leave them disagreeing.
    muted: Mutex<bool>,
    disconnected: AtomicBool,
}

impl RealtimeSession {
    /// Open the transport resources on `engine`.  Authorization defaults to
    /// [`InputDeviceAuthorization`].
    pub fn new(
        engine: Arc<dyn PeerEngine>,
        signaling: Arc<dyn SignalingClient>,
        local_audio: Arc<dyn AudioSource>,
        recording: &RecordingConfig,
    ) -> Result<Self, SessionError> {
        let transport = TransportSession::open(Arc::clone(&engine))?;
        let bridge = Arc::new(ControlEventBridge::new(engine));

        Ok(Self {
            transport,
            bridge,
            handshake: HandshakeCoordinator::new(signaling),
            authorization: Arc::new(InputDeviceAuthorization),
            local_audio,
            recorder: AudioCaptureRecorder::new(RecorderOptions::from_config(recording)),
            include_remote: recording.include_remote,
            muted: Mutex::new(false),
            disconnected: AtomicBool::new(false),
        })
    }

    /// Production wiring: HTTP signaling and the configured microphone.
    pub fn from_config(engine: Arc<dyn PeerEngine>, config: &AppConfig) -> Result<Self, SessionError> {
        let signaling = Arc::new(HttpSignaling::from_config(&config.signaling));
        let microphone = Arc::new(MicrophoneSource::new(config.audio.input_device.as_deref())?);
        Self::new(engine, signaling, microphone, &config.recording)
    }

    pub fn with_authorization(mut self, authorization: Arc<dyn AudioAuthorization>) -> Self {
        self.authorization = authorization;
        self
    }

    // -- connection ---------------------------------------------------------

    /// Negotiate the connection.
    ///
    /// Returns once the answer is applied; the status reaches `Connected`
    /// later, when the control channel opens.  A call made while another
    /// connect is in progress (or after the connection is up) does nothing.
    pub async fn connect(&self, request: &SignalingRequest) -> Result<(), SessionError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let authorization = self.authorization.status();
        if !authorization.is_authorized() {
            log::warn!("session: connect refused, audio authorization {authorization:?}");
            return Err(SessionError::MissingAudioAuthorization);
        }

        if !self.transport.begin_connecting() {
            log::debug!("session: connect ignored, status is {}", self.status().label());
            return Ok(());
        }
        self.transport.start_dispatch(Arc::clone(&self.bridge));

        let outcome = self
            .handshake
            .negotiate(
                self.transport.engine().as_ref(),
                request,
                self.transport.closed_signal(),
            )
            .await;

        if self.transport.is_closed() {
            log::info!("session: disconnected while negotiating");
            return Err(SessionError::Closed);
        }

        match outcome {
            Ok(Some(_)) => Ok(()),
            Ok(None) | Err(NegotiationError::Cancelled) => {
                self.transport.abort_connecting();
                Err(SessionError::Closed)
            }
            Err(e) => {
                log::error!("session: negotiation failed: {e}");
                self.transport.abort_connecting();
                Err(e.into())
            }
        }
    }

    /// Cancel any recording, close the transport and finish the event
    /// stream.  Safe to call repeatedly; never fails.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.cancel() {
                log::warn!("session: failed to cancel recording on disconnect: {e}");
            }
        }
        self.transport.close();
        self.bridge.finish();

        log::info!("session: disconnected");
    }

    pub fn status(&self) -> SessionStatus {
        self.transport.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.transport.subscribe_status()
    }

    // -- control events -----------------------------------------------------

    pub fn send(&self, event: &ClientEvent) -> Result<(), SessionError> {
        self.bridge.send(event)?;
        Ok(())
    }

    /// The inbound event stream.  `None` after the first call.
    pub fn events(&self) -> Option<EventStream> {
        self.bridge.take_stream()
    }

    // -- microphone ---------------------------------------------------------

    /// Flip the mute state and return the new value.
    pub fn toggle_mute(&self) -> bool {
        let mut muted = lock(&self.muted);
        *muted = !*muted;
        self.transport.engine().set_audio_track_enabled(!*muted);
        log::debug!("session: muted = {}", *muted);
        *muted
    }

    pub fn is_muted(&self) -> bool {
        *lock(&self.muted)
    }

    // -- recording ----------------------------------------------------------

    pub fn recording_capabilities(&self) -> RecordingCapabilities {
        let remote_audio = self.include_remote
            && self.transport.engine().supports_remote_audio_capture()
            && self.transport.remote_audio().is_some();
        RecordingCapabilities { remote_audio }
    }

    /// Record the microphone, and the assistant's audio when available.
    pub fn start_recording(&self) -> Result<(), SessionError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let remote = if self.recording_capabilities().remote_audio {
            self.transport.remote_audio()
        } else {
            None
        };
        self.recorder.start(Arc::clone(&self.local_audio), remote)?;
        Ok(())
    }

    pub fn stop_recording(&self) -> Result<RecordingOutput, SessionError> {
        Ok(self.recorder.stop()?)
    }

    pub fn cancel_recording(&self) -> Result<(), SessionError> {
        Ok(self.recorder.cancel()?)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
