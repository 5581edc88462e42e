//! One peer connection with one outbound audio track and one control
//! channel, plus the dispatcher that turns [`TransportEvent`]s into status
//! changes and inbound control events.
//!
//! # Status transitions
//!
//! ```text
//! Disconnected ──connect──────────────▶ Connecting
//! Connecting   ──channel Open─────────▶ Connected
//! any          ──channel Closed───────▶ Disconnected  (event stream finished)
//! any          ──peer Failed / Closed─▶ Disconnected  (event stream finished)
//! any          ──close()──────────────▶ Disconnected
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::AudioSource;
use crate::events::{ControlEventBridge, CONTROL_CHANNEL_LABEL};
use crate::lock;

use super::engine::{ChannelState, EngineError, PeerEngine, PeerState, TransportEvent};

/// Track id of the local microphone track.
pub const LOCAL_AUDIO_TRACK_ID: &str = "local-audio";

/// Connection status as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
        }
    }
}

type RemoteSlot = Arc<Mutex<Option<Arc<dyn AudioSource>>>>;

/// Owns the engine connection and its dispatcher task.
pub struct TransportSession {
    engine: Arc<dyn PeerEngine>,
    status: Arc<watch::Sender<SessionStatus>>,
    remote_audio: RemoteSlot,
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Register the event sink, add the local audio track and create the
    /// control channel.
    pub fn open(engine: Arc<dyn PeerEngine>) -> Result<Self, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.set_event_sink(tx);
        engine.add_audio_track(LOCAL_AUDIO_TRACK_ID)?;
        engine.create_data_channel(CONTROL_CHANNEL_LABEL)?;

        let (status, _) = watch::channel(SessionStatus::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            engine,
            status: Arc::new(status),
            remote_audio: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown,
            events_rx: Mutex::new(Some(rx)),
            dispatcher: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<dyn PeerEngine> {
        &self.engine
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flips to `true` when [`close`](Self::close) runs.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Move `Disconnected → Connecting`.  Returns `false` (and changes
    /// nothing) from any other status or after `close`.
    pub fn begin_connecting(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.status.send_if_modified(|s| {
            if *s == SessionStatus::Disconnected {
                *s = SessionStatus::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Revert a failed connect attempt.
    pub fn abort_connecting(&self) {
        self.status.send_if_modified(|s| {
            if *s == SessionStatus::Connecting {
                *s = SessionStatus::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// Remote audio source, once the engine has exposed one.
    pub fn remote_audio(&self) -> Option<Arc<dyn AudioSource>> {
        lock(&self.remote_audio).clone()
    }

    /// Spawn the dispatcher on the current tokio runtime.  Only the first
    /// call spawns; events that arrived earlier are already queued.
    pub fn start_dispatch(&self, bridge: Arc<ControlEventBridge>) {
        let Some(rx) = lock(&self.events_rx).take() else {
            return;
        };

        let ctx = DispatchContext {
            status: Arc::clone(&self.status),
            remote_audio: Arc::clone(&self.remote_audio),
            closed: Arc::clone(&self.closed),
            bridge,
        };

        let handle = tokio::spawn(dispatch(rx, ctx));
        *lock(&self.dispatcher) = Some(handle);
    }

    /// Close the connection.  Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        self.engine.close();
        lock(&self.remote_audio).take();
        self.status.send_replace(SessionStatus::Disconnected);
        self.shutdown.send_replace(true);

        log::info!("transport: closed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct DispatchContext {
    status: Arc<watch::Sender<SessionStatus>>,
    remote_audio: RemoteSlot,
    closed: Arc<AtomicBool>,
    bridge: Arc<ControlEventBridge>,
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<TransportEvent>, ctx: DispatchContext) {
    while let Some(event) = rx.recv().await {
        handle_event(&ctx, event);
    }
    log::debug!("transport: event sink dropped, dispatcher exiting");
}

fn handle_event(ctx: &DispatchContext, event: TransportEvent) {
    if ctx.closed.load(Ordering::SeqCst) {
        return;
    }

    match event {
        TransportEvent::MessageReceived(text) => ctx.bridge.receive(&text),

        TransportEvent::ChannelStateChanged(state) => {
            log::info!("transport: control channel {state:?}");
            match state {
                ChannelState::Open => set_status(ctx, SessionStatus::Connected),
                ChannelState::Closed => {
                    set_status(ctx, SessionStatus::Disconnected);
                    ctx.bridge.finish();
                }
                ChannelState::Connecting | ChannelState::Closing => {}
            }
        }

        TransportEvent::PeerStateChanged(state) => {
            log::info!("transport: peer connection {state:?}");
            match state {
                PeerState::Connecting => {
                    ctx.status.send_if_modified(|s| {
                        if *s == SessionStatus::Disconnected {
                            *s = SessionStatus::Connecting;
                            true
                        } else {
                            false
                        }
                    });
                }
                PeerState::Failed | PeerState::Closed => {
                    set_status(ctx, SessionStatus::Disconnected);
                    ctx.bridge.finish();
                }
                PeerState::Disconnected => {
                    log::warn!("transport: peer connection interrupted, waiting for recovery");
                }
                PeerState::New | PeerState::Connected => {}
            }
        }

        TransportEvent::RemoteTrackAdded { track_id, capture } => {
            log::info!(
                "transport: remote track {track_id} added (capturable: {})",
                capture.is_some()
            );
            *lock(&ctx.remote_audio) = capture;
        }

        TransportEvent::RemoteTrackRemoved { track_id } => {
            log::info!("transport: remote track {track_id} removed");
            lock(&ctx.remote_audio).take();
        }
    }
}

fn set_status(ctx: &DispatchContext, status: SessionStatus) {
    let previous = ctx.status.send_replace(status);
    if previous != status {
        log::info!("transport: status {} → {}", previous.label(), status.label());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockSource;
    use crate::transport::MockEngine;
    use std::time::Duration;

    async fn wait_for_status(session: &TransportSession, want: SessionStatus) {
        let mut rx = session.subscribe_status();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("status change timed out")
            .expect("status sender alive");
    }

    fn open() -> (Arc<MockEngine>, TransportSession, Arc<ControlEventBridge>) {
        let engine = Arc::new(MockEngine::new());
        let session = TransportSession::open(engine.clone()).unwrap();
        let bridge = Arc::new(ControlEventBridge::new(engine.clone()));
        (engine, session, bridge)
    }

    #[test]
    fn open_creates_track_and_control_channel() {
        let (engine, session, _bridge) = open();
        let st = engine.state();
        assert_eq!(st.tracks, vec![LOCAL_AUDIO_TRACK_ID.to_string()]);
        assert_eq!(st.channels, vec!["oai-events".to_string()]);
        assert!(st.sink.is_some());
        drop(st);
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn begin_connecting_only_from_disconnected() {
        let (_engine, session, _bridge) = open();
        assert!(session.begin_connecting());
        assert!(!session.begin_connecting());
        assert_eq!(session.status(), SessionStatus::Connecting);

        session.abort_connecting();
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn channel_open_marks_connected() {
        let (engine, session, bridge) = open();
        session.start_dispatch(bridge);
        assert!(session.begin_connecting());

        engine.emit(TransportEvent::PeerStateChanged(PeerState::Connecting));
        engine.emit(TransportEvent::ChannelStateChanged(ChannelState::Open));
        wait_for_status(&session, SessionStatus::Connected).await;
    }

    #[tokio::test]
    async fn messages_reach_the_bridge_in_order() {
        let (engine, session, bridge) = open();
        let mut stream = bridge.take_stream().unwrap();
        session.start_dispatch(Arc::clone(&bridge));

        engine.emit(TransportEvent::MessageReceived(
            r#"{"type":"response.created","response":{"id":"r1"}}"#.into(),
        ));
        engine.emit(TransportEvent::MessageReceived(
            r#"{"type":"response.done","response":{"id":"r1"}}"#.into(),
        ));

        let first = stream.recv().await.unwrap().unwrap();
        let second = stream.recv().await.unwrap().unwrap();
        assert!(matches!(first, crate::events::ServerEvent::ResponseCreated { .. }));
        assert!(matches!(second, crate::events::ServerEvent::ResponseDone { .. }));
    }

    #[tokio::test]
    async fn channel_close_disconnects_and_finishes_stream() {
        let (engine, session, bridge) = open();
        let mut stream = bridge.take_stream().unwrap();
        session.start_dispatch(Arc::clone(&bridge));

        engine.emit(TransportEvent::ChannelStateChanged(ChannelState::Open));
        wait_for_status(&session, SessionStatus::Connected).await;

        engine.emit(TransportEvent::ChannelStateChanged(ChannelState::Closed));
        wait_for_status(&session, SessionStatus::Disconnected).await;
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn peer_failure_disconnects() {
        let (engine, session, bridge) = open();
        session.start_dispatch(Arc::clone(&bridge));

        engine.emit(TransportEvent::ChannelStateChanged(ChannelState::Open));
        wait_for_status(&session, SessionStatus::Connected).await;

        engine.emit(TransportEvent::PeerStateChanged(PeerState::Failed));
        wait_for_status(&session, SessionStatus::Disconnected).await;
        assert!(bridge.is_finished());
    }

    #[tokio::test]
    async fn remote_track_is_tracked() {
        let (engine, session, bridge) = open();
        session.start_dispatch(bridge);

        let source: Arc<dyn AudioSource> = Arc::new(MockSource::stereo_48k());
        engine.emit(TransportEvent::RemoteTrackAdded {
            track_id: "remote".into(),
            capture: Some(source),
        });
        // A status round-trip guarantees the previous event was handled.
        engine.emit(TransportEvent::ChannelStateChanged(ChannelState::Open));
        wait_for_status(&session, SessionStatus::Connected).await;
        assert!(session.remote_audio().is_some());

        engine.emit(TransportEvent::RemoteTrackRemoved {
            track_id: "remote".into(),
        });
        engine.emit(TransportEvent::ChannelStateChanged(ChannelState::Closed));
        wait_for_status(&session, SessionStatus::Disconnected).await;
        assert!(session.remote_audio().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (engine, session, bridge) = open();
        session.start_dispatch(bridge);
        assert!(session.begin_connecting());

        session.close();
        session.close();

        assert_eq!(engine.state().closed, 1);
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(session.is_closed());
        assert!(!session.begin_connecting());
    }

    #[tokio::test]
    async fn close_raises_closed_signal() {
        let (_engine, session, _bridge) = open();
        let mut early = session.closed_signal();
        assert!(!*early.borrow());

        session.close();
        tokio::time::timeout(Duration::from_secs(2), early.wait_for(|c| *c))
            .await
            .expect("closed signal timed out")
            .expect("signal sender alive");
        assert!(*session.closed_signal().borrow());
    }
}
