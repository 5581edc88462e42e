//! Control-event bridge over the `oai-events` data channel.
//!
//! Outbound: [`ControlEventBridge::send`] serialises one [`ClientEvent`] to
//! JSON and transmits it as exactly one message.
//!
//! Inbound: [`ControlEventBridge::receive`] is fed by the transport
//! dispatcher in arrival order.  Decoded events are appended to an unbounded
//! queue drained through [`EventStream`].  The first message that fails to
//! decode is delivered as an error and then the stream ends; nothing after
//! it is delivered.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::lock;
use crate::transport::{ChannelState, EngineError, PeerEngine};

use super::client::ClientEvent;
use super::server::ServerEvent;

/// Label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The data channel is not open for writing.
    #[error("control channel is not open (state: {0:?})")]
    ChannelUnavailable(ChannelState),

    #[error("failed to encode control event: {0}")]
    Encode(String),

    /// An inbound message could not be decoded.  Ends the event stream.
    #[error("failed to decode control event: {reason}")]
    Decode { reason: String, payload: String },

    #[error("failed to send control event: {0}")]
    Send(#[from] EngineError),
}

/// Items yielded by [`EventStream`].
pub type EventResult = Result<ServerEvent, ChannelError>;

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// The single consumer of inbound control events.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EventResult>,
}

impl EventStream {
    /// Wait for the next event.  `None` once the stream is finished and
    /// every queued event has been taken.
    pub async fn recv(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).  `None` when nothing
    /// is queued right now.
    pub fn try_recv(&mut self) -> Option<EventResult> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// ControlEventBridge
// ---------------------------------------------------------------------------

pub struct ControlEventBridge {
    engine: Arc<dyn PeerEngine>,
    tx: Mutex<Option<mpsc::UnboundedSender<EventResult>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<EventResult>>>,
}

impl ControlEventBridge {
    pub fn new(engine: Arc<dyn PeerEngine>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            engine,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Serialise `event` and send it as one data-channel message.
    ///
    /// # Errors
    ///
    /// [`ChannelError::ChannelUnavailable`] unless the channel is open;
    /// [`ChannelError::Send`] when the engine rejects the message.  Nothing
    /// is retried.
    pub fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        let state = self.engine.channel_state();
        if state != ChannelState::Open {
            return Err(ChannelError::ChannelUnavailable(state));
        }

        let payload =
            serde_json::to_string(event).map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.engine.send_text(&payload)?;

        log::debug!("events: sent {}", event.kind());
        Ok(())
    }

    /// Decode one inbound message and append it to the stream.
    ///
    /// After [`finish`](Self::finish) messages are dropped.
    pub fn receive(&self, text: &str) {
        let mut tx = lock(&self.tx);
        let Some(sender) = tx.as_ref() else {
            log::debug!("events: dropping message after stream finished");
            return;
        };

        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                log::trace!("events: received {}", event.kind());
                if sender.send(Ok(event)).is_err() {
                    log::debug!("events: consumer dropped, finishing stream");
                    tx.take();
                }
            }
            Err(e) => {
                log::error!("events: malformed control message, ending event stream: {e}");
                let _ = sender.send(Err(ChannelError::Decode {
                    reason: e.to_string(),
                    payload: text.to_owned(),
                }));
                tx.take();
            }
        }
    }

    /// End the stream.  Already queued events stay readable.  Idempotent.
    pub fn finish(&self) {
        if lock(&self.tx).take().is_some() {
            log::debug!("events: stream finished");
        }
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.tx).is_none()
    }

    /// Hand out the consumer side.  Returns `None` after the first call.
    pub fn take_stream(&self) -> Option<EventStream> {
        lock(&self.rx).take().map(|rx| EventStream { rx })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockEngine;

    fn open_bridge() -> (Arc<MockEngine>, ControlEventBridge) {
        let engine = Arc::new(MockEngine::new());
        engine.state().channel_state = Some(ChannelState::Open);
        let bridge = ControlEventBridge::new(engine.clone());
        (engine, bridge)
    }

    fn speech_started(ms: u64) -> String {
        format!(r#"{{"type":"input_audio_buffer.speech_started","audio_start_ms":{ms},"item_id":"item_{ms}"}}"#)
    }

    #[test]
    fn send_requires_open_channel() {
        let engine = Arc::new(MockEngine::new());
        engine.state().channel_state = Some(ChannelState::Connecting);
        let bridge = ControlEventBridge::new(engine.clone());

        assert_eq!(
            bridge.send(&ClientEvent::ResponseCancel),
            Err(ChannelError::ChannelUnavailable(ChannelState::Connecting))
        );
        assert!(engine.state().sent.is_empty());
    }

    #[test]
    fn send_transmits_exactly_one_json_message() {
        let (engine, bridge) = open_bridge();
        bridge
            .send(&ClientEvent::ResponseCreate { response: None })
            .unwrap();

        let sent = engine.state().sent.clone();
        assert_eq!(sent, vec![r#"{"type":"response.create"}"#.to_string()]);
    }

    #[tokio::test]
    async fn inbound_events_preserve_order() {
        let (_engine, bridge) = open_bridge();
        let mut stream = bridge.take_stream().unwrap();

        for ms in 0..50 {
            bridge.receive(&speech_started(ms));
        }
        bridge.finish();

        let mut seen = Vec::new();
        while let Some(item) = stream.recv().await {
            match item.unwrap() {
                ServerEvent::SpeechStarted { audio_start_ms, .. } => seen.push(audio_start_ms),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unrecognised_events_pass_through_with_their_type() {
        let (_engine, bridge) = open_bridge();
        let mut stream = bridge.take_stream().unwrap();

        bridge.receive(r#"{"type":"response.output_item.added","output_index":0}"#);
        bridge.receive(&speech_started(5));

        let first = stream.recv().await.unwrap().unwrap();
        assert_eq!(first.kind(), "response.output_item.added");
        assert!(matches!(first, ServerEvent::Unknown { ref payload, .. } if payload["output_index"] == 0));
        assert!(matches!(
            stream.recv().await.unwrap().unwrap(),
            ServerEvent::SpeechStarted { audio_start_ms: 5, .. }
        ));
    }

    #[tokio::test]
    async fn decode_failure_at_k_delivers_k_minus_one_then_ends() {
        let (_engine, bridge) = open_bridge();
        let mut stream = bridge.take_stream().unwrap();

        let k = 4;
        for ms in 1..k {
            bridge.receive(&speech_started(ms));
        }
        bridge.receive("{ broken");
        bridge.receive(&speech_started(99));

        let mut ok = 0;
        let mut errors = Vec::new();
        while let Some(item) = stream.recv().await {
            match item {
                Ok(_) => {
                    assert!(errors.is_empty(), "event delivered after decode error");
                    ok += 1;
                }
                Err(e) => errors.push(e),
            }
        }

        assert_eq!(ok, k - 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ChannelError::Decode { payload, .. } if payload == "{ broken"));
        assert!(bridge.is_finished());
    }

    #[tokio::test]
    async fn finish_is_idempotent_and_keeps_queued_events() {
        let (_engine, bridge) = open_bridge();
        bridge.receive(&speech_started(1));
        bridge.finish();
        bridge.finish();

        let mut stream = bridge.take_stream().unwrap();
        assert!(matches!(stream.recv().await, Some(Ok(_))));
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn stream_can_be_taken_once() {
        let (_engine, bridge) = open_bridge();
        assert!(bridge.take_stream().is_some());
        assert!(bridge.take_stream().is_none());
    }

    #[test]
    fn messages_after_finish_are_dropped() {
        let (_engine, bridge) = open_bridge();
        let mut stream = bridge.take_stream().unwrap();
        bridge.finish();
        bridge.receive(&speech_started(1));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn engine_send_failure_maps_to_send_error() {
        let engine = Arc::new(MockEngine::failing_send());
        engine.state().channel_state = Some(ChannelState::Open);
        let bridge = ControlEventBridge::new(engine);

        assert_eq!(
            bridge.send(&ClientEvent::InputAudioBufferClear),
            Err(ChannelError::Send(EngineError::Closed))
        );
    }
}
