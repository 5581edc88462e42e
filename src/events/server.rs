//! Inbound control events (realtime endpoint → caller).
//!
//! Unknown `type` tags decode to [`ServerEvent::Unknown`], which keeps the
//! tag and the whole message, so new server events do not end the feed.
//! Invalid JSON, a missing `type`, or a known event with missing required
//! fields is a decode failure.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Error payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

/// One entry of `rate_limits.updated`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimit {
    pub name: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_seconds: f64,
}

/// Events received over the control channel.
///
/// Object-valued payloads the crate does not interpret (`session`, `item`,
/// `response`) are kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(remote = "Self", tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: Value },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Value },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        item: Value,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { audio_start_ms: u64, item_id: String },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { audio_end_ms: u64, item_id: String },

    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        previous_item_id: Option<String>,
        item_id: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        item_id: String,
        content_index: u32,
        transcript: String,
    },

    #[serde(rename = "response.created")]
    ResponseCreated { response: Value },

    #[serde(rename = "response.done")]
    ResponseDone { response: Value },

    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        transcript: String,
    },

    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted { response_id: String },

    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped { response_id: String },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: Vec<RateLimit> },

    /// A `type` this crate does not model.  `payload` is the full message.
    #[serde(skip_deserializing)]
    Unknown { kind: String, payload: Value },
}

/// Wire tags of every modelled variant.
const KNOWN_TYPES: &[&str] = &[
    "error",
    "session.created",
    "session.updated",
    "conversation.item.created",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.committed",
    "conversation.item.input_audio_transcription.completed",
    "response.created",
    "response.done",
    "response.text.delta",
    "response.audio_transcript.delta",
    "response.audio_transcript.done",
    "output_audio_buffer.started",
    "output_audio_buffer.stopped",
    "rate_limits.updated",
];

impl ServerEvent {
    /// The event's wire `type` tag.
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::InputAudioBufferCommitted { .. } => "input_audio_buffer.committed",
            ServerEvent::InputTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::ResponseTextDelta { .. } => "response.text.delta",
            ServerEvent::ResponseAudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::ResponseAudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::OutputAudioBufferStarted { .. } => "output_audio_buffer.started",
            ServerEvent::OutputAudioBufferStopped { .. } => "output_audio_buffer.stopped",
            ServerEvent::RateLimitsUpdated { .. } => "rate_limits.updated",
            ServerEvent::Unknown { kind, .. } => kind,
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(de::Error::custom(format!("`type` must be a string, got {other}")))
            }
            None => return Err(de::Error::missing_field("type")),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Ok(ServerEvent::Unknown {
                kind,
                payload: value,
            });
        }

        // Inherent decoder generated by the `remote = "Self"` derive.
        ServerEvent::deserialize(value).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<ServerEvent, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[test]
    fn decodes_error_event() {
        let ev = decode(
            r#"{"type":"error","event_id":"evt_1","error":{"type":"invalid_request_error","code":"bad","message":"nope","param":null}}"#,
        )
        .unwrap();
        match ev {
            ServerEvent::Error { error } => {
                assert_eq!(error.kind, "invalid_request_error");
                assert_eq!(error.code.as_deref(), Some("bad"));
                assert_eq!(error.message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_transcript_delta_ignoring_extra_fields() {
        let ev = decode(
            r#"{"type":"response.audio_transcript.delta","event_id":"e","response_id":"r","item_id":"i","output_index":0,"content_index":0,"delta":"Hel"}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            ServerEvent::ResponseAudioTranscriptDelta {
                response_id: "r".into(),
                item_id: "i".into(),
                output_index: 0,
                content_index: 0,
                delta: "Hel".into(),
            }
        );
    }

    #[test]
    fn keeps_session_payload_as_json() {
        let ev = decode(r#"{"type":"session.created","session":{"id":"sess_1","voice":"alloy"}}"#)
            .unwrap();
        match ev {
            ServerEvent::SessionCreated { session } => assert_eq!(session["voice"], "alloy"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_keeps_tag_and_payload() {
        let ev = decode(r#"{"type":"conversation.item.truncated","item_id":"x"}"#).unwrap();
        assert_eq!(ev.kind(), "conversation.item.truncated");
        match ev {
            ServerEvent::Unknown { kind, payload } => {
                assert_eq!(kind, "conversation.item.truncated");
                assert_eq!(payload["item_id"], "x");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn every_modelled_type_decodes_to_its_variant() {
        let samples = [
            r#"{"type":"error","error":{"type":"server_error","message":"m"}}"#,
            r#"{"type":"session.created","session":{}}"#,
            r#"{"type":"session.updated","session":{}}"#,
            r#"{"type":"conversation.item.created","item":{}}"#,
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10,"item_id":"i"}"#,
            r#"{"type":"input_audio_buffer.speech_stopped","audio_end_ms":20,"item_id":"i"}"#,
            r#"{"type":"input_audio_buffer.committed","item_id":"i"}"#,
            r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"i","content_index":0,"transcript":"t"}"#,
            r#"{"type":"response.created","response":{}}"#,
            r#"{"type":"response.done","response":{}}"#,
            r#"{"type":"response.text.delta","response_id":"r","item_id":"i","output_index":0,"content_index":0,"delta":"d"}"#,
            r#"{"type":"response.audio_transcript.delta","response_id":"r","item_id":"i","output_index":0,"content_index":0,"delta":"d"}"#,
            r#"{"type":"response.audio_transcript.done","response_id":"r","item_id":"i","output_index":0,"content_index":0,"transcript":"t"}"#,
            r#"{"type":"output_audio_buffer.started","response_id":"r"}"#,
            r#"{"type":"output_audio_buffer.stopped","response_id":"r"}"#,
            r#"{"type":"rate_limits.updated","rate_limits":[{"name":"requests","limit":10,"remaining":9,"reset_seconds":1.5}]}"#,
        ];
        assert_eq!(samples.len(), KNOWN_TYPES.len());

        for (sample, want) in samples.iter().zip(KNOWN_TYPES) {
            let ev = decode(sample).unwrap_or_else(|e| panic!("{want}: {e}"));
            assert!(!matches!(ev, ServerEvent::Unknown { .. }), "{want} fell through");
            assert_eq!(ev.kind(), *want);
        }
    }

    #[test]
    fn malformed_messages_fail() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"event_id":"no type"}"#).is_err());
        assert!(decode(r#"{"type":7}"#).is_err());
        assert!(decode(r#"{"type":"error"}"#).is_err());
        assert!(decode(r#"{"type":"input_audio_buffer.speech_started","item_id":"x"}"#).is_err());
    }
}
