//! Wire event schema for the duplex voice session.
//!
//! Defines the JSON message types exchanged with the speech-to-speech
//! service over the transport channel, one logical event per message.
//!
//! ## Protocol
//!
//! ```text
//! Microphone ─▸ audio_chunk ──────▸ ClawVoice ──▸ remote service
//!      ◂── response_audio_delta ◂──────◂── speech_started / stopped ──◂
//! ```
//!
//! All messages are JSON text frames. Audio payloads use base64 encoding
//! within JSON (upgrade to binary frames is a future optimization).
//! New event kinds are a compile-time-checked extension point: every
//! consumer matches exhaustively.

use serde::{Deserialize, Serialize};

use crate::turn::TurnState;

// ── Wire events ───────────────────────────────────────────────────

/// One discrete message unit exchanged over the transport channel.
///
/// Exactly one variant is active per event; the tag determines which
/// component handles it. Events are transient — owned by whichever
/// component is currently processing them, never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireEvent {
    /// Outbound: one captured audio frame (base64 PCM16LE mono).
    #[serde(rename = "audio_chunk")]
    AudioChunk { audio: String },

    /// Outbound: manual-VAD commit marker after a configured silence run.
    #[serde(rename = "buffer_commit")]
    BufferCommit,

    /// Inbound: remote VAD detected start of user speech.
    #[serde(rename = "speech_started")]
    SpeechStarted,

    /// Inbound: remote VAD detected end of user speech.
    #[serde(rename = "speech_stopped")]
    SpeechStopped,

    /// Inbound: one synthesized audio frame (base64 PCM16LE mono).
    #[serde(rename = "response_audio_delta")]
    ResponseAudioDelta { audio: String },

    /// Inbound: the current response's audio stream is complete.
    #[serde(rename = "response_audio_done")]
    ResponseAudioDone,

    /// Outbound: advisory request to cancel the in-flight response
    /// (sent on barge-in; local playback is already silenced).
    #[serde(rename = "response_cancel")]
    ResponseCancel,

    /// Inbound: the remote service acknowledged a cancel.
    #[serde(rename = "response_cancelled")]
    ResponseCancelled,

    /// Inbound: transcription of the user's speech.
    #[serde(rename = "input_transcript")]
    InputTranscript { text: String },

    /// Inbound: transcription of the agent's synthesized speech.
    #[serde(rename = "output_transcript")]
    OutputTranscript { text: String },

    /// Inbound: the remote service requests a local action.
    #[serde(rename = "action_invocation")]
    ActionInvocation {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Outbound: result (or error payload) for one action invocation.
    #[serde(rename = "action_result")]
    ActionResult {
        id: String,
        payload: serde_json::Value,
    },

    /// Inbound: terminal error from the remote service.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

// ── Session events (upward-facing) ────────────────────────────────

/// Events surfaced to the hosting application (CLI, robot controller,
/// etc.) through [`crate::session::SessionHandle::next_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The turn state changed.
    State(TurnState),
    /// Transcription of the user's speech.
    InputTranscript(String),
    /// Transcription of the agent's speech.
    OutputTranscript(String),
    /// An action invocation was accepted for execution.
    ActionStarted { id: String, name: String },
    /// An action invocation produced its result (success or error payload).
    ActionFinished { id: String },
    /// The session terminated.
    Ended { reason: String },
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_round_trip() {
        let ev = WireEvent::AudioChunk {
            audio: "AAAA".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"audio_chunk""#));

        let parsed: WireEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ev);
    }

    #[test]
    fn unit_variants_serialize_with_tag_only() {
        let json = serde_json::to_string(&WireEvent::SpeechStarted).unwrap();
        assert_eq!(json, r#"{"type":"speech_started"}"#);

        let json = serde_json::to_string(&WireEvent::ResponseAudioDone).unwrap();
        assert_eq!(json, r#"{"type":"response_audio_done"}"#);
    }

    #[test]
    fn action_invocation_carries_structured_arguments() {
        let json = r#"{
            "type": "action_invocation",
            "id": "call-7",
            "name": "get_weather",
            "arguments": {"location": "Berkeley"}
        }"#;
        let parsed: WireEvent = serde_json::from_str(json).unwrap();
        match parsed {
            WireEvent::ActionInvocation { id, name, arguments } => {
                assert_eq!(id, "call-7");
                assert_eq!(name, "get_weather");
                assert_eq!(arguments["location"], "Berkeley");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_event_round_trip() {
        let ev = WireEvent::Error {
            code: "rate_limited".into(),
            message: "slow down".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let parsed: WireEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ev);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let json = r#"{"type": "telepathy_frame"}"#;
        assert!(serde_json::from_str::<WireEvent>(json).is_err());
    }
}
