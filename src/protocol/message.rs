//! Typed wire messages for the streaming voice protocol.
//!
//! Control traffic is JSON with a mandatory `type` discriminator; binary
//! frames are raw audio and never reach this module. Messages are parsed
//! once at the boundary into these variants — downstream code never pokes
//! at raw JSON fields.

use crate::defaults;
use crate::error::{Result, VoicelinkError};
use crate::state::{AbortReason, ListeningMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audio parameters declared in the client hello.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration: u32,
}

/// Messages sent from device to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        version: u32,
        transport: String,
        audio_params: AudioParams,
    },
    Listen {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        state: ListenState,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Abort {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Iot {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        descriptors: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        states: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Start,
    Stop,
    Detect,
}

impl ClientMessage {
    /// Client hello for a given transport kind.
    pub fn hello(transport: &str, frame_duration_ms: u32) -> Self {
        ClientMessage::Hello {
            version: defaults::PROTOCOL_VERSION,
            transport: transport.to_string(),
            audio_params: AudioParams {
                format: defaults::WIRE_FORMAT.to_string(),
                sample_rate: defaults::WIRE_SAMPLE_RATE,
                channels: defaults::WIRE_CHANNELS,
                frame_duration: frame_duration_ms,
            },
        }
    }

    pub fn start_listening(session_id: Option<String>, mode: ListeningMode) -> Self {
        ClientMessage::Listen {
            session_id,
            state: ListenState::Start,
            mode: Some(mode.wire_value().to_string()),
            text: None,
        }
    }

    pub fn stop_listening(session_id: Option<String>) -> Self {
        ClientMessage::Listen {
            session_id,
            state: ListenState::Stop,
            mode: None,
            text: None,
        }
    }

    pub fn wake_word_detected(session_id: Option<String>, word: &str) -> Self {
        ClientMessage::Listen {
            session_id,
            state: ListenState::Detect,
            mode: None,
            text: Some(word.to_string()),
        }
    }

    pub fn abort_speaking(session_id: Option<String>, reason: AbortReason) -> Self {
        ClientMessage::Abort {
            session_id,
            reason: match reason {
                AbortReason::None => None,
                AbortReason::WakeWordDetected => Some("wake_word_detected".to_string()),
            },
        }
    }

    pub fn iot_descriptors(session_id: Option<String>, descriptors: Value) -> Self {
        ClientMessage::Iot {
            session_id,
            descriptors: Some(descriptors),
            states: None,
        }
    }

    pub fn iot_states(session_id: Option<String>, states: Value) -> Self {
        ClientMessage::Iot {
            session_id,
            descriptors: None,
            states: Some(states),
        }
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server hello payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerHello {
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub audio_params: Option<HelloAudioParams>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HelloAudioParams {
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub frame_duration: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
    SentenceEnd,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello(ServerHello),
    Tts {
        state: TtsState,
        #[serde(default)]
        text: Option<String>,
    },
    Stt {
        text: String,
    },
    Llm {
        #[serde(default)]
        emotion: Option<String>,
    },
    Iot {
        #[serde(default)]
        commands: Vec<Value>,
    },
    /// A `type` the device does not understand; logged and dropped.
    #[serde(other)]
    Unknown,
}

/// Parses one inbound text payload.
///
/// A missing `type` field and malformed per-type fields are both protocol
/// errors — the caller logs and drops the message, never fails the channel.
pub fn parse_server_message(text: &str) -> Result<ServerMessage> {
    let value: Value = serde_json::from_str(text).map_err(|e| VoicelinkError::Protocol {
        message: format!("invalid json: {e}"),
    })?;

    if value.get("type").and_then(Value::as_str).is_none() {
        return Err(VoicelinkError::Protocol {
            message: "missing message type".to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| VoicelinkError::Protocol {
        message: format!("malformed message: {e}"),
    })
}
