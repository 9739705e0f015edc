//! Streaming voice protocol.
//!
//! One persistent bidirectional channel to the voice backend: a hello
//! handshake negotiates audio parameters, binary frames carry audio, JSON
//! control messages carry everything else. The [`VoiceProtocol`] trait is
//! what the orchestrator programs against; [`websocket::WebsocketProtocol`]
//! is the concrete implementation.

pub mod message;
pub mod transport;
pub mod websocket;

use crate::error::Result;
use crate::state::{AbortReason, ListeningMode};
use message::ServerMessage;

pub use message::{ClientMessage, ListenState, ServerHello, TtsState};
pub use websocket::{WebsocketConfig, WebsocketProtocol};

/// Event callbacks out of the protocol layer.
///
/// Invoked from the transport's receive context; implementations hand work
/// to the scheduler rather than doing it in place.
pub struct ProtocolEvents {
    /// A binary audio frame arrived.
    pub on_incoming_audio: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    /// A parsed control message arrived (hello is consumed internally).
    pub on_incoming_message: Box<dyn Fn(ServerMessage) + Send + Sync>,
    /// The channel closed — fired exactly once per open channel, whether by
    /// local close or remote disconnect.
    pub on_channel_closed: Box<dyn Fn() + Send + Sync>,
    /// A transport or server failure, with a user-presentable message.
    pub on_network_error: Box<dyn Fn(String) + Send + Sync>,
}

impl Default for ProtocolEvents {
    fn default() -> Self {
        Self {
            on_incoming_audio: Box::new(|_| {}),
            on_incoming_message: Box::new(|_| {}),
            on_channel_closed: Box::new(|| {}),
            on_network_error: Box::new(|_| {}),
        }
    }
}

/// The device side of the streaming protocol.
///
/// All sends are fire-and-forget and no-ops while the channel is closed;
/// failures surface through [`ProtocolEvents::on_network_error`], never as
/// panics on the audio path.
pub trait VoiceProtocol: Send {
    /// Connects, performs the hello handshake and marks the channel open.
    ///
    /// Failures (transport connect, handshake timeout) are reported through
    /// the network-error event *and* returned, so the caller can abandon
    /// its flow without double-alerting.
    fn open_audio_channel(&mut self) -> Result<()>;

    /// Tears the channel down, firing the closed event if it was open.
    fn close_audio_channel(&mut self);

    /// Open, error-free and alive within the liveness window.
    fn is_audio_channel_opened(&self) -> bool;

    /// Downlink sample rate negotiated in the server hello.
    fn server_sample_rate(&self) -> u32;

    /// Session identifier from the server hello, echoed in control sends.
    fn session_id(&self) -> Option<String>;

    fn send_audio(&mut self, frame: &[u8]);
    fn send_start_listening(&mut self, mode: ListeningMode);
    fn send_stop_listening(&mut self);
    fn send_wake_word_detected(&mut self, word: &str);
    fn send_abort_speaking(&mut self, reason: AbortReason);
    fn send_iot_descriptors(&mut self, descriptors: serde_json::Value);
    fn send_iot_states(&mut self, states: serde_json::Value);
}
