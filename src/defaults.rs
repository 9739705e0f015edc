//! Default configuration constants for voicelink.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Sample rate of the uplink wire format in Hz.
///
/// The streaming protocol always carries 16kHz mono audio from device to
/// server regardless of the capture hardware's native rate; the pipeline
/// resamples when the two differ.
pub const WIRE_SAMPLE_RATE: u32 = 16000;

/// Channel count of the wire format.
pub const WIRE_CHANNELS: u16 = 1;

/// Codec name declared in the hello handshake.
///
/// Named only as the wire contract; the actual encoder/decoder instances
/// are injected through the codec factory seam.
pub const WIRE_FORMAT: &str = "opus";

/// Duration of audio encoded per outbound packet, in milliseconds.
///
/// Negotiated once at hello time and fixed for the life of the channel.
pub const FRAME_DURATION_MS: u32 = 60;

/// How long to wait for the server hello before giving up, in milliseconds.
pub const HELLO_TIMEOUT_MS: u64 = 10_000;

/// Channel liveness window in milliseconds.
///
/// A channel with no inbound traffic for longer than this is treated as
/// unusable even if the transport still reports connected.
pub const LIVENESS_TIMEOUT_MS: u64 = 120_000;

/// Maximum number of version-check attempts before the check is abandoned.
pub const OTA_MAX_RETRIES: u32 = 10;

/// Delay between failed version-check attempts, in seconds.
pub const OTA_RETRY_DELAY_SECS: u64 = 60;

/// How long to wait for the user to complete activation before re-checking,
/// in seconds.
pub const ACTIVATION_POLL_SECS: u64 = 60;

/// Seconds of playback-queue silence after which the output hardware is
/// powered down while the device is idle.
pub const IDLE_SILENCE_SECS: u64 = 10;

/// Settle delay applied when capture resumes directly after playback,
/// in milliseconds. Lets the speaker drain before the microphone re-opens.
pub const SPEAK_TO_LISTEN_SETTLE_MS: u64 = 120;

/// Streaming protocol version declared in the client hello.
pub const PROTOCOL_VERSION: u32 = 1;
