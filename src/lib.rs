//! voicelink - control core for a full-duplex voice-assistant device.
//!
//! Orchestrates the capture → encode → network → decode → playback loop, the
//! device state machine and the streaming protocol session against injected
//! hardware collaborators.

// Enforce error handling discipline in non-test code
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod app;
pub mod audio;
pub mod background;
pub mod board;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod iot;
pub mod ota;
pub mod protocol;
pub mod scheduler;
pub mod settings;
pub mod state;

// Orchestrator
pub use app::{AppCore, AppHandle, Application};

// Audio pipeline
pub use audio::{AudioPipeline, CodecFactory, Pcm16Codec};
pub use background::BackgroundQueue;

// Protocol
pub use protocol::{VoiceProtocol, WebsocketConfig, WebsocketProtocol};

// Error handling
pub use error::{Result, VoicelinkError};

// Config & state
pub use config::Config;
pub use settings::Settings;
pub use state::{AbortReason, DeviceState, ListeningMode};

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.1+abc1234"` when git hash is available, `"0.3.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }
}
