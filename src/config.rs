//! Configuration loading and defaults.

use crate::defaults;
use crate::error::{Result, VoicelinkError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub protocol: ProtocolConfig,
    pub ota: OtaConfig,
    pub audio: AudioConfig,
}

/// Streaming protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Websocket endpoint of the voice backend.
    pub url: String,
    /// Bearer token sent in the Authorization header.
    pub access_token: String,
    pub frame_duration_ms: u32,
    pub hello_timeout_ms: u64,
    pub liveness_timeout_ms: u64,
}

/// OTA version-check configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    /// Version-check endpoint. Empty disables the check loop.
    pub check_url: String,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub activation_poll_secs: u64,
}

/// Audio scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub idle_silence_secs: u64,
    pub settle_delay_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: String::new(),
            frame_duration_ms: defaults::FRAME_DURATION_MS,
            hello_timeout_ms: defaults::HELLO_TIMEOUT_MS,
            liveness_timeout_ms: defaults::LIVENESS_TIMEOUT_MS,
        }
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            check_url: String::new(),
            max_retries: defaults::OTA_MAX_RETRIES,
            retry_delay_secs: defaults::OTA_RETRY_DELAY_SECS,
            activation_poll_secs: defaults::ACTIVATION_POLL_SECS,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            idle_silence_secs: defaults::IDLE_SILENCE_SECS,
            settle_delay_ms: defaults::SPEAK_TO_LISTEN_SETTLE_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields fall back to default values.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(VoicelinkError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the default path, falling back to defaults when the file
    /// does not exist.
    pub fn load_or_default() -> Result<Config> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Default configuration file location: `~/.config/voicelink/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("voicelink")
            .join("config.toml")
    }
}
