//! Error types for voicelink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoicelinkError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Transport / protocol errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Server hello not received within {timeout_ms}ms")]
    ProtocolTimeout { timeout_ms: u64 },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Audio errors
    #[error("Audio frame decode failed: {message}")]
    Decode { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    // OTA errors
    #[error("Version check failed: {message}")]
    OtaCheck { message: String },

    #[error("Malformed version string '{version}': {message}")]
    VersionParse { version: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoicelinkError>;
