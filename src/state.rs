//! Device state and session enums.
//!
//! The device is always in exactly one [`DeviceState`]; transitions happen
//! only through the application's single setter, which runs entry side
//! effects on the scheduler thread. Other execution contexts (network
//! callbacks, the background worker) observe the current state through a
//! shared [`StateCell`].

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Top-level device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Unknown = 0,
    Starting,
    WifiConfiguring,
    Idle,
    Connecting,
    Listening,
    Speaking,
    Upgrading,
    Activating,
    /// Unrecoverable condition; the device requires a reboot.
    FatalError,
}

impl DeviceState {
    /// String form used in logs and status lines.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Starting => "starting",
            DeviceState::WifiConfiguring => "configuring",
            DeviceState::Idle => "idle",
            DeviceState::Connecting => "connecting",
            DeviceState::Listening => "listening",
            DeviceState::Speaking => "speaking",
            DeviceState::Upgrading => "upgrading",
            DeviceState::Activating => "activating",
            DeviceState::FatalError => "fatal_error",
        }
    }

    fn from_u8(value: u8) -> DeviceState {
        match value {
            1 => DeviceState::Starting,
            2 => DeviceState::WifiConfiguring,
            3 => DeviceState::Idle,
            4 => DeviceState::Connecting,
            5 => DeviceState::Listening,
            6 => DeviceState::Speaking,
            7 => DeviceState::Upgrading,
            8 => DeviceState::Activating,
            9 => DeviceState::FatalError,
            _ => DeviceState::Unknown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free view of the current device state.
///
/// Written only by the state machine on the scheduler thread; read from
/// any thread that needs to gate behavior on the current state (incoming
/// audio routing, background decode work, the version-check loop).
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: DeviceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> DeviceState {
        DeviceState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: DeviceState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(DeviceState::Unknown)
    }
}

/// Who decides when a listening turn ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningMode {
    /// Server-side voice activity detection ends the turn.
    AutoStop,
    /// The turn runs until an explicit stop call.
    ManualStop,
}

impl ListeningMode {
    /// Wire value carried in the listen control message.
    pub fn wire_value(self) -> &'static str {
        match self {
            ListeningMode::AutoStop => "auto",
            ListeningMode::ManualStop => "manual",
        }
    }
}

/// Why in-progress speech output was interrupted.
///
/// Sent to the server so it can decide whether to resume listening
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    None,
    WakeWordDetected,
}
