//! Hardware collaborator seams.
//!
//! The control core never talks to chips, panels or partitions directly;
//! it is constructed with handles to these traits and a [`Board`] factory
//! for per-connection resources. Mock implementations live next to the
//! traits so tests and the headless board reuse them.

use crate::ota::HttpClient;
use crate::protocol::transport::Transport;
use crate::state::DeviceState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Audio codec chip: PCM in, PCM out, ready signals.
///
/// `read_input`/`write_output` move whole buffers; the ready callbacks are
/// invoked from the driver's interrupt-ish context and must stay minimal
/// (the core only sets scheduler flags there).
pub trait AudioCodecDevice: Send + Sync {
    fn enable_input(&self, enabled: bool);
    fn enable_output(&self, enabled: bool);

    /// Pulls one captured buffer, interleaved when `input_channels() == 2`.
    /// Returns `None` when no data is pending.
    fn read_input(&self) -> Option<Vec<i16>>;
    fn write_output(&self, pcm: &[i16]);

    fn input_sample_rate(&self) -> u32;
    fn output_sample_rate(&self) -> u32;
    /// 1 = mono microphone, 2 = microphone + echo-reference channel.
    fn input_channels(&self) -> u16;

    fn set_input_ready_callback(&self, callback: Box<dyn Fn() + Send + Sync>);
    fn set_output_ready_callback(&self, callback: Box<dyn Fn() + Send + Sync>);

    /// Begin streaming. Called once during application start.
    fn start(&self);
}

/// Display surface consumed by the state machine and chat flow.
///
/// Implementations need not be thread-safe; all access goes through
/// [`SharedDisplay`], which holds a mutual-exclusion scope around every
/// update because display libraries are not reentrant.
pub trait DisplayDevice: Send {
    fn set_status(&mut self, status: &str);
    fn set_emotion(&mut self, emotion: &str);
    fn set_chat_message(&mut self, role: &str, text: &str);
    fn show_notification(&mut self, text: &str, duration: Duration);
}

/// Cloneable, lock-per-update wrapper around a [`DisplayDevice`].
#[derive(Clone)]
pub struct SharedDisplay {
    inner: Arc<Mutex<Box<dyn DisplayDevice>>>,
}

impl SharedDisplay {
    pub fn new(display: Box<dyn DisplayDevice>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(display)),
        }
    }

    pub fn set_status(&self, status: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_status(status);
    }

    pub fn set_emotion(&self, emotion: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_emotion(emotion);
    }

    pub fn set_chat_message(&self, role: &str, text: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_chat_message(role, text);
    }

    pub fn show_notification(&self, text: &str, duration: Duration) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .show_notification(text, duration);
    }
}

/// Status LED: pulls the current device state and reacts.
pub trait LedDevice: Send + Sync {
    fn on_state_changed(&self, state: DeviceState);
}

/// Wall-clock seam for server time synchronization.
pub trait DeviceClock: Send + Sync {
    /// Applies server time (already adjusted by the timezone offset).
    fn set_system_time(&self, unix_millis: i64);
}

/// Firmware installation seam. The binary transfer, partition writes and
/// reboot mechanics live behind this; the core owns only the policy.
pub trait FirmwareInstaller: Send + Sync {
    /// Downloads and stages the image. Progress callback receives
    /// (percent, bytes-per-second). Must leave the device bootable on
    /// failure (abort-and-discard, never half-applied).
    fn install(&self, url: &str, progress: &mut dyn FnMut(u32, usize)) -> crate::error::Result<()>;

    /// Confirms the currently running image after a successful check.
    fn mark_current_valid(&self);

    fn reboot(&self);
}

/// Factory for the device's capability handles and per-connection resources.
pub trait Board: Send + Sync {
    fn audio_codec(&self) -> Arc<dyn AudioCodecDevice>;
    fn display(&self) -> SharedDisplay;
    fn led(&self) -> Arc<dyn LedDevice>;
    fn clock(&self) -> Arc<dyn DeviceClock>;
    fn firmware_installer(&self) -> Arc<dyn FirmwareInstaller>;

    fn create_transport(&self) -> Box<dyn Transport>;
    fn create_http(&self) -> Box<dyn HttpClient>;

    /// Stable hardware identifier (MAC-derived on real boards).
    fn device_id(&self) -> String;
    /// Per-install identifier.
    fn client_id(&self) -> String;
    /// Device description posted with version checks.
    fn device_info(&self) -> serde_json::Value;

    fn set_power_save(&self, enabled: bool) {
        debug!(enabled, "power save");
    }
}

// ---------------------------------------------------------------------------
// Mock / headless implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockCodecInner {
    input_enabled: bool,
    output_enabled: bool,
    pending_input: std::collections::VecDeque<Vec<i16>>,
    written: Vec<Vec<i16>>,
    input_ready: Option<Box<dyn Fn() + Send + Sync>>,
    output_ready: Option<Box<dyn Fn() + Send + Sync>>,
    started: bool,
}

/// Scriptable codec device for tests and the headless board.
pub struct MockCodecDevice {
    inner: Mutex<MockCodecInner>,
    input_rate: u32,
    output_rate: u32,
    channels: u16,
}

impl MockCodecDevice {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Self {
        Self {
            inner: Mutex::new(MockCodecInner::default()),
            input_rate,
            output_rate,
            channels,
        }
    }

    /// 16kHz mono device needing no resampling.
    pub fn wire_native() -> Self {
        Self::new(16000, 16000, 1)
    }

    /// Queue a capture buffer for the next `read_input`.
    pub fn push_input(&self, pcm: Vec<i16>) {
        self.lock().pending_input.push_back(pcm);
    }

    /// Fire the input-ready callback as the hardware would.
    pub fn trigger_input_ready(&self) {
        let cb = self.lock().input_ready.take();
        if let Some(cb) = cb {
            cb();
            self.lock().input_ready = Some(cb);
        }
    }

    /// Fire the output-ready callback as the hardware would.
    pub fn trigger_output_ready(&self) {
        let cb = self.lock().output_ready.take();
        if let Some(cb) = cb {
            cb();
            self.lock().output_ready = Some(cb);
        }
    }

    pub fn written(&self) -> Vec<Vec<i16>> {
        self.lock().written.clone()
    }

    pub fn input_enabled(&self) -> bool {
        self.lock().input_enabled
    }

    pub fn output_enabled(&self) -> bool {
        self.lock().output_enabled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockCodecInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioCodecDevice for MockCodecDevice {
    fn enable_input(&self, enabled: bool) {
        self.lock().input_enabled = enabled;
    }

    fn enable_output(&self, enabled: bool) {
        self.lock().output_enabled = enabled;
    }

    fn read_input(&self) -> Option<Vec<i16>> {
        self.lock().pending_input.pop_front()
    }

    fn write_output(&self, pcm: &[i16]) {
        self.lock().written.push(pcm.to_vec());
    }

    fn input_sample_rate(&self) -> u32 {
        self.input_rate
    }

    fn output_sample_rate(&self) -> u32 {
        self.output_rate
    }

    fn input_channels(&self) -> u16 {
        self.channels
    }

    fn set_input_ready_callback(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.lock().input_ready = Some(callback);
    }

    fn set_output_ready_callback(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.lock().output_ready = Some(callback);
    }

    fn start(&self) {
        self.lock().started = true;
    }
}

/// Records every display mutation for assertions; logs on the headless board.
#[derive(Clone, Default)]
pub struct MockDisplay {
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for inspecting recorded calls after the display was boxed.
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl DisplayDevice for MockDisplay {
    fn set_status(&mut self, status: &str) {
        info!(status, "display status");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("status:{status}"));
    }

    fn set_emotion(&mut self, emotion: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("emotion:{emotion}"));
    }

    fn set_chat_message(&mut self, role: &str, text: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("chat:{role}:{text}"));
    }

    fn show_notification(&mut self, text: &str, _duration: Duration) {
        info!(text, "notification");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("notify:{text}"));
    }
}

/// Records the state sequence the LED observed.
#[derive(Default)]
pub struct MockLed {
    states: Mutex<Vec<DeviceState>>,
}

impl MockLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(&self) -> Vec<DeviceState> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LedDevice for MockLed {
    fn on_state_changed(&self, state: DeviceState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state);
    }
}

/// Records applied server times instead of touching the wall clock.
#[derive(Default)]
pub struct MockClock {
    applied: Mutex<Vec<i64>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<i64> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DeviceClock for MockClock {
    fn set_system_time(&self, unix_millis: i64) {
        info!(unix_millis, "server time sync");
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(unix_millis);
    }
}

/// Installer that records requests; install always fails so the caller's
/// failure path (status + reboot) is exercised.
#[derive(Default)]
pub struct MockInstaller {
    pub installs: Mutex<Vec<String>>,
    pub marked_valid: Mutex<bool>,
    pub reboots: Mutex<u32>,
}

impl MockInstaller {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FirmwareInstaller for MockInstaller {
    fn install(&self, url: &str, progress: &mut dyn FnMut(u32, usize)) -> crate::error::Result<()> {
        self.installs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        progress(0, 0);
        Err(crate::error::VoicelinkError::Other(
            "no installer on this board".to_string(),
        ))
    }

    fn mark_current_valid(&self) {
        *self.marked_valid.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    fn reboot(&self) {
        *self.reboots.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        info!("reboot requested");
    }
}
