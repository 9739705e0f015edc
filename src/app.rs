//! Application orchestrator.
//!
//! Composition root for the device: owns the state machine, the audio
//! pipeline, the protocol channel and the background worker, and pumps them
//! from a single scheduler thread. Collaborators (codec, display, LED, IoT
//! registry, settings) are injected at construction — nothing here reaches
//! through globals.

use crate::audio::codec::CodecFactory;
use crate::audio::pipeline::AudioPipeline;
use crate::background::BackgroundQueue;
use crate::board::{AudioCodecDevice, Board, FirmwareInstaller, LedDevice, SharedDisplay};
use crate::config::Config;
use crate::error::Result;
use crate::iot::ThingManager;
use crate::ota::{self, ActivationInfo, OtaClient};
use crate::protocol::message::{ServerMessage, TtsState};
use crate::protocol::transport::TransportFactory;
use crate::protocol::{ProtocolEvents, VoiceProtocol, WebsocketConfig, WebsocketProtocol};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::settings::Settings;
use crate::state::{AbortReason, DeviceState, ListeningMode, StateCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between quiescing audio and starting the firmware transfer.
const UPGRADE_QUIESCE: Duration = Duration::from_secs(1);
/// How long the failure status stays visible before the recovery reboot.
const UPGRADE_FAILURE_PAUSE: Duration = Duration::from_secs(3);
/// Poll interval while waiting for the device to go idle before upgrading.
const IDLE_POLL: Duration = Duration::from_secs(3);

/// Mutable application state, owned by the scheduler thread. Deferred tasks
/// receive `&mut AppCore`; no other context touches it.
pub struct AppCore {
    config: Config,
    state: Arc<StateCell>,
    board: Arc<dyn Board>,
    display: SharedDisplay,
    codec_dev: Arc<dyn AudioCodecDevice>,
    things: Arc<dyn ThingManager>,
    settings: Settings,
    protocol: Box<dyn VoiceProtocol>,
    pipeline: AudioPipeline,
    background: Arc<BackgroundQueue>,
    keep_listening: bool,
    aborted: Arc<AtomicBool>,
    last_iot_states: Option<String>,
    tick_count: u64,
    has_server_time: Arc<AtomicBool>,
}

/// Cloneable control surface for button handlers and embedders.
#[derive(Clone)]
pub struct AppHandle {
    scheduler: SchedulerHandle<AppCore>,
    running: Arc<AtomicBool>,
}

pub struct Application {
    core: AppCore,
    scheduler: Scheduler<AppCore>,
    running: Arc<AtomicBool>,
    current_version: String,
}

impl Application {
    /// Wires an application from injected collaborators.
    ///
    /// `protocol` arrives pre-configured with its transport factory but
    /// without event callbacks — those are installed here.
    pub fn new(
        board: Arc<dyn Board>,
        things: Arc<dyn ThingManager>,
        codec_factory: Arc<dyn CodecFactory>,
        mut protocol: WebsocketProtocol,
        settings: Settings,
        config: Config,
    ) -> Result<Self> {
        let scheduler: Scheduler<AppCore> = Scheduler::new();
        let handle = scheduler.handle();

        let state = Arc::new(StateCell::new(DeviceState::Unknown));
        let aborted = Arc::new(AtomicBool::new(false));
        let codec_dev = board.audio_codec();
        let display = board.display();

        let mut pipeline = AudioPipeline::new(
            Arc::clone(&codec_dev),
            codec_factory,
            Arc::clone(&state),
            Arc::clone(&aborted),
            Duration::from_secs(config.audio.idle_silence_secs),
            config.protocol.frame_duration_ms,
        )?;

        // Encoded uplink frames hop from the background worker to the
        // scheduler thread, where the protocol lives.
        let uplink = handle.clone();
        pipeline.set_encoded_sink(Arc::new(move |frame| {
            uplink.schedule(move |core: &mut AppCore| core.protocol.send_audio(&frame));
        }));

        // Received audio goes straight into the playback queue (dropped
        // unless speaking); control events hop to the scheduler thread.
        let playback = pipeline.playback_queue();
        let on_message = handle.clone();
        let on_closed = handle.clone();
        let on_error = handle.clone();
        protocol.set_events(ProtocolEvents {
            on_incoming_audio: Box::new(move |frame| playback.push_if_speaking(frame)),
            on_incoming_message: Box::new(move |message| {
                on_message.schedule(move |core: &mut AppCore| core.handle_server_message(message));
            }),
            on_channel_closed: Box::new(move || {
                on_closed.schedule(|core: &mut AppCore| core.on_channel_closed());
            }),
            on_network_error: Box::new(move |message| {
                on_error.schedule(move |core: &mut AppCore| core.on_network_error(&message));
            }),
        });

        let core = AppCore {
            config,
            state,
            board,
            display,
            codec_dev,
            things,
            settings,
            protocol: Box::new(protocol),
            pipeline,
            background: Arc::new(BackgroundQueue::new()),
            keep_listening: false,
            aborted,
            last_iot_states: None,
            tick_count: 0,
            has_server_time: Arc::new(AtomicBool::new(false)),
        };

        Ok(Self {
            core,
            scheduler,
            running: Arc::new(AtomicBool::new(true)),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Builds the default production wiring: websocket protocol over the
    /// board's transport factory.
    pub fn with_board_transport(
        board: Arc<dyn Board>,
        things: Arc<dyn ThingManager>,
        codec_factory: Arc<dyn CodecFactory>,
        settings: Settings,
        config: Config,
    ) -> Result<Self> {
        let ws_config = WebsocketConfig {
            url: config.protocol.url.clone(),
            access_token: config.protocol.access_token.clone(),
            device_id: board.device_id(),
            client_id: board.client_id(),
            frame_duration_ms: config.protocol.frame_duration_ms,
            hello_timeout: Duration::from_millis(config.protocol.hello_timeout_ms),
            liveness_timeout: Duration::from_millis(config.protocol.liveness_timeout_ms),
        };
        let transport_board = Arc::clone(&board);
        let factory: Arc<dyn TransportFactory> =
            Arc::new(move || transport_board.create_transport());
        let protocol = WebsocketProtocol::new(ws_config, factory);
        Self::new(board, things, codec_factory, protocol, settings, config)
    }

    pub fn handle(&self) -> AppHandle {
        AppHandle {
            scheduler: self.scheduler.handle(),
            running: Arc::clone(&self.running),
        }
    }

    /// Boot sequence: wire hardware callbacks, start the codec and the
    /// periodic threads, land in Idle.
    pub fn start(&mut self) {
        self.core.set_device_state(DeviceState::Starting);

        let handle = self.scheduler.handle();
        let input = handle.clone();
        self.core
            .codec_dev
            .set_input_ready_callback(Box::new(move || input.signal_input_ready()));
        let output = handle.clone();
        self.core
            .codec_dev
            .set_output_ready_callback(Box::new(move || output.signal_output_ready()));
        self.core.codec_dev.start();

        self.spawn_clock_ticker();
        self.spawn_version_check();

        self.core.set_device_state(DeviceState::Idle);
    }

    /// Runs the main loop until [`AppHandle::stop`] is called.
    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.run_cycle();
        }
    }

    /// One loop iteration: service audio I/O first, then drain the deferred
    /// task queue in FIFO order.
    pub fn run_cycle(&mut self) {
        let wakeup = self.scheduler.wait_timeout(Duration::from_millis(100));
        if wakeup.input_ready {
            self.core.pipeline.process_input(&self.core.background);
        }
        if wakeup.output_ready {
            self.core.pipeline.process_output(&self.core.background);
        }
        if wakeup.tasks_ready {
            for task in self.scheduler.take_tasks() {
                task(&mut self.core);
            }
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.core.state.load()
    }

    /// Direct access to the core, for embedders and scenario tests that
    /// drive the scheduler thread themselves.
    pub fn core_mut(&mut self) -> &mut AppCore {
        &mut self.core
    }

    fn spawn_clock_ticker(&self) {
        let handle = self.scheduler.handle();
        let running = Arc::clone(&self.running);
        thread::Builder::new()
            .name("clock".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_secs(1));
                    handle.schedule(|core: &mut AppCore| core.on_clock_tick());
                }
            })
            .expect("failed to spawn clock thread");
    }

    fn spawn_version_check(&self) {
        if self.core.config.ota.check_url.is_empty() {
            info!("no version-check endpoint configured");
            return;
        }

        let mut client = OtaClient::new(&self.core.config.ota.check_url);
        client.set_header("Device-Id", &self.core.board.device_id());
        client.set_header("Client-Id", &self.core.board.client_id());
        client.set_post_data(self.core.board.device_info().to_string());

        let ctx = VersionCheckContext {
            client,
            board: Arc::clone(&self.core.board),
            settings: self.core.settings.clone(),
            handle: self.scheduler.handle(),
            state: Arc::clone(&self.core.state),
            has_server_time: Arc::clone(&self.core.has_server_time),
            running: Arc::clone(&self.running),
            max_retries: self.core.config.ota.max_retries,
            retry_delay: Duration::from_secs(self.core.config.ota.retry_delay_secs),
            activation_poll_secs: self.core.config.ota.activation_poll_secs,
            current_version: self.current_version.clone(),
        };
        thread::Builder::new()
            .name("version-check".to_string())
            .spawn(move || run_version_check(ctx))
            .expect("failed to spawn version-check thread");
    }
}

impl AppHandle {
    pub fn toggle_chat(&self) {
        self.scheduler
            .schedule(|core: &mut AppCore| core.toggle_chat_state());
    }

    pub fn start_listening(&self) {
        self.scheduler
            .schedule(|core: &mut AppCore| core.start_listening());
    }

    pub fn stop_listening(&self) {
        self.scheduler
            .schedule(|core: &mut AppCore| core.stop_listening());
    }

    pub fn wake_word(&self, word: &str) {
        let word = word.to_string();
        self.scheduler
            .schedule(move |core: &mut AppCore| core.wake_word_invoke(&word));
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Wake the loop so it observes the flag.
        self.scheduler.schedule(|_core: &mut AppCore| {});
    }
}

impl AppCore {
    /// The single authoritative state setter.
    ///
    /// No-op when unchanged. On every real transition: reset the tick
    /// counter, drain the background worker so no stale audio work races
    /// the new state's side effects, then apply the entry actions.
    pub fn set_device_state(&mut self, state: DeviceState) {
        if self.state.load() == state {
            return;
        }

        self.tick_count = 0;
        let previous = self.state.load();
        self.state.store(state);
        info!(from = previous.as_str(), to = state.as_str(), "device state");
        self.background.wait_for_completion();

        self.board.led().on_state_changed(state);

        match state {
            DeviceState::Unknown | DeviceState::Idle => {
                self.display.set_status("standby");
                self.display.set_emotion("neutral");
                self.pipeline.stop_frontends();
            }
            DeviceState::Starting => {
                self.display.set_status("starting");
            }
            DeviceState::Connecting => {
                self.display.set_status("connecting");
                self.display.set_emotion("neutral");
                self.display.set_chat_message("system", "");
            }
            DeviceState::Listening => {
                self.display.set_status("listening");
                self.display.set_emotion("neutral");
                self.pipeline.reset_decoder();
                self.pipeline.reset_encoder();
                self.pipeline.start_frontends();
                self.update_iot_states();
                if previous == DeviceState::Speaking {
                    // Let the speaker drain before capture resumes.
                    thread::sleep(Duration::from_millis(self.config.audio.settle_delay_ms));
                }
            }
            DeviceState::Speaking => {
                self.display.set_status("speaking");
                self.pipeline.reset_decoder();
                self.codec_dev.enable_output(true);
                self.pipeline.stop_frontends();
            }
            DeviceState::Upgrading => {
                self.display.set_status("upgrading");
                self.display.set_emotion("neutral");
            }
            DeviceState::Activating => {
                self.display.set_status("activating");
            }
            DeviceState::WifiConfiguring => {
                self.display.set_status("configuring");
            }
            DeviceState::FatalError => {
                self.display.set_status("error");
                self.display.set_emotion("sad");
            }
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.state.load()
    }

    pub fn playback_len(&self) -> usize {
        self.pipeline.playback_len()
    }

    /// Push-to-talk toggle: Idle opens a hands-free session, Speaking
    /// aborts playback, Listening hangs up.
    pub fn toggle_chat_state(&mut self) {
        match self.state.load() {
            DeviceState::Activating => self.set_device_state(DeviceState::Idle),
            DeviceState::Idle => {
                if !self.ensure_channel_open() {
                    return;
                }
                self.keep_listening = true;
                self.protocol.send_start_listening(ListeningMode::AutoStop);
                self.set_device_state(DeviceState::Listening);
            }
            DeviceState::Speaking => self.abort_speaking(AbortReason::None),
            DeviceState::Listening => self.protocol.close_audio_channel(),
            _ => {}
        }
    }

    /// Hold-to-talk entry: the caller decides when the turn ends.
    pub fn start_listening(&mut self) {
        if self.state.load() == DeviceState::Activating {
            self.set_device_state(DeviceState::Idle);
            return;
        }

        self.keep_listening = false;
        match self.state.load() {
            DeviceState::Idle => {
                if !self.ensure_channel_open() {
                    return;
                }
                self.protocol
                    .send_start_listening(ListeningMode::ManualStop);
                self.set_device_state(DeviceState::Listening);
            }
            DeviceState::Speaking => {
                self.abort_speaking(AbortReason::None);
                self.protocol
                    .send_start_listening(ListeningMode::ManualStop);
                self.set_device_state(DeviceState::Listening);
            }
            _ => {}
        }
    }

    pub fn stop_listening(&mut self) {
        if self.state.load() == DeviceState::Listening {
            self.protocol.send_stop_listening();
            self.set_device_state(DeviceState::Idle);
        }
    }

    /// Cooperative interrupt of speech output: flags in-flight decode work
    /// to skip its output step and tells the server why.
    pub fn abort_speaking(&mut self, reason: AbortReason) {
        info!("abort speaking");
        self.aborted.store(true, Ordering::SeqCst);
        self.protocol.send_abort_speaking(reason);
    }

    /// Reaction to a locally detected wake word.
    pub fn wake_word_invoke(&mut self, word: &str) {
        match self.state.load() {
            DeviceState::Idle => {
                self.toggle_chat_state();
                self.protocol.send_wake_word_detected(word);
            }
            DeviceState::Speaking => self.abort_speaking(AbortReason::WakeWordDetected),
            DeviceState::Listening => self.protocol.close_audio_channel(),
            DeviceState::Activating => self.set_device_state(DeviceState::Idle),
            _ => {}
        }
    }

    /// Dispatches one parsed control message from the server.
    pub fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Tts { state, text } => self.handle_tts(state, text),
            ServerMessage::Stt { text } => {
                info!(text = %text, "transcription");
                self.display.set_chat_message("user", &text);
            }
            ServerMessage::Llm { emotion } => {
                if let Some(emotion) = emotion {
                    self.display.set_emotion(&emotion);
                }
            }
            ServerMessage::Iot { commands } => {
                for command in &commands {
                    self.things.invoke(command);
                }
            }
            // Hello is consumed by the protocol layer; Unknown was already
            // logged and dropped there.
            ServerMessage::Hello(_) | ServerMessage::Unknown => {}
        }
    }

    fn handle_tts(&mut self, state: TtsState, text: Option<String>) {
        match state {
            TtsState::Start => {
                self.aborted.store(false, Ordering::SeqCst);
                match self.state.load() {
                    DeviceState::Idle => self.set_device_state(DeviceState::Speaking),
                    // A hands-free turn hands over to playback; a held
                    // manual turn is not preempted by server speech.
                    DeviceState::Listening if self.keep_listening => {
                        self.set_device_state(DeviceState::Speaking)
                    }
                    _ => {}
                }
            }
            TtsState::Stop => {
                if self.state.load() == DeviceState::Speaking {
                    self.background.wait_for_completion();
                    if self.keep_listening {
                        self.protocol.send_start_listening(ListeningMode::AutoStop);
                        self.set_device_state(DeviceState::Listening);
                    } else {
                        self.set_device_state(DeviceState::Idle);
                    }
                }
            }
            TtsState::SentenceStart => {
                if let Some(text) = text {
                    info!(text = %text, "assistant");
                    self.display.set_chat_message("assistant", &text);
                }
            }
            TtsState::SentenceEnd => {}
        }
    }

    /// Opens the channel if needed, passing through Connecting. Returns
    /// false when the open failed (the error alert was already raised via
    /// the network-error event).
    fn ensure_channel_open(&mut self) -> bool {
        if self.protocol.is_audio_channel_opened() {
            return true;
        }
        self.set_device_state(DeviceState::Connecting);
        if self.protocol.open_audio_channel().is_err() {
            return false;
        }
        self.on_channel_opened();
        true
    }

    fn on_channel_opened(&mut self) {
        self.board.set_power_save(false);

        let server_rate = self.protocol.server_sample_rate();
        let device_rate = self.codec_dev.output_sample_rate();
        if server_rate != device_rate {
            warn!(
                server_rate,
                device_rate, "rates differ, resampling may cause distortion"
            );
        }
        if let Err(e) = self.pipeline.set_decode_sample_rate(server_rate) {
            warn!(error = %e, "failed to reconfigure decoder");
        }

        self.last_iot_states = None;
        self.protocol
            .send_iot_descriptors(self.things.descriptors_json());
    }

    fn on_channel_closed(&mut self) {
        self.board.set_power_save(true);
        self.display.set_chat_message("system", "");
        self.set_device_state(DeviceState::Idle);
    }

    fn on_network_error(&mut self, message: &str) {
        self.set_device_state(DeviceState::Idle);
        self.alert("error", message, "sad");
    }

    /// Sends the IoT state snapshot when it differs from the last one sent.
    fn update_iot_states(&mut self) {
        let states = self.things.states_json();
        if self.last_iot_states.as_deref() == Some(states.as_str()) {
            return;
        }
        self.last_iot_states = Some(states.clone());
        let value = serde_json::from_str(&states)
            .unwrap_or_else(|_| serde_json::Value::String(states));
        self.protocol.send_iot_states(value);
    }

    /// User-visible alert: status line, expression and a system chat entry.
    pub fn alert(&mut self, status: &str, message: &str, emotion: &str) {
        warn!(status, message, emotion, "alert");
        self.display.set_status(status);
        self.display.set_emotion(emotion);
        self.display.set_chat_message("system", message);
    }

    /// Restores the standby surface if the alert is no longer relevant.
    pub fn dismiss_alert(&mut self) {
        if self.state.load() == DeviceState::Idle {
            self.display.set_status("standby");
            self.display.set_emotion("neutral");
            self.display.set_chat_message("system", "");
        }
    }

    /// Queues a local notification sound for playback.
    pub fn play_sound(&mut self, pack: &[u8]) {
        self.codec_dev.enable_output(true);
        if let Err(e) = self.pipeline.enqueue_sound(pack) {
            warn!(error = %e, "failed to queue sound");
        }
    }

    /// Safe to power down only when idle with no open channel.
    pub fn can_enter_sleep_mode(&self) -> bool {
        self.state.load() == DeviceState::Idle && !self.protocol.is_audio_channel_opened()
    }

    fn on_clock_tick(&mut self) {
        self.tick_count += 1;
        if self.tick_count % 10 == 0 {
            debug!(state = self.state.load().as_str(), ticks = self.tick_count, "clock");
            if self.has_server_time.load(Ordering::SeqCst)
                && self.state.load() == DeviceState::Idle
            {
                let now = chrono::Local::now();
                self.display.set_status(&now.format("%H:%M  ").to_string());
            }
        }
    }

    /// Runs the staged upgrade: quiesce all audio, hand off to the
    /// installer, reboot regardless of outcome so the device comes back in
    /// a clean state.
    pub fn perform_upgrade(&mut self, version: &str, url: &str) {
        let installer = self.board.firmware_installer();

        self.set_device_state(DeviceState::Upgrading);
        self.display
            .set_chat_message("system", &format!("new version {version}"));
        self.board.set_power_save(false);

        self.pipeline.stop_frontends();
        self.codec_dev.enable_input(false);
        self.codec_dev.enable_output(false);
        self.pipeline.clear_playback();
        self.background.wait_for_completion();
        thread::sleep(UPGRADE_QUIESCE);

        let display = self.display.clone();
        let result = installer.install(url, &mut |progress, speed| {
            display.set_chat_message("system", &format!("{progress}% {}KB/s", speed / 1024));
        });

        match result {
            Ok(()) => {
                info!("firmware staged, rebooting");
                installer.reboot();
            }
            Err(e) => {
                error!(error = %e, "firmware upgrade failed");
                self.display.set_status("upgrade failed");
                thread::sleep(UPGRADE_FAILURE_PAUSE);
                installer.reboot();
            }
        }
    }

    fn show_activation(&mut self, activation: &ActivationInfo) {
        self.alert("activation", &activation.message, "happy");
        self.display
            .show_notification(&activation.code, Duration::from_secs(30));
    }
}

// ---------------------------------------------------------------------------
// Version-check loop
// ---------------------------------------------------------------------------

struct VersionCheckContext {
    client: OtaClient,
    board: Arc<dyn Board>,
    settings: Settings,
    handle: SchedulerHandle<AppCore>,
    state: Arc<StateCell>,
    has_server_time: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    max_retries: u32,
    retry_delay: Duration,
    activation_poll_secs: u64,
    current_version: String,
}

/// Bounded-retry version check with upgrade/activation orchestration.
///
/// Runs on its own thread; anything touching the core is scheduled onto the
/// main loop.
fn run_version_check(ctx: VersionCheckContext) {
    let mut retry_count = 0u32;

    loop {
        if !ctx.running.load(Ordering::SeqCst) {
            return;
        }

        let mut http = ctx.board.create_http();
        let result = match ctx
            .client
            .check_version(http.as_mut(), &ctx.current_version)
        {
            Ok(result) => result,
            Err(e) => {
                retry_count += 1;
                if retry_count >= ctx.max_retries {
                    error!(retries = retry_count, "too many retries, exit version check");
                    return;
                }
                warn!(
                    error = %e,
                    retry = retry_count,
                    max = ctx.max_retries,
                    delay_secs = ctx.retry_delay.as_secs(),
                    "version check failed, will retry"
                );
                thread::sleep(ctx.retry_delay);
                continue;
            }
        };
        retry_count = 0;

        ota::apply_side_effects(&result, &ctx.settings, ctx.board.clock().as_ref());
        if result.server_time.is_some() {
            ctx.has_server_time.store(true, Ordering::SeqCst);
        }

        match result.has_new_version() {
            Ok(true) => {
                let version = result.firmware_version.clone();
                ctx.handle.schedule(move |core: &mut AppCore| {
                    core.alert("upgrade", &format!("new version {version}"), "happy");
                });

                // The upgrade quiesces everything; wait for a quiet moment.
                while ctx.state.load() != DeviceState::Idle {
                    if !ctx.running.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(IDLE_POLL);
                }

                let version = result.firmware_version.clone();
                let url = result.firmware_url.clone();
                ctx.handle.schedule(move |core: &mut AppCore| {
                    core.perform_upgrade(&version, &url);
                });
                return;
            }
            Ok(false) => {}
            Err(e) => {
                // Malformed version strings are a hard failure of this
                // check, not something to coerce around.
                error!(error = %e, "version comparison failed, exit version check");
                return;
            }
        }

        ctx.board.firmware_installer().mark_current_valid();
        {
            let current = result.current_version.clone();
            ctx.handle.schedule(move |core: &mut AppCore| {
                core.display
                    .show_notification(&format!("version {current}"), Duration::from_secs(5));
            });
        }

        if let Some(activation) = result.activation {
            ctx.handle.schedule(move |core: &mut AppCore| {
                core.set_device_state(DeviceState::Activating);
                core.show_activation(&activation);
            });

            // Give the user a window to activate, then check again.
            for _ in 0..ctx.activation_poll_secs {
                if !ctx.running.load(Ordering::SeqCst) {
                    return;
                }
                if ctx.state.load() == DeviceState::Idle {
                    break;
                }
                thread::sleep(Duration::from_secs(1));
            }
            continue;
        }

        ctx.handle.schedule(|core: &mut AppCore| {
            core.set_device_state(DeviceState::Idle);
            core.display.set_chat_message("system", "");
        });
        return;
    }
}
