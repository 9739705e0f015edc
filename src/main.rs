//! voicelink binary: runs the control core on a headless development board.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voicelink::board::{
    Board, DeviceClock, FirmwareInstaller, LedDevice, MockClock, MockCodecDevice, MockDisplay,
    MockInstaller, MockLed, SharedDisplay,
};
use voicelink::cli::{Cli, Command};
use voicelink::iot::MockThingManager;
use voicelink::ota::{HttpClient, OtaClient, ReqwestHttpClient};
use voicelink::protocol::transport::{MockTransport, Transport};
use voicelink::protocol::websocket::WebsocketTransport;
use voicelink::{Application, Config, Pcm16Codec, Settings};

/// Development board: logging display, loopback-style codec, no real
/// firmware partition. The transport and HTTP client are real.
struct HeadlessBoard {
    codec: Arc<MockCodecDevice>,
    display: SharedDisplay,
    led: Arc<MockLed>,
    clock: Arc<MockClock>,
    installer: Arc<MockInstaller>,
}

impl HeadlessBoard {
    fn new() -> Self {
        Self {
            codec: Arc::new(MockCodecDevice::wire_native()),
            display: SharedDisplay::new(Box::new(MockDisplay::new())),
            led: Arc::new(MockLed::new()),
            clock: Arc::new(MockClock::new()),
            installer: Arc::new(MockInstaller::new()),
        }
    }
}

impl Board for HeadlessBoard {
    fn audio_codec(&self) -> Arc<dyn voicelink::board::AudioCodecDevice> {
        Arc::clone(&self.codec) as Arc<dyn voicelink::board::AudioCodecDevice>
    }

    fn display(&self) -> SharedDisplay {
        self.display.clone()
    }

    fn led(&self) -> Arc<dyn LedDevice> {
        Arc::clone(&self.led) as Arc<dyn LedDevice>
    }

    fn clock(&self) -> Arc<dyn DeviceClock> {
        Arc::clone(&self.clock) as Arc<dyn DeviceClock>
    }

    fn firmware_installer(&self) -> Arc<dyn FirmwareInstaller> {
        Arc::clone(&self.installer) as Arc<dyn FirmwareInstaller>
    }

    fn create_transport(&self) -> Box<dyn Transport> {
        match WebsocketTransport::new() {
            Ok(transport) => Box::new(transport),
            Err(_) => Box::new(MockTransport::refusing().0),
        }
    }

    fn create_http(&self) -> Box<dyn HttpClient> {
        Box::new(ReqwestHttpClient::new())
    }

    fn device_id(&self) -> String {
        "00:11:22:33:44:55".to_string()
    }

    fn client_id(&self) -> String {
        "headless-dev".to_string()
    }

    fn device_info(&self) -> serde_json::Value {
        serde_json::json!({
            "board": { "type": "headless" },
            "application": { "version": voicelink::version_string() },
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;

    match cli.command {
        Command::Run => run_device(config),
        Command::CheckUpdate => check_update(config),
        Command::Config => {
            let path = cli.config.unwrap_or_else(Config::default_path);
            println!("# {}", path.display());
            println!("{}", toml::to_string(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path.display())),
        None => Config::load_or_default().context("loading default configuration"),
    }
}

fn run_device(config: Config) -> anyhow::Result<()> {
    let board = Arc::new(HeadlessBoard::new());
    let things = Arc::new(MockThingManager::new());
    let settings = Settings::open(
        Config::default_path().with_file_name("settings.toml"),
        true,
    )?;

    let mut app = Application::with_board_transport(
        board,
        things,
        Arc::new(Pcm16Codec),
        settings,
        config,
    )?;
    let handle = app.handle();

    app.start();
    info!("device ready");

    let loop_thread = std::thread::spawn(move || app.run());

    let signals = tokio::runtime::Runtime::new()?;
    signals.block_on(tokio::signal::ctrl_c())?;
    info!("shutting down");
    handle.stop();
    loop_thread
        .join()
        .map_err(|_| anyhow::anyhow!("main loop panicked"))?;
    Ok(())
}

fn check_update(config: Config) -> anyhow::Result<()> {
    let mut client = OtaClient::new(&config.ota.check_url);
    client.set_header("Device-Id", "00:11:22:33:44:55");

    let mut http = ReqwestHttpClient::new();
    let result = client.check_version(&mut http, env!("CARGO_PKG_VERSION"))?;

    println!("current:   {}", result.current_version);
    println!("available: {}", result.firmware_version);
    if result.has_new_version()? {
        println!("update:    {}", result.firmware_url);
    } else {
        println!("update:    none (current is latest)");
    }
    if let Some(activation) = result.activation {
        println!("activation code: {}", activation.code);
    }
    Ok(())
}
