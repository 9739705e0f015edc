//! Shared fixtures for scenario tests: a fully mocked board and an
//! application wired to scripted transports.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use voicelink::board::{
    AudioCodecDevice, Board, DeviceClock, FirmwareInstaller, LedDevice, MockClock,
    MockCodecDevice, MockDisplay, MockInstaller, MockLed, SharedDisplay,
};
use voicelink::iot::MockThingManager;
use voicelink::ota::{HttpClient, MockHttpClient, SharedMockHttp};
use voicelink::protocol::transport::{
    MockTransport, MockTransportFactory, Transport, TransportEvent,
};
use voicelink::protocol::{WebsocketConfig, WebsocketProtocol};
use voicelink::{Application, Config, Pcm16Codec, Settings};

pub struct TestBoard {
    pub codec: Arc<MockCodecDevice>,
    pub display: SharedDisplay,
    pub display_calls: Arc<Mutex<Vec<String>>>,
    pub led: Arc<MockLed>,
    pub clock: Arc<MockClock>,
    pub installer: Arc<MockInstaller>,
    pub http: Arc<MockHttpClient>,
}

impl TestBoard {
    pub fn new() -> Self {
        let display = MockDisplay::new();
        let display_calls = display.calls_handle();
        Self {
            codec: Arc::new(MockCodecDevice::wire_native()),
            display: SharedDisplay::new(Box::new(display)),
            display_calls,
            led: Arc::new(MockLed::new()),
            clock: Arc::new(MockClock::new()),
            installer: Arc::new(MockInstaller::new()),
            http: Arc::new(MockHttpClient::new()),
        }
    }

    pub fn display_call_count(&self) -> usize {
        self.display_calls.lock().unwrap().len()
    }

    pub fn display_has_call(&self, call: &str) -> bool {
        self.display_calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == call)
    }
}

impl Board for TestBoard {
    fn audio_codec(&self) -> Arc<dyn AudioCodecDevice> {
        Arc::clone(&self.codec) as Arc<dyn AudioCodecDevice>
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
        Box::new(MockTransport::refusing().0)
    }

    fn create_http(&self) -> Box<dyn HttpClient> {
        Box::new(SharedMockHttp(Arc::clone(&self.http)))
    }

    fn device_id(&self) -> String {
        "aa:bb:cc:dd:ee:ff".to_string()
    }

    fn client_id(&self) -> String {
        "test-client".to_string()
    }

    fn device_info(&self) -> serde_json::Value {
        serde_json::json!({"board": {"type": "test"}})
    }
}

/// The canonical scripted server hello.
pub fn server_hello_event() -> TransportEvent {
    TransportEvent::Text(
        r#"{"type":"hello","transport":"websocket","session_id":"session-1",
            "audio_params":{"sample_rate":16000}}"#
            .to_string(),
    )
}

/// Builds an application whose protocol uses the given scripted transports,
/// in open order.
pub fn build_app(
    board: Arc<TestBoard>,
    things: Arc<MockThingManager>,
    transports: Vec<MockTransport>,
    mut config: Config,
) -> Application {
    config.protocol.url = "wss://voice.test/stream".to_string();

    let factory = MockTransportFactory::new();
    for transport in transports {
        factory.push(transport);
    }

    let ws_config = WebsocketConfig {
        url: config.protocol.url.clone(),
        access_token: "test-token".to_string(),
        device_id: board.device_id(),
        client_id: board.client_id(),
        frame_duration_ms: config.protocol.frame_duration_ms,
        hello_timeout: Duration::from_millis(config.protocol.hello_timeout_ms),
        liveness_timeout: Duration::from_millis(config.protocol.liveness_timeout_ms),
    };
    let protocol = WebsocketProtocol::new(ws_config, Arc::new(factory));

    Application::new(
        board,
        things,
        Arc::new(Pcm16Codec),
        protocol,
        Settings::in_memory(),
        config,
    )
    .expect("application wiring failed")
}

/// Drives the main loop until the predicate holds or the deadline passes.
pub fn pump_until(
    app: &mut Application,
    deadline: Duration,
    mut predicate: impl FnMut(&Application) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        app.run_cycle();
        if predicate(app) {
            return true;
        }
    }
    false
}

/// Runs a fixed number of loop cycles.
pub fn pump(app: &mut Application, cycles: usize) {
    for _ in 0..cycles {
        app.run_cycle();
    }
}
