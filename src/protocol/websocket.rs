//! Websocket implementation of the streaming protocol, plus the
//! tokio-tungstenite transport it runs over in production.

use crate::defaults;
use crate::error::{Result, VoicelinkError};
use crate::protocol::message::{self, ClientMessage, ServerMessage};
use crate::protocol::transport::{EventSink, Transport, TransportEvent, TransportFactory};
use crate::protocol::{ProtocolEvents, VoiceProtocol};
use crate::state::{AbortReason, ListeningMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Transport kind declared in and required of the hello exchange.
const TRANSPORT_KIND: &str = "websocket";

/// Connection parameters for one device.
#[derive(Debug, Clone)]
pub struct WebsocketConfig {
    pub url: String,
    pub access_token: String,
    pub device_id: String,
    pub client_id: String,
    pub frame_duration_ms: u32,
    pub hello_timeout: Duration,
    pub liveness_timeout: Duration,
}

impl WebsocketConfig {
    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.access_token),
            ),
            (
                "Protocol-Version".to_string(),
                defaults::PROTOCOL_VERSION.to_string(),
            ),
            ("Device-Id".to_string(), self.device_id.clone()),
            ("Client-Id".to_string(), self.client_id.clone()),
        ]
    }
}

struct Session {
    open: bool,
    error: bool,
    hello_received: bool,
    server_sample_rate: u32,
    session_id: Option<String>,
}

struct Shared {
    session: Mutex<Session>,
    hello_wake: Condvar,
    last_incoming: Mutex<Instant>,
}

/// The one concrete streaming protocol: hello handshake over a websocket
/// transport, binary audio frames, JSON control messages, liveness by
/// last-incoming age.
pub struct WebsocketProtocol {
    config: WebsocketConfig,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn Transport>>,
    shared: Arc<Shared>,
    events: Arc<ProtocolEvents>,
}

impl WebsocketProtocol {
    pub fn new(config: WebsocketConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            transport: None,
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    open: false,
                    error: false,
                    hello_received: false,
                    server_sample_rate: defaults::WIRE_SAMPLE_RATE,
                    session_id: None,
                }),
                hello_wake: Condvar::new(),
                last_incoming: Mutex::new(Instant::now()),
            }),
            events: Arc::new(ProtocolEvents::default()),
        }
    }

    /// Installs the event callbacks. Must happen before the first open.
    pub fn set_events(&mut self, events: ProtocolEvents) {
        self.events = Arc::new(events);
    }

    fn make_sink(&self) -> EventSink {
        let shared = Arc::clone(&self.shared);
        let events = Arc::clone(&self.events);
        Box::new(move |event| dispatch(&shared, &events, event))
    }

    fn report_error(&self, message: String) {
        self.lock_session().error = true;
        (self.events.on_network_error)(message);
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.shared.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_control(&mut self, message: ClientMessage) {
        if !self.lock_session().open {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode control message");
                return;
            }
        };
        if let Err(e) = transport.send_text(&json) {
            error!(error = %e, "failed to send control message");
            self.report_error("server error".to_string());
        }
    }
}

fn dispatch(shared: &Arc<Shared>, events: &Arc<ProtocolEvents>, event: TransportEvent) {
    match event {
        TransportEvent::Text(text) => {
            *shared
                .last_incoming
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Instant::now();
            match message::parse_server_message(&text) {
                Ok(ServerMessage::Hello(hello)) => {
                    if hello.transport.as_deref() != Some(TRANSPORT_KIND) {
                        error!(
                            transport = hello.transport.as_deref().unwrap_or("<missing>"),
                            "unsupported transport in server hello"
                        );
                        return;
                    }
                    let mut session = shared.session.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(rate) = hello.audio_params.as_ref().and_then(|p| p.sample_rate) {
                        session.server_sample_rate = rate;
                    }
                    if hello.session_id.is_some() {
                        session.session_id = hello.session_id;
                    }
                    session.hello_received = true;
                    drop(session);
                    shared.hello_wake.notify_all();
                }
                Ok(ServerMessage::Unknown) => {
                    error!(raw = %text, "unrecognized message type, dropped");
                }
                Ok(message) => (events.on_incoming_message)(message),
                Err(e) => {
                    error!(error = %e, raw = %text, "dropped malformed message");
                }
            }
        }
        TransportEvent::Binary(data) => {
            *shared
                .last_incoming
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Instant::now();
            (events.on_incoming_audio)(data);
        }
        TransportEvent::Disconnected => {
            info!("transport disconnected");
            let mut session = shared.session.lock().unwrap_or_else(|e| e.into_inner());
            if session.open {
                session.open = false;
                drop(session);
                (events.on_channel_closed)();
            }
        }
    }
}

impl VoiceProtocol for WebsocketProtocol {
    fn open_audio_channel(&mut self) -> Result<()> {
        // Tear down any previous transport before reconnecting.
        if let Some(mut old) = self.transport.take() {
            old.close();
        }
        {
            let mut session = self.lock_session();
            session.open = false;
            session.error = false;
            session.hello_received = false;
        }

        let mut transport = self.factory.create();
        if let Err(e) = transport.connect(&self.config.url, &self.config.headers(), self.make_sink())
        {
            error!(error = %e, url = %self.config.url, "failed to connect to server");
            self.report_error("server not found".to_string());
            return Err(e);
        }

        let hello = ClientMessage::hello(TRANSPORT_KIND, self.config.frame_duration_ms).to_json()?;
        if let Err(e) = transport.send_text(&hello) {
            error!(error = %e, "failed to send client hello");
            transport.close();
            self.report_error("server not found".to_string());
            return Err(e);
        }

        // Block until the matching server hello arrives or the window ends.
        let deadline = Instant::now() + self.config.hello_timeout;
        let mut session = self.lock_session();
        while !session.hello_received {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drop(session);
                transport.close();
                error!("no server hello within handshake window");
                self.report_error("server timeout".to_string());
                return Err(VoicelinkError::ProtocolTimeout {
                    timeout_ms: self.config.hello_timeout.as_millis() as u64,
                });
            }
            let (guard, _result) = self
                .shared
                .hello_wake
                .wait_timeout(session, remaining)
                .unwrap_or_else(|e| e.into_inner());
            session = guard;
        }
        session.open = true;
        drop(session);

        *self
            .shared
            .last_incoming
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.transport = Some(transport);
        info!(url = %self.config.url, "audio channel opened");
        Ok(())
    }

    fn close_audio_channel(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        let mut session = self.lock_session();
        if session.open {
            session.open = false;
            drop(session);
            (self.events.on_channel_closed)();
        }
    }

    fn is_audio_channel_opened(&self) -> bool {
        let session = self.lock_session();
        if !session.open || session.error {
            return false;
        }
        drop(session);
        let last = *self
            .shared
            .last_incoming
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        last.elapsed() <= self.config.liveness_timeout
    }

    fn server_sample_rate(&self) -> u32 {
        self.lock_session().server_sample_rate
    }

    fn session_id(&self) -> Option<String> {
        self.lock_session().session_id.clone()
    }

    fn send_audio(&mut self, frame: &[u8]) {
        if !self.lock_session().open {
            return;
        }
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.send_binary(frame) {
                debug!(error = %e, "audio frame send failed");
            }
        }
    }

    fn send_start_listening(&mut self, mode: ListeningMode) {
        let session_id = self.session_id();
        self.send_control(ClientMessage::start_listening(session_id, mode));
    }

    fn send_stop_listening(&mut self) {
        let session_id = self.session_id();
        self.send_control(ClientMessage::stop_listening(session_id));
    }

    fn send_wake_word_detected(&mut self, word: &str) {
        let session_id = self.session_id();
        self.send_control(ClientMessage::wake_word_detected(session_id, word));
    }

    fn send_abort_speaking(&mut self, reason: AbortReason) {
        let session_id = self.session_id();
        self.send_control(ClientMessage::abort_speaking(session_id, reason));
    }

    fn send_iot_descriptors(&mut self, descriptors: serde_json::Value) {
        let session_id = self.session_id();
        self.send_control(ClientMessage::iot_descriptors(session_id, descriptors));
    }

    fn send_iot_states(&mut self, states: serde_json::Value) {
        let session_id = self.session_id();
        self.send_control(ClientMessage::iot_states(session_id, states));
    }
}

// ---------------------------------------------------------------------------
// tokio-tungstenite transport
// ---------------------------------------------------------------------------

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Production websocket transport over an owned single-worker runtime.
///
/// `connect` blocks on the handshake, then a reader task feeds the sink and
/// a writer task drains the outbound queue, so sends never block the
/// scheduler thread.
pub struct WebsocketTransport {
    runtime: tokio::runtime::Runtime,
    writer: Option<tokio::sync::mpsc::UnboundedSender<Message>>,
    connected: Arc<AtomicBool>,
}

impl WebsocketTransport {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| VoicelinkError::Transport {
                message: format!("runtime: {e}"),
            })?;
        Ok(Self {
            runtime,
            writer: None,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Transport for WebsocketTransport {
    fn connect(&mut self, url: &str, headers: &[(String, String)], mut sink: EventSink) -> Result<()> {
        let mut request = url
            .into_client_request()
            .map_err(|e| VoicelinkError::Transport {
                message: format!("bad url: {e}"),
            })?;
        for (name, value) in headers {
            let value = HeaderValue::from_str(value).map_err(|e| VoicelinkError::Transport {
                message: format!("bad header {name}: {e}"),
            })?;
            let name: tokio_tungstenite::tungstenite::http::header::HeaderName =
                name.parse().map_err(|e| VoicelinkError::Transport {
                    message: format!("bad header name {name}: {e}"),
                })?;
            request.headers_mut().insert(name, value);
        }

        let stream = self
            .runtime
            .block_on(connect_async(request))
            .map_err(|e| VoicelinkError::Transport {
                message: format!("connect: {e}"),
            })?
            .0;
        let (mut write, mut read) = stream.split();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        self.writer = Some(tx);
        self.connected.store(true, Ordering::SeqCst);

        self.runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let connected = Arc::clone(&self.connected);
        self.runtime.spawn(async move {
            while let Some(item) = read.next().await {
                match item {
                    Ok(Message::Text(text)) => sink(TransportEvent::Text(text)),
                    Ok(Message::Binary(data)) => sink(TransportEvent::Binary(data)),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            sink(TransportEvent::Disconnected);
        });

        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        let Some(writer) = self.writer.as_ref() else {
            return Err(VoicelinkError::Transport {
                message: "not connected".to_string(),
            });
        };
        writer
            .send(Message::Text(text.to_string()))
            .map_err(|_| VoicelinkError::Transport {
                message: "send failed".to_string(),
            })
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_ref() else {
            return Err(VoicelinkError::Transport {
                message: "not connected".to_string(),
            });
        };
        writer
            .send(Message::Binary(data.to_vec()))
            .map_err(|_| VoicelinkError::Transport {
                message: "send failed".to_string(),
            })
    }

    fn close(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.send(Message::Close(None));
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::{MockTransport, MockTransportFactory};
    use serde_json::Value;

    fn test_config() -> WebsocketConfig {
        WebsocketConfig {
            url: "wss://voice.example.com/stream".to_string(),
            access_token: "token".to_string(),
            device_id: "aa:bb:cc:dd:ee:ff".to_string(),
            client_id: "client-1".to_string(),
            frame_duration_ms: 60,
            hello_timeout: Duration::from_millis(50),
            liveness_timeout: Duration::from_secs(120),
        }
    }

    fn server_hello(rate: u32) -> TransportEvent {
        TransportEvent::Text(format!(
            r#"{{"type":"hello","transport":"websocket","session_id":"s-1",
                "audio_params":{{"sample_rate":{rate}}}}}"#
        ))
    }

    fn protocol_with(
        transport: MockTransport,
        events: ProtocolEvents,
    ) -> WebsocketProtocol {
        let factory = MockTransportFactory::new();
        factory.push(transport);
        let mut protocol = WebsocketProtocol::new(test_config(), Arc::new(factory));
        protocol.set_events(events);
        protocol
    }

    #[test]
    fn test_open_negotiates_sample_rate_and_session() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(server_hello(24000));

        let mut protocol = protocol_with(transport, ProtocolEvents::default());
        protocol.open_audio_channel().unwrap();

        assert!(protocol.is_audio_channel_opened());
        assert_eq!(protocol.server_sample_rate(), 24000);
        assert_eq!(protocol.session_id().as_deref(), Some("s-1"));

        // First outbound text is the client hello with fixed audio params.
        let sent = handle.sent_texts();
        let hello: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["transport"], "websocket");
        assert_eq!(hello["audio_params"]["sample_rate"], 16000);
    }

    #[test]
    fn test_open_times_out_without_server_hello() {
        let (transport, _handle) = MockTransport::new();
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let mut protocol = protocol_with(
            transport,
            ProtocolEvents {
                on_network_error: Box::new(move |message| {
                    sink.lock().unwrap().push(message);
                }),
                ..Default::default()
            },
        );

        let result = protocol.open_audio_channel();
        assert!(matches!(
            result,
            Err(VoicelinkError::ProtocolTimeout { .. })
        ));
        assert!(!protocol.is_audio_channel_opened());
        assert_eq!(*errors.lock().unwrap(), vec!["server timeout".to_string()]);
    }

    #[test]
    fn test_open_reports_server_not_found_on_connect_failure() {
        let (transport, _handle) = MockTransport::refusing();
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let mut protocol = protocol_with(
            transport,
            ProtocolEvents {
                on_network_error: Box::new(move |message| {
                    sink.lock().unwrap().push(message);
                }),
                ..Default::default()
            },
        );

        assert!(protocol.open_audio_channel().is_err());
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["server not found".to_string()]
        );
    }

    #[test]
    fn test_mismatched_transport_kind_leaves_channel_unopened() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(TransportEvent::Text(
            r#"{"type":"hello","transport":"udp","audio_params":{"sample_rate":24000}}"#
                .to_string(),
        ));

        let mut protocol = protocol_with(transport, ProtocolEvents::default());
        assert!(matches!(
            protocol.open_audio_channel(),
            Err(VoicelinkError::ProtocolTimeout { .. })
        ));
        assert!(!protocol.is_audio_channel_opened());
        // The bogus hello must not have overwritten the default rate.
        assert_eq!(protocol.server_sample_rate(), 16000);
    }

    #[test]
    fn test_hello_without_audio_params_keeps_default_rate() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(TransportEvent::Text(
            r#"{"type":"hello","transport":"websocket"}"#.to_string(),
        ));

        let mut protocol = protocol_with(transport, ProtocolEvents::default());
        protocol.open_audio_channel().unwrap();

        assert!(protocol.is_audio_channel_opened());
        assert_eq!(protocol.server_sample_rate(), 16000);
    }

    #[test]
    fn test_sends_are_noops_while_closed() {
        let (transport, handle) = MockTransport::new();
        let mut protocol = protocol_with(transport, ProtocolEvents::default());

        protocol.send_audio(&[1, 2, 3]);
        protocol.send_start_listening(ListeningMode::AutoStop);
        protocol.send_stop_listening();

        assert!(handle.sent_texts().is_empty());
        assert!(handle.sent_binaries().is_empty());
    }

    #[test]
    fn test_control_messages_echo_session_id() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(server_hello(16000));

        let mut protocol = protocol_with(transport, ProtocolEvents::default());
        protocol.open_audio_channel().unwrap();
        protocol.send_start_listening(ListeningMode::ManualStop);

        let sent = handle.sent_texts();
        let listen: Value = serde_json::from_str(&sent[1]).unwrap();
        assert_eq!(listen["type"], "listen");
        assert_eq!(listen["state"], "start");
        assert_eq!(listen["mode"], "manual");
        assert_eq!(listen["session_id"], "s-1");
    }

    #[test]
    fn test_incoming_binary_routes_to_audio_callback() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(server_hello(16000));

        let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        let mut protocol = protocol_with(
            transport,
            ProtocolEvents {
                on_incoming_audio: Box::new(move |frame| {
                    sink.lock().unwrap().push(frame);
                }),
                ..Default::default()
            },
        );
        protocol.open_audio_channel().unwrap();

        handle.inject(TransportEvent::Binary(vec![7, 8, 9]));
        assert_eq!(*frames.lock().unwrap(), vec![vec![7, 8, 9]]);
    }

    #[test]
    fn test_control_messages_route_to_message_callback() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(server_hello(16000));

        let messages: Arc<Mutex<Vec<ServerMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let mut protocol = protocol_with(
            transport,
            ProtocolEvents {
                on_incoming_message: Box::new(move |message| {
                    sink.lock().unwrap().push(message);
                }),
                ..Default::default()
            },
        );
        protocol.open_audio_channel().unwrap();

        handle.inject(TransportEvent::Text(
            r#"{"type":"stt","text":"turn on the lamp"}"#.to_string(),
        ));
        handle.inject(TransportEvent::Text(r#"{"type":"mystery"}"#.to_string()));
        handle.inject(TransportEvent::Text(r#"{"no_type":true}"#.to_string()));

        // Only the recognized message reaches the callback.
        let received = messages.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0],
            ServerMessage::Stt {
                text: "turn on the lamp".to_string()
            }
        );
    }

    #[test]
    fn test_channel_closed_fires_exactly_once() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(server_hello(16000));

        let closed = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&closed);
        let mut protocol = protocol_with(
            transport,
            ProtocolEvents {
                on_channel_closed: Box::new(move || {
                    *counter.lock().unwrap() += 1;
                }),
                ..Default::default()
            },
        );
        protocol.open_audio_channel().unwrap();

        handle.disconnect();
        protocol.close_audio_channel(); // already closed: no second event
        assert_eq!(*closed.lock().unwrap(), 1);
    }

    #[test]
    fn test_text_send_failure_surfaces_server_error() {
        let (transport, handle) = MockTransport::new();
        handle.reply_to_next_text(server_hello(16000));

        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let mut protocol = protocol_with(
            transport,
            ProtocolEvents {
                on_network_error: Box::new(move |message| {
                    sink.lock().unwrap().push(message);
                }),
                ..Default::default()
            },
        );
        protocol.open_audio_channel().unwrap();

        handle.make_text_sends_fail();
        protocol.send_stop_listening();

        assert_eq!(*errors.lock().unwrap(), vec!["server error".to_string()]);
        assert!(!protocol.is_audio_channel_opened());
    }
}
