//! Transport seam for the streaming protocol.
//!
//! The protocol layer only ever speaks to this trait: open a connection,
//! push text/binary payloads, receive events through a sink. Concrete
//! transports (websocket, future MQTT+UDP) are produced by the board's
//! factory; the scriptable mock lives here for tests.

use crate::error::{Result, VoicelinkError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Inbound transport events, delivered on the transport's receive context.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    Binary(Vec<u8>),
    Disconnected,
}

/// Receives transport events. Invoked from the transport's own thread;
/// implementations must hand work off rather than block.
pub type EventSink = Box<dyn FnMut(TransportEvent) + Send>;

pub trait Transport: Send {
    /// Establishes the connection and installs the event sink.
    fn connect(&mut self, url: &str, headers: &[(String, String)], sink: EventSink) -> Result<()>;

    fn send_text(&mut self, text: &str) -> Result<()>;
    fn send_binary(&mut self, data: &[u8]) -> Result<()>;

    fn close(&mut self);
    fn is_connected(&self) -> bool;
}

/// Creates one transport per channel open.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockInner {
    connected: bool,
    fail_connect: bool,
    text_send_fails: bool,
    sent_texts: Vec<String>,
    sent_binaries: Vec<Vec<u8>>,
    sink: Option<EventSink>,
    /// Events delivered one-per-outbound-text, front first. Lets a test
    /// script "server replies to the hello".
    replies_to_text: VecDeque<TransportEvent>,
}

/// Scriptable in-memory transport.
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

/// Inspection/injection handle that outlives the boxed transport.
#[derive(Clone)]
pub struct MockTransportHandle {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let inner = Arc::new(Mutex::new(MockInner::default()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MockTransportHandle { inner },
        )
    }

    /// Transport whose connect always fails ("server not found").
    pub fn refusing() -> (Self, MockTransportHandle) {
        let (transport, handle) = Self::new();
        handle.lock().fail_connect = true;
        (transport, handle)
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, _url: &str, _headers: &[(String, String)], sink: EventSink) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.fail_connect {
            return Err(VoicelinkError::Transport {
                message: "connection refused".to_string(),
            });
        }
        inner.connected = true;
        inner.sink = Some(sink);
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        let (reply, mut sink) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.connected {
                return Err(VoicelinkError::Transport {
                    message: "not connected".to_string(),
                });
            }
            if inner.text_send_fails {
                return Err(VoicelinkError::Transport {
                    message: "send failed".to_string(),
                });
            }
            inner.sent_texts.push(text.to_string());
            (inner.replies_to_text.pop_front(), inner.sink.take())
        };

        if let (Some(event), Some(sink_fn)) = (reply, sink.as_mut()) {
            sink_fn(event);
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.sink.is_none() {
            inner.sink = sink;
        }
        Ok(())
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.connected {
            return Err(VoicelinkError::Transport {
                message: "not connected".to_string(),
            });
        }
        inner.sent_binaries.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connected = false;
        inner.sink = None;
    }

    fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connected
    }
}

impl MockTransportHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues an event to be delivered right after the next outbound text.
    pub fn reply_to_next_text(&self, event: TransportEvent) {
        self.lock().replies_to_text.push_back(event);
    }

    /// Delivers an event immediately, as the server pushing data would.
    pub fn inject(&self, event: TransportEvent) {
        let mut sink = self.lock().sink.take();
        if let Some(sink_fn) = sink.as_mut() {
            sink_fn(event);
        }
        let mut inner = self.lock();
        if inner.sink.is_none() {
            inner.sink = sink;
        }
    }

    /// Simulates the remote end dropping the connection.
    pub fn disconnect(&self) {
        self.lock().connected = false;
        self.inject(TransportEvent::Disconnected);
    }

    pub fn make_text_sends_fail(&self) {
        self.lock().text_send_fails = true;
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.lock().sent_texts.clone()
    }

    pub fn sent_binaries(&self) -> Vec<Vec<u8>> {
        self.lock().sent_binaries.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

/// Factory handing out pre-scripted mock transports in order.
pub struct MockTransportFactory {
    prepared: Mutex<VecDeque<MockTransport>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self {
            prepared: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, transport: MockTransport) {
        self.prepared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(transport);
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Box<dyn Transport> {
        match self
            .prepared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            Some(transport) => Box::new(transport),
            // Out of scripted transports: behave like an unreachable server.
            None => Box::new(MockTransport::refusing().0),
        }
    }
}
