//! Test utilities: recording transports and handlers
//!
//! `MockConnector` hands out transports that record every frame, ping and
//! terminate instead of touching the network. Clones share one record.
//! `capture_logs` collects what the tracing macros emit during a closure.

use crate::ws::connection::{
    ConnectionEvent, ConnectionId, EventSender, Transport, TransportError, TransportEvent,
};
use crate::ws::subscription::MessageHandler;
use crate::ws::transport::Connector;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct SocketRecord {
    sent: Vec<String>,
    pings: usize,
    terminations: usize,
}

#[derive(Default)]
struct MockState {
    sockets: HashMap<ConnectionId, SocketRecord>,
    connects: Vec<(ConnectionId, Duration)>,
    events: Option<EventSender>,
    fail_connect: bool,
    fail_sends: bool,
}

/// Connector whose transports only record what they are asked to do
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for a connection created outside `connect`
    pub fn transport(&self, id: ConnectionId) -> Box<dyn Transport> {
        self.state.lock().sockets.entry(id).or_default();
        Box::new(MockTransport {
            id,
            state: self.state.clone(),
        })
    }

    /// Make the next `connect` calls fail
    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Make every send and ping fail
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Connection ids in connect order
    pub fn connected(&self) -> Vec<ConnectionId> {
        self.state.lock().connects.iter().map(|(id, _)| *id).collect()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn delay_of(&self, id: ConnectionId) -> Option<Duration> {
        self.state
            .lock()
            .connects
            .iter()
            .find(|(cid, _)| *cid == id)
            .map(|(_, delay)| *delay)
    }

    pub fn sent(&self, id: ConnectionId) -> Vec<String> {
        self.state
            .lock()
            .sockets
            .get(&id)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    pub fn pings(&self, id: ConnectionId) -> usize {
        self.state.lock().sockets.get(&id).map(|s| s.pings).unwrap_or(0)
    }

    pub fn terminations(&self, id: ConnectionId) -> usize {
        self.state
            .lock()
            .sockets
            .get(&id)
            .map(|s| s.terminations)
            .unwrap_or(0)
    }

    /// Push a transport event as if the socket task had produced it
    pub fn emit(&self, id: ConnectionId, event: TransportEvent) {
        if let Some(events) = self.state.lock().events.as_ref() {
            let _ = events.send(ConnectionEvent::new(id, event));
        }
    }
}

impl Connector for MockConnector {
    fn connect(
        &mut self,
        id: ConnectionId,
        delay: Duration,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, TransportError> {
        {
            let mut state = self.state.lock();
            if state.fail_connect {
                return Err(TransportError::ConnectionFailed("mock refused".to_string()));
            }
            state.connects.push((id, delay));
            state.events = Some(events);
        }
        Ok(self.transport(id))
    }
}

struct MockTransport {
    id: ConnectionId,
    state: Arc<Mutex<MockState>>,
}

impl Transport for MockTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(TransportError::SendFailed("mock send failure".to_string()));
        }
        state.sockets.entry(self.id).or_default().sent.push(text);
        Ok(())
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(TransportError::SendFailed("mock send failure".to_string()));
        }
        state.sockets.entry(self.id).or_default().pings += 1;
        Ok(())
    }

    fn terminate(&mut self) {
        self.state.lock().sockets.entry(self.id).or_default().terminations += 1;
    }
}

/// Handler that drops every payload
pub fn noop_handler() -> MessageHandler {
    Arc::new(|_| {})
}

/// Handler that keeps every payload it receives
pub fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<Value>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler: MessageHandler = Arc::new(move |value| sink.lock().push(value));
    (handler, received)
}

#[derive(Clone, Default)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return the formatted output
pub fn capture_logs(f: impl FnOnce()) -> String {
    let sink = LogSink::default();
    let writer = sink.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    tracing::subscriber::with_default(subscriber, f);

    let bytes = sink.0.lock();
    String::from_utf8_lossy(&bytes).into_owned()
}
