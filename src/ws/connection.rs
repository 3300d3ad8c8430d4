//! Feed connection with identity, liveness and reconnect descriptor
//!
//! A `Connection` is one physical socket attempt. The socket itself lives
//! behind a [`Transport`] handle; everything the router needs to reason about
//! (state, liveness, how to recreate it) lives here.
//! - Never reused once closed (a reconnect builds a fresh instance)
//! - Liveness flag flipped by the heartbeat sweep and by pongs
//! - No I/O here, sends are queued on the transport

use crate::ws::subscription::SubscribeRequest;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Per-instance connection identifier
///
/// Unlike [`EndpointId`], this changes on every reconnect so late events from
/// a dead socket can never touch its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Subscription identity: a channel name or a composite topic-set hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket handshake in progress
    Connecting,
    /// Connected and ready
    Open,
    /// Terminated locally, close event not delivered yet
    Closing,
    /// Terminal
    Closed,
}

/// Errors that can occur on a feed socket
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Raw socket event, as reported by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake done, socket is ready
    Opened,
    /// Text or binary frame payload
    Message(Bytes),
    /// Liveness acknowledgment (pong control frame)
    Pong,
    /// Transport failure, always followed by `Closed`
    Error(TransportError),
    /// Terminal event
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// Transport event tagged with the connection instance that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub id: ConnectionId,
    pub event: TransportEvent,
}

impl ConnectionEvent {
    pub fn new(id: ConnectionId, event: TransportEvent) -> Self {
        Self { id, event }
    }
}

/// Channel every transport reports its events on
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Handle on a live socket
///
/// Implementations must not block: frames are queued and written by whatever
/// task owns the socket.
pub trait Transport: Send {
    /// Queue a text frame
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Queue a ping control frame
    fn ping(&mut self) -> Result<(), TransportError>;

    /// Drop the socket without a close handshake. Must be idempotent.
    fn terminate(&mut self);
}

/// One physical feed connection
pub struct Connection {
    id: ConnectionId,
    endpoint: EndpointId,
    state: ConnectionState,
    is_alive: bool,
    /// Global reconnect policy captured when the connection was created
    reconnect_enabled: bool,
    /// Everything needed to build an equivalent connection
    request: SubscribeRequest,
    transport: Box<dyn Transport>,
    opened_at: Option<Instant>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        endpoint: EndpointId,
        request: SubscribeRequest,
        transport: Box<dyn Transport>,
        reconnect_enabled: bool,
    ) -> Self {
        Self {
            id,
            endpoint,
            state: ConnectionState::Connecting,
            is_alive: false,
            reconnect_enabled,
            request,
            transport,
            opened_at: None,
        }
    }

    #[inline(always)]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline(always)]
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    #[inline(always)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    #[inline(always)]
    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    #[inline]
    pub fn set_alive(&mut self, alive: bool) {
        self.is_alive = alive;
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect_enabled
    }

    pub fn disable_reconnect(&mut self) {
        self.reconnect_enabled = false;
    }

    /// Reconnect descriptor
    pub fn request(&self) -> &SubscribeRequest {
        &self.request
    }

    pub fn into_request(self) -> SubscribeRequest {
        self.request
    }

    /// Constituent channels, present only for multiplexed connections
    pub fn streams(&self) -> Option<&[String]> {
        self.request.topics().streams()
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Transport reported readiness
    pub fn mark_open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
            self.opened_at = Some(Instant::now());
        }
        self.is_alive = true;
    }

    /// Transport reported closure
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Send a text directive
    pub fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.state != ConnectionState::Open {
            return Err(TransportError::NotConnected);
        }
        self.transport.send_text(text)
    }

    /// Send a liveness probe
    pub fn ping(&mut self) -> Result<(), TransportError> {
        if self.state != ConnectionState::Open {
            return Err(TransportError::NotConnected);
        }
        self.transport.ping()
    }

    /// Force the socket down without waiting for a close handshake
    ///
    /// Safe on an already closing or closed connection.
    pub fn terminate(&mut self) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                self.transport.terminate();
                self.state = ConnectionState::Closing;
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("is_alive", &self.is_alive)
            .field("reconnect_enabled", &self.reconnect_enabled)
            .finish()
    }
}
