//! tokio-tungstenite transport
//!
//! Every connection gets its own socket task. The task reports
//! `Opened`/`Message`/`Pong`/`Error`/`Closed` on the shared event channel and
//! takes frames to write from a per-connection command channel, so the
//! router never awaits on a socket.
//! - TCP_NODELAY on plain sockets
//! - Terminate drops the socket without a close handshake
//! - Exactly one `Closed` per task

use crate::ws::connection::{
    ConnectionEvent, ConnectionId, EventSender, Transport, TransportError, TransportEvent,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket went away without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Creates transports for new connection attempts
pub trait Connector: Send + 'static {
    /// Start connecting after `delay`; events for `id` go to `events`
    fn connect(
        &mut self,
        id: ConnectionId,
        delay: Duration,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector opening real WebSocket sockets to one endpoint
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    url: String,
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    /// # Errors
    /// `TransportError::ConnectionFailed` if `url` is not a ws:// or wss:// URL.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::ConnectionFailed(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        }

        Ok(Self {
            url: url.to_string(),
            connect_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for TungsteniteConnector {
    fn connect(
        &mut self,
        id: ConnectionId,
        delay: Duration,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_socket(
            self.url.clone(),
            id,
            delay,
            self.connect_timeout,
            commands_rx,
            events,
        ));

        Ok(Box::new(TungsteniteTransport {
            commands: commands_tx,
            terminated: false,
        }))
    }
}

enum SocketCommand {
    Text(String),
    Ping,
    Terminate,
}

/// Handle on a socket task
struct TungsteniteTransport {
    commands: mpsc::UnboundedSender<SocketCommand>,
    terminated: bool,
}

impl Transport for TungsteniteTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.commands
            .send(SocketCommand::Text(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        self.commands
            .send(SocketCommand::Ping)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            let _ = self.commands.send(SocketCommand::Terminate);
        }
    }
}

/// Socket task: connect, pump frames both ways, report the close
async fn run_socket(
    url: String,
    id: ConnectionId,
    delay: Duration,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: EventSender,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(ConnectionEvent::new(id, event));
    };

    let established = tokio::select! {
        result = establish(&url, delay, connect_timeout) => result,
        _ = until_terminated(&mut commands) => {
            emit(TransportEvent::Closed { code: None, reason: Some("terminated".to_string()) });
            return;
        }
    };

    let stream = match established {
        Ok(stream) => stream,
        Err(e) => {
            emit(TransportEvent::Error(e));
            emit(TransportEvent::Closed { code: None, reason: None });
            return;
        }
    };

    if let MaybeTlsStream::Plain(tcp) = stream.get_ref() {
        let _ = tcp.set_nodelay(true);
    }
    emit(TransportEvent::Opened);

    let (mut sink, mut source) = stream.split();
    let mut close_frame: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Text(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        emit(TransportEvent::Error(TransportError::SendFailed(e.to_string())));
                        break;
                    }
                }
                Some(SocketCommand::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                        emit(TransportEvent::Error(TransportError::SendFailed(e.to_string())));
                        break;
                    }
                }
                Some(SocketCommand::Terminate) | None => {
                    // Dropping both halves closes the TCP stream with no handshake
                    emit(TransportEvent::Closed { code: Some(ABNORMAL_CLOSURE), reason: None });
                    return;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportEvent::Message(Bytes::copy_from_slice(text.as_bytes())));
                }
                Some(Ok(Message::Binary(data))) => emit(TransportEvent::Message(data)),
                Some(Ok(Message::Pong(_))) => emit(TransportEvent::Pong),
                Some(Ok(Message::Close(frame))) => {
                    close_frame = frame.map(|f| (u16::from(f.code), f.reason.as_str().to_string()));
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(TransportEvent::Error(TransportError::ReceiveFailed(e.to_string())));
                    break;
                }
                None => break,
            },
        }
    }

    let (code, reason) = match close_frame {
        Some((code, reason)) => (Some(code), Some(reason).filter(|r| !r.is_empty())),
        None => (Some(ABNORMAL_CLOSURE), None),
    };
    emit(TransportEvent::Closed { code, reason });
}

async fn establish(
    url: &str,
    delay: Duration,
    connect_timeout: Duration,
) -> Result<WsStream, TransportError> {
    if !delay.is_zero() {
        sleep(delay).await;
    }

    let (stream, _) = timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    Ok(stream)
}

/// Resolves once the connection is terminated or its handle dropped
async fn until_terminated(commands: &mut mpsc::UnboundedReceiver<SocketCommand>) {
    loop {
        match commands.recv().await {
            Some(SocketCommand::Terminate) | None => return,
            Some(_) => {}
        }
    }
}
