//! Stream engine
//!
//! Runs the lifecycle router on a single task. Caller commands, socket
//! events and heartbeat ticks all go through one select loop, so the router
//! never needs a lock and handlers never interleave.

use crate::exchanges::okex::{self, KlineInterval};
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::metrics::{MetricsSnapshot, StreamMetrics};
use crate::log_ws;
use crate::ws::connection::{EndpointId, EventReceiver};
use crate::ws::registry::SubscriptionInfo;
use crate::ws::router::{Decoder, Router, RouterConfig};
use crate::ws::subscription::{MessageHandler, SubscribeRequest};
use crate::ws::transport::{Connector, TungsteniteConnector};
use crate::{Result, StreamError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::Level;

/// Queued caller commands before `send` waits
const COMMAND_CAPACITY: usize = 256;

enum Command {
    Subscribe {
        request: SubscribeRequest,
        reply: oneshot::Sender<Result<EndpointId>>,
    },
    Unsubscribe {
        endpoint: EndpointId,
        reply: oneshot::Sender<bool>,
    },
    Subscriptions {
        reply: oneshot::Sender<HashMap<EndpointId, SubscriptionInfo>>,
    },
    SetReconnect(bool),
    SetVerbose(bool),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Owns the router and drives it
pub struct StreamEngine<C: Connector = TungsteniteConnector> {
    router: Router<C>,
    events: EventReceiver,
    commands: mpsc::Receiver<Command>,
}

impl StreamEngine<TungsteniteConnector> {
    /// Engine connecting to the configured endpoint
    ///
    /// # Errors
    /// `StreamError::WebSocket` if the configured URL is unusable.
    pub fn from_config(config: &StreamConfig) -> Result<(Self, StreamClient)> {
        let connector = TungsteniteConnector::new(&config.url, config.connect_timeout())?;
        Ok(Self::new(connector, config.router_config()))
    }
}

impl<C: Connector> StreamEngine<C> {
    /// Create an engine and the client handle that talks to it
    pub fn new(connector: C, config: RouterConfig) -> (Self, StreamClient) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let metrics = Arc::new(StreamMetrics::new());

        let engine = Self {
            router: Router::new(connector, events_tx, config, metrics.clone()),
            events: events_rx,
            commands: commands_rx,
        };
        let client = StreamClient {
            commands: commands_tx,
            metrics,
        };
        (engine, client)
    }

    /// Replace the payload decoder
    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.router = self.router.with_decoder(decoder);
        self
    }

    /// Run on a new task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until shut down or every client is dropped
    pub async fn run(mut self) {
        log_ws!(Level::INFO, "Stream engine started");

        loop {
            let deadline = self.router.heartbeat_deadline();

            tokio::select! {
                biased;

                _ = heartbeat_due(deadline) => {
                    self.router.on_heartbeat_tick();
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.drain_events();
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.router.shutdown();
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.router.handle_event(event),
            }
        }

        log_ws!(Level::INFO, "Stream engine stopped");
    }

    /// Apply the events already queued, so a command sees every event
    /// reported before it. Bounded by the queue length at call time.
    fn drain_events(&mut self) {
        for _ in 0..self.events.len() {
            match self.events.try_recv() {
                Ok(event) => self.router.handle_event(event),
                Err(_) => break,
            }
        }
    }

    /// Returns false once the engine should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe { request, reply } => {
                let _ = reply.send(self.router.subscribe(request));
            }
            Command::Unsubscribe { endpoint, reply } => {
                let _ = reply.send(self.router.unsubscribe(&endpoint));
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.router.subscriptions());
            }
            Command::SetReconnect(reconnect) => self.router.set_reconnect(reconnect),
            Command::SetVerbose(verbose) => self.router.set_verbose(verbose),
            Command::Shutdown { reply } => {
                self.router.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

async fn heartbeat_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Caller-facing handle on a running engine
#[derive(Clone)]
pub struct StreamClient {
    commands: mpsc::Sender<Command>,
    metrics: Arc<StreamMetrics>,
}

impl StreamClient {
    /// Open a subscription, returns its identity
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<EndpointId> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscribe { request, reply }).await?;
        response.await.map_err(|_| StreamError::EngineStopped)?
    }

    /// Kline subscription for one or several symbols
    pub async fn candlesticks<S: AsRef<str>>(
        &self,
        symbols: &[S],
        interval: KlineInterval,
        handler: MessageHandler,
    ) -> Result<EndpointId> {
        let request = okex::candlesticks(symbols, interval, handler)?;
        self.subscribe(request).await
    }

    /// Terminate a subscription without reconnecting
    pub async fn unsubscribe(&self, endpoint: &EndpointId) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Unsubscribe {
            endpoint: endpoint.clone(),
            reply,
        })
        .await?;
        response.await.map_err(|_| StreamError::EngineStopped)
    }

    /// Copy of every open connection
    pub async fn subscriptions(&self) -> Result<HashMap<EndpointId, SubscriptionInfo>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscriptions { reply }).await?;
        response.await.map_err(|_| StreamError::EngineStopped)
    }

    /// Global reconnect policy
    pub async fn set_reconnect(&self, reconnect: bool) -> Result<()> {
        self.send(Command::SetReconnect(reconnect)).await
    }

    /// Chatty per-subscription logging
    pub async fn set_verbose(&self, verbose: bool) -> Result<()> {
        self.send(Command::SetVerbose(verbose)).await
    }

    /// Terminate everything and stop the engine
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        response.await.map_err(|_| StreamError::EngineStopped)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| StreamError::EngineStopped)
    }
}
