//! Lifecycle router: raw socket events to registry and heartbeat actions
//!
//! The router owns the registry, the heartbeat supervisor and every
//! connection still handshaking. It is plain synchronous state: whoever
//! drives it (the engine task, or a test) feeds it one event at a time, so
//! each handler finishes its registry mutation and supervisor start/stop
//! decision before the next event is looked at.

use crate::infrastructure::metrics::StreamMetrics;
use crate::log_ws;
use crate::ws::connection::{
    Connection, ConnectionEvent, ConnectionId, EndpointId, EventSender, TransportError,
    TransportEvent,
};
use crate::ws::heartbeat::{HeartbeatSupervisor, SweepReport};
use crate::ws::registry::{SubscriptionInfo, SubscriptionRegistry};
use crate::ws::subscription::{OpenedAction, SubscribeRequest, Topics};
use crate::ws::transport::Connector;
use crate::{DecodeError, Result, StreamError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

/// Turns a raw payload into structured data
pub type Decoder = fn(&[u8]) -> std::result::Result<Value, DecodeError>;

/// Decode a JSON payload with simd-json
pub fn decode_json(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    let mut buf = payload.to_vec();
    simd_json::serde::from_slice(&mut buf).map_err(|e| DecodeError(e.to_string()))
}

/// Runtime toggles shared by every subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Global reconnect switch
    pub reconnect: bool,
    /// Emit chatty per-subscription logs
    pub verbose: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            reconnect: true,
            verbose: false,
        }
    }
}

/// Router settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub policy: Policy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: crate::ws::heartbeat::DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            policy: Policy::default(),
        }
    }
}

/// Lifecycle callback router
pub struct Router<C: Connector> {
    connector: C,
    events: EventSender,
    registry: SubscriptionRegistry,
    /// Connections created but not yet open
    pending: HashMap<ConnectionId, Connection>,
    /// Identity of every tracked instance, pending or registered
    routes: HashMap<ConnectionId, EndpointId>,
    supervisor: HeartbeatSupervisor,
    policy: Policy,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    decoder: Decoder,
    metrics: Arc<StreamMetrics>,
    next_id: u64,
}

impl<C: Connector> Router<C> {
    pub fn new(
        connector: C,
        events: EventSender,
        config: RouterConfig,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            connector,
            events,
            registry: SubscriptionRegistry::new(),
            pending: HashMap::new(),
            routes: HashMap::new(),
            supervisor: HeartbeatSupervisor::new(config.heartbeat_interval),
            policy: config.policy,
            reconnect_delay: config.reconnect_delay,
            max_reconnect_delay: config.max_reconnect_delay,
            decoder: decode_json,
            metrics,
            next_id: 0,
        }
    }

    /// Replace the payload decoder
    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &HeartbeatSupervisor {
        &self.supervisor
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn set_reconnect(&mut self, reconnect: bool) {
        self.policy.reconnect = reconnect;
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.policy.verbose = verbose;
    }

    /// Connections still handshaking
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Copy of every open connection
    pub fn subscriptions(&self) -> HashMap<EndpointId, SubscriptionInfo> {
        self.registry.snapshot()
    }

    /// Next heartbeat sweep, `None` while nothing is open
    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.supervisor.deadline()
    }

    /// Open a new connection for `request`
    ///
    /// Returns the connection identity. The connection is tracked as pending
    /// until the transport reports it open.
    ///
    /// # Errors
    /// `StreamError::Config` if the identity is already open or connecting,
    /// `StreamError::WebSocket` if the connector refuses.
    pub fn subscribe(&mut self, request: SubscribeRequest) -> Result<EndpointId> {
        let endpoint = request.topics().endpoint_id();
        if self.is_tracked(&endpoint) {
            return Err(StreamError::Config(format!("already subscribed to {}", endpoint)));
        }

        if self.policy.verbose {
            match request.topics() {
                Topics::Single(topic) => log_ws!(Level::INFO, "Subscribed to {}", topic),
                Topics::Combined(_) => log_ws!(
                    Level::INFO,
                    "CombinedStream: Subscribed to [{}] {}",
                    endpoint,
                    request.topics().composite_key()
                ),
            }
        }

        let id = ConnectionId(self.next_id);
        let delay = request.backoff(self.reconnect_delay, self.max_reconnect_delay);
        let transport = self.connector.connect(id, delay, self.events.clone())?;
        self.next_id += 1;

        let conn = Connection::new(id, endpoint.clone(), request, transport, self.policy.reconnect);
        self.routes.insert(id, endpoint.clone());
        self.pending.insert(id, conn);
        Ok(endpoint)
    }

    /// Stop a subscription for good: no reconnect, socket terminated
    ///
    /// Returns false if nothing is tracked under `endpoint`.
    pub fn unsubscribe(&mut self, endpoint: &EndpointId) -> bool {
        let mut found = false;

        if let Some(conn) = self.registry.get_mut(endpoint) {
            conn.disable_reconnect();
            conn.terminate();
            found = true;
        }
        for conn in self.pending.values_mut().filter(|c| c.endpoint() == endpoint) {
            conn.disable_reconnect();
            conn.terminate();
            found = true;
        }

        found
    }

    /// Terminate every connection with reconnect disabled
    pub fn shutdown(&mut self) {
        self.policy.reconnect = false;
        for conn in self.registry.connections_mut().chain(self.pending.values_mut()) {
            conn.disable_reconnect();
            conn.terminate();
        }
        log_ws!(
            Level::INFO,
            "Stream router shut down, {} open, {} connecting",
            self.registry.len(),
            self.pending.len()
        );
    }

    /// Process one transport event
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent { id, event } = event;
        match event {
            TransportEvent::Opened => self.on_open(id),
            TransportEvent::Message(payload) => self.on_message(id, &payload),
            TransportEvent::Pong => self.on_pong(id),
            TransportEvent::Error(err) => self.on_error(id, &err),
            TransportEvent::Closed { code, reason } => self.on_close(id, code, reason),
        }
    }

    /// Run one heartbeat sweep
    pub fn on_heartbeat_tick(&mut self) -> SweepReport {
        let report = self.supervisor.sweep(&mut self.registry);
        self.metrics.record_pings(report.pinged as u64);
        for endpoint in &report.terminated {
            self.metrics.record_heartbeat_termination();
            if self.policy.verbose {
                log_ws!(Level::INFO, "Terminating inactive/broken WebSocket: {}", endpoint);
            }
        }
        report
    }

    fn is_tracked(&self, endpoint: &EndpointId) -> bool {
        self.registry.contains(endpoint) || self.routes.values().any(|e| e == endpoint)
    }

    fn on_open(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.pending.remove(&id) else {
            log_ws!(Level::DEBUG, "Open event for untracked connection {}", id);
            return;
        };

        conn.mark_open();
        if self.registry.is_empty() {
            self.supervisor.start();
        }

        let endpoint = conn.endpoint().clone();
        let action = conn.request().opened_action().cloned();

        if let Err((err, mut rejected)) = self.registry.insert(conn) {
            log_ws!(Level::ERROR, "{}; dropping connection {}", err, id);
            rejected.disable_reconnect();
            rejected.terminate();
            self.pending.insert(id, rejected);
            return;
        }
        self.metrics.record_open();

        match action {
            Some(OpenedAction::AddChannels) => self.add_channels(&endpoint),
            Some(OpenedAction::Notify(hook)) => hook(&endpoint),
            None => {}
        }
    }

    /// Replay `addChannel` for every channel on the connection
    fn add_channels(&mut self, endpoint: &EndpointId) {
        let Some(conn) = self.registry.get_mut(endpoint) else {
            return;
        };
        let frame = conn.request().topics().add_channel_frame();
        if let Err(e) = conn.send(frame) {
            log_ws!(Level::WARN, "addChannel failed on {}: {}", endpoint, e);
        }
    }

    fn on_message(&mut self, id: ConnectionId, payload: &[u8]) {
        let Some(handler) = self.connection(id).map(|c| c.request().handler().clone()) else {
            return;
        };

        match (self.decoder)(payload) {
            Ok(value) => {
                self.metrics.record_message();
                handler(value);
            }
            Err(e) => {
                self.metrics.record_decode_error();
                let endpoint = self.routes.get(&id).map(EndpointId::as_str).unwrap_or("?");
                let err = StreamError::from(e);
                log_ws!(Level::WARN, "Parse error on {}: {}", endpoint, err);
            }
        }
    }

    fn on_pong(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connection_mut(id) {
            conn.set_alive(true);
        }
    }

    fn on_error(&mut self, id: ConnectionId, err: &TransportError) {
        self.metrics.record_transport_error();
        let endpoint = self.routes.get(&id).map(EndpointId::as_str).unwrap_or("?");
        log_ws!(Level::WARN, "WebSocket error: {} ({})", endpoint, err);
    }

    fn on_close(&mut self, id: ConnectionId, code: Option<u16>, reason: Option<String>) {
        let Some(endpoint) = self.routes.remove(&id) else {
            log_ws!(Level::DEBUG, "Close event for untracked connection {}", id);
            return;
        };

        let mut conn = match self.registry.remove_instance(&endpoint, id) {
            Some(conn) => {
                if self.registry.is_empty() {
                    self.supervisor.stop();
                }
                conn
            }
            None => match self.pending.remove(&id) {
                Some(conn) => conn,
                None => return,
            },
        };
        let was_open = conn.opened_at().is_some();
        conn.mark_closed();
        self.metrics.record_close();

        log_ws!(
            Level::INFO,
            "WebSocket closed: {}{}{}",
            endpoint,
            code.map(|c| format!(" ({})", c)).unwrap_or_default(),
            reason.map(|r| format!(" {}", r)).unwrap_or_default()
        );

        if self.policy.reconnect && conn.reconnect_enabled() && conn.request().wants_reconnect() {
            log_ws!(Level::INFO, "WebSocket reconnecting: {}...", endpoint);
            let request = conn.into_request().next_attempt(was_open);
            match self.subscribe(request) {
                Ok(_) => self.metrics.record_reconnect(),
                Err(e) => {
                    self.metrics.record_reconnect_failure();
                    let err = StreamError::Reconnect(e.to_string());
                    log_ws!(Level::ERROR, "WebSocket reconnect error on {}: {}", endpoint, err);
                }
            }
        }
    }

    fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        let endpoint = self.routes.get(&id)?;
        match self.registry.get(endpoint) {
            Some(conn) if conn.id() == id => Some(conn),
            _ => self.pending.get(&id),
        }
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        let endpoint = self.routes.get(&id)?;
        let registered = self
            .registry
            .get(endpoint)
            .map(|conn| conn.id() == id)
            .unwrap_or(false);
        if registered {
            self.registry.get_mut(endpoint)
        } else {
            self.pending.get_mut(&id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{capture_logs, noop_handler, recording_handler, MockConnector};
    use crate::ws::connection::{ConnectionState, EventReceiver};
    use crate::ws::subscription::OpenedHook;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    fn router() -> (Router<MockConnector>, MockConnector, EventReceiver) {
        let connector = MockConnector::new();
        let (events, rx) = mpsc::unbounded_channel();
        let router = Router::new(
            connector.clone(),
            events,
            RouterConfig::default(),
            Arc::new(StreamMetrics::new()),
        );
        (router, connector, rx)
    }

    fn event(id: ConnectionId, event: TransportEvent) -> ConnectionEvent {
        ConnectionEvent::new(id, event)
    }

    fn closed() -> TransportEvent {
        TransportEvent::Closed { code: Some(1006), reason: None }
    }

    fn single(topic: &str) -> SubscribeRequest {
        SubscribeRequest::new(Topics::single(topic), noop_handler())
    }

    fn kline_set() -> Topics {
        Topics::combined([
            "ok_sub_spot_btc_usdt_kline_1min",
            "ok_sub_spot_eth_usdt_kline_1min",
            "ok_sub_spot_ltc_usdt_kline_1min",
        ])
        .unwrap()
    }

    #[test]
    fn test_subscribe_creates_pending_connection() {
        let (mut router, connector, _rx) = router();

        let endpoint = router.subscribe(single("a")).unwrap();

        assert_eq!(endpoint, EndpointId::from("a"));
        assert_eq!(connector.connected(), vec![ConnectionId(0)]);
        assert_eq!(router.pending_count(), 1);
        assert!(router.registry().is_empty());
        assert!(!router.supervisor().is_running());
    }

    #[test]
    fn test_open_registers_and_starts_heartbeat() {
        let (mut router, _connector, _rx) = router();
        router.subscribe(single("a")).unwrap();

        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        assert_eq!(router.pending_count(), 0);
        let info = &router.subscriptions()[&EndpointId::from("a")];
        assert_eq!(info.state, ConnectionState::Open);
        assert!(info.is_alive);
        assert!(router.supervisor().is_running());
        assert!(router.heartbeat_deadline().is_some());
        assert_eq!(router.metrics().snapshot().opened, 1);
    }

    #[test]
    fn test_registry_tracks_subscribes_and_closes() {
        let (mut router, _connector, _rx) = router();
        let topics = ["a", "b", "c", "d"];

        for (i, topic) in topics.iter().enumerate() {
            router.subscribe(single(topic)).unwrap();
            router.handle_event(event(ConnectionId(i as u64), TransportEvent::Opened));
            assert_eq!(router.registry().len(), i + 1);
        }
        assert_eq!(router.supervisor().starts(), 1);

        for i in 0..topics.len() {
            router.handle_event(event(ConnectionId(i as u64), closed()));
            assert_eq!(router.registry().len(), topics.len() - i - 1);
            assert_eq!(router.supervisor().is_running(), !router.registry().is_empty());
        }
        assert_eq!(router.supervisor().starts(), 1);
        assert_eq!(router.supervisor().stops(), 1);
        assert_eq!(router.heartbeat_deadline(), None);
    }

    #[test]
    fn test_supervisor_restarts_after_registry_empties() {
        let (mut router, _connector, _rx) = router();

        router.subscribe(single("a")).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));
        router.handle_event(event(ConnectionId(0), closed()));
        router.subscribe(single("b")).unwrap();
        router.handle_event(event(ConnectionId(1), TransportEvent::Opened));

        assert_eq!(router.supervisor().starts(), 2);
        assert_eq!(router.supervisor().stops(), 1);
        assert!(router.supervisor().is_running());
    }

    #[test]
    fn test_invalid_topic_sets_create_nothing() {
        let (mut router, connector, _rx) = router();

        for topics in [vec!["x", "y", "x"], vec![]] {
            let result = Topics::combined(topics).and_then(|topics| {
                router.subscribe(SubscribeRequest::new(topics, noop_handler()))
            });
            assert!(matches!(result, Err(StreamError::Config(_))));
        }

        assert_eq!(connector.connect_count(), 0);
        assert_eq!(router.pending_count(), 0);
        assert!(router.subscriptions().is_empty());
    }

    #[test]
    fn test_same_identity_twice_rejected() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a")).unwrap();

        let err = router.subscribe(single("a")).unwrap_err();

        assert!(matches!(err, StreamError::Config(_)));
        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn test_combined_subscribe_uses_composite_identity() {
        let (mut router, connector, _rx) = router();
        let topics = kline_set();
        let expected = topics.endpoint_id();

        let endpoint = router
            .subscribe(SubscribeRequest::new(topics, noop_handler()))
            .unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        assert_eq!(endpoint, expected);
        assert_eq!(connector.connect_count(), 1);
        let info = &router.subscriptions()[&endpoint];
        assert_eq!(info.streams.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_silent_connection_terminated_after_second_sweep() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a")).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        let first = router.on_heartbeat_tick();
        assert!(first.terminated.is_empty());
        assert_eq!(connector.pings(ConnectionId(0)), 1);
        assert_eq!(connector.terminations(ConnectionId(0)), 0);

        let second = router.on_heartbeat_tick();
        assert_eq!(second.terminated, vec![EndpointId::from("a")]);
        assert_eq!(connector.terminations(ConnectionId(0)), 1);
        assert_eq!(router.metrics().snapshot().heartbeat_terminations, 1);

        // Still registered until the transport reports the close
        assert_eq!(router.registry().len(), 1);
        router.handle_event(event(ConnectionId(0), closed()));
        assert!(router.registry().is_empty());
    }

    #[test]
    fn test_pong_between_sweeps_keeps_connection() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a")).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        for _ in 0..5 {
            router.on_heartbeat_tick();
            router.handle_event(event(ConnectionId(0), TransportEvent::Pong));
        }

        assert_eq!(connector.pings(ConnectionId(0)), 5);
        assert_eq!(connector.terminations(ConnectionId(0)), 0);
    }

    #[test]
    fn test_close_with_reconnect_creates_one_replacement() {
        let (mut router, connector, _rx) = router();
        let request = single("a").reconnect(true);
        router.subscribe(request).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.handle_event(event(ConnectionId(0), closed()));

        assert_eq!(connector.connected(), vec![ConnectionId(0), ConnectionId(1)]);
        assert_eq!(connector.delay_of(ConnectionId(1)), Some(Duration::ZERO));
        assert_eq!(router.pending_count(), 1);
        assert!(router.registry().is_empty());
        assert_eq!(router.metrics().snapshot().reconnects, 1);

        router.handle_event(event(ConnectionId(1), TransportEvent::Opened));
        let info = &router.subscriptions()[&EndpointId::from("a")];
        assert_eq!(info.connection_id, ConnectionId(1));
    }

    #[test]
    fn test_close_without_reconnect_creates_nothing() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a")).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.handle_event(event(ConnectionId(0), closed()));

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn test_global_policy_disables_reconnect() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a").reconnect(true)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.set_reconnect(false);
        router.handle_event(event(ConnectionId(0), closed()));

        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn test_policy_captured_at_creation() {
        let (mut router, connector, _rx) = router();
        router.set_reconnect(false);
        router.subscribe(single("a").reconnect(true)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.set_reconnect(true);
        router.handle_event(event(ConnectionId(0), closed()));

        assert_eq!(connector.connect_count(), 1);
        assert!(!router.subscriptions().contains_key(&EndpointId::from("a")));
    }

    #[test]
    fn test_reconnect_failure_is_absorbed() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a").reconnect(true)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        connector.fail_connect(true);
        router.handle_event(event(ConnectionId(0), closed()));

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(router.pending_count(), 0);
        assert!(router.registry().is_empty());
        let snapshot = router.metrics().snapshot();
        assert_eq!(snapshot.reconnects, 0);
        assert_eq!(snapshot.reconnect_failures, 1);
    }

    #[test]
    fn test_failed_attempts_back_off() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a").reconnect(true)).unwrap();

        // Never opens: error then close, three times over
        for i in 0..3u64 {
            router.handle_event(event(
                ConnectionId(i),
                TransportEvent::Error(TransportError::ConnectionFailed("refused".to_string())),
            ));
            router.handle_event(event(
                ConnectionId(i),
                TransportEvent::Closed { code: None, reason: None },
            ));
        }

        assert_eq!(connector.delay_of(ConnectionId(1)), Some(Duration::from_secs(1)));
        assert_eq!(connector.delay_of(ConnectionId(2)), Some(Duration::from_secs(2)));
        assert_eq!(connector.delay_of(ConnectionId(3)), Some(Duration::from_secs(4)));

        // A successful open resets the backoff
        router.handle_event(event(ConnectionId(3), TransportEvent::Opened));
        router.handle_event(event(ConnectionId(3), closed()));
        assert_eq!(connector.delay_of(ConnectionId(4)), Some(Duration::ZERO));
    }

    #[test]
    fn test_add_channels_sent_after_open_only() {
        let (mut router, connector, _rx) = router();
        let topics = kline_set();
        let frame = topics.add_channel_frame();
        router
            .subscribe(
                SubscribeRequest::new(topics, noop_handler())
                    .reconnect(true)
                    .on_opened(OpenedAction::AddChannels),
            )
            .unwrap();

        assert!(connector.sent(ConnectionId(0)).is_empty());

        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));
        assert_eq!(connector.sent(ConnectionId(0)), vec![frame.clone()]);

        let value: Value = serde_json::from_str(&frame).unwrap();
        let channels: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["channel"].as_str().unwrap())
            .collect();
        assert_eq!(
            channels,
            vec![
                "ok_sub_spot_btc_usdt_kline_1min",
                "ok_sub_spot_eth_usdt_kline_1min",
                "ok_sub_spot_ltc_usdt_kline_1min",
            ]
        );

        // Replayed once on the reconnected socket, not before it opens
        router.handle_event(event(ConnectionId(0), closed()));
        assert!(connector.sent(ConnectionId(1)).is_empty());
        router.handle_event(event(ConnectionId(1), TransportEvent::Opened));
        assert_eq!(connector.sent(ConnectionId(1)), vec![frame]);
        assert_eq!(connector.sent(ConnectionId(0)).len(), 1);
    }

    #[test]
    fn test_single_topic_add_channel() {
        let (mut router, connector, _rx) = router();
        router
            .subscribe(single("ok_sub_spot_btc_usdt_ticker").on_opened(OpenedAction::AddChannels))
            .unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        let sent = connector.sent(ConnectionId(0));
        assert_eq!(sent.len(), 1);
        let value: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"event": "addChannel", "channel": "ok_sub_spot_btc_usdt_ticker"})
        );
    }

    #[test]
    fn test_notify_hook_receives_identity() {
        let (mut router, _connector, _rx) = router();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook: OpenedHook =
            Arc::new(move |endpoint: &EndpointId| sink.lock().push(endpoint.clone()));

        router.subscribe(single("a").on_opened(OpenedAction::Notify(hook))).unwrap();
        assert!(seen.lock().is_empty());
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        assert_eq!(*seen.lock(), vec![EndpointId::from("a")]);
    }

    #[test]
    fn test_message_dispatched_to_handler() {
        let (mut router, _connector, _rx) = router();
        let (handler, received) = recording_handler();
        router.subscribe(SubscribeRequest::new(Topics::single("a"), handler)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.handle_event(event(
            ConnectionId(0),
            TransportEvent::Message(Bytes::from_static(br#"[{"channel":"a","data":[1,2]}]"#)),
        ));

        assert_eq!(*received.lock(), vec![serde_json::json!([{"channel": "a", "data": [1, 2]}])]);
        assert_eq!(router.metrics().snapshot().messages, 1);
    }

    #[test]
    fn test_decode_failure_is_logged_and_dropped() {
        let (mut router, _connector, _rx) = router();
        let (handler, received) = recording_handler();
        router.subscribe(SubscribeRequest::new(Topics::single("a"), handler)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        let logs = capture_logs(|| {
            router.handle_event(event(
                ConnectionId(0),
                TransportEvent::Message(Bytes::from_static(b"{not json")),
            ));
        });

        assert!(logs.contains("WARN"));
        assert!(logs.contains("Parse error on a: Decode error"));
        assert!(received.lock().is_empty());
        assert_eq!(router.metrics().snapshot().decode_errors, 1);
        assert_eq!(router.registry().len(), 1);
        assert_eq!(
            router.subscriptions()[&EndpointId::from("a")].state,
            ConnectionState::Open
        );
    }

    #[test]
    fn test_custom_decoder() {
        fn reject(_: &[u8]) -> std::result::Result<Value, DecodeError> {
            Err(DecodeError("rejected".to_string()))
        }

        let (router, _connector, _rx) = router();
        let mut router = router.with_decoder(reject);
        let (handler, received) = recording_handler();
        router.subscribe(SubscribeRequest::new(Topics::single("a"), handler)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));
        router.handle_event(event(
            ConnectionId(0),
            TransportEvent::Message(Bytes::from_static(b"{}")),
        ));

        assert!(received.lock().is_empty());
        assert_eq!(router.metrics().snapshot().decode_errors, 1);
    }

    #[test]
    fn test_error_does_not_remove_connection() {
        let (mut router, _connector, _rx) = router();
        router.subscribe(single("a")).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.handle_event(event(
            ConnectionId(0),
            TransportEvent::Error(TransportError::ReceiveFailed("reset".to_string())),
        ));

        assert_eq!(router.registry().len(), 1);
        assert_eq!(router.metrics().snapshot().transport_errors, 1);
    }

    #[test]
    fn test_stale_events_ignored() {
        let (mut router, _connector, _rx) = router();
        let (handler, received) = recording_handler();
        router
            .subscribe(SubscribeRequest::new(Topics::single("a"), handler).reconnect(true))
            .unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));
        router.handle_event(event(ConnectionId(0), closed()));
        router.handle_event(event(ConnectionId(1), TransportEvent::Opened));

        // Late traffic from the dead instance
        router.handle_event(event(
            ConnectionId(0),
            TransportEvent::Message(Bytes::from_static(b"1")),
        ));
        router.handle_event(event(ConnectionId(0), closed()));
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        assert!(received.lock().is_empty());
        assert_eq!(router.registry().len(), 1);
        assert_eq!(
            router.subscriptions()[&EndpointId::from("a")].connection_id,
            ConnectionId(1)
        );
    }

    #[test]
    fn test_unsubscribe_terminates_without_reconnect() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a").reconnect(true)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        assert!(router.unsubscribe(&EndpointId::from("a")));
        assert_eq!(connector.terminations(ConnectionId(0)), 1);

        router.handle_event(event(ConnectionId(0), closed()));
        assert!(router.registry().is_empty());
        assert_eq!(connector.connect_count(), 1);
        assert!(!router.unsubscribe(&EndpointId::from("a")));
    }

    #[test]
    fn test_unsubscribe_pending_connection() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a").reconnect(true)).unwrap();

        assert!(router.unsubscribe(&EndpointId::from("a")));
        router.handle_event(event(
            ConnectionId(0),
            TransportEvent::Closed { code: None, reason: None },
        ));

        assert_eq!(connector.terminations(ConnectionId(0)), 1);
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn test_shutdown_terminates_everything() {
        let (mut router, connector, _rx) = router();
        router.subscribe(single("a").reconnect(true)).unwrap();
        router.subscribe(single("b").reconnect(true)).unwrap();
        router.handle_event(event(ConnectionId(0), TransportEvent::Opened));

        router.shutdown();
        router.handle_event(event(ConnectionId(0), closed()));
        router.handle_event(event(ConnectionId(1), closed()));

        assert_eq!(connector.terminations(ConnectionId(0)), 1);
        assert_eq!(connector.terminations(ConnectionId(1)), 1);
        assert_eq!(connector.connect_count(), 2);
        assert!(!router.policy().reconnect);
        assert!(!router.supervisor().is_running());
    }

    #[test]
    fn test_decode_json() {
        assert_eq!(decode_json(br#"{"a":1}"#).unwrap(), serde_json::json!({"a": 1}));
        assert!(decode_json(b"").is_err());
        assert!(decode_json(b"[1,").is_err());
    }
}
