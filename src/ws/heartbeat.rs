//! Shared heartbeat over every registered connection
//!
//! One timer for the whole registry, running only while the registry is
//! non-empty. Each sweep is a two-phase probe/response cycle: a live
//! connection is marked silent and pinged, a connection still silent on the
//! next sweep is terminated. The sweep itself never waits on I/O.

use crate::ws::connection::EndpointId;
use crate::ws::registry::SubscriptionRegistry;
use std::time::Duration;
use tokio::time::Instant;

/// Default sweep period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pings queued successfully
    pub pinged: usize,
    /// Connections dropped for not answering the previous probe
    pub terminated: Vec<EndpointId>,
}

/// Process-wide liveness sweep
#[derive(Debug)]
pub struct HeartbeatSupervisor {
    period: Duration,
    state: SupervisorState,
    next_due: Option<Instant>,
    starts: u64,
    stops: u64,
    sweeps: u64,
}

impl HeartbeatSupervisor {
    /// Create a stopped supervisor
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            state: SupervisorState::Stopped,
            next_due: None,
            starts: 0,
            stops: 0,
            sweeps: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == SupervisorState::Running
    }

    /// Arm the timer. No-op when already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.state = SupervisorState::Running;
        self.next_due = Some(Instant::now() + self.period);
        self.starts += 1;
    }

    /// Disarm the timer. No-op when already stopped.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.state = SupervisorState::Stopped;
        self.next_due = None;
        self.stops += 1;
    }

    /// When the next sweep is due, `None` while stopped
    pub fn deadline(&self) -> Option<Instant> {
        self.next_due
    }

    /// Number of stopped → running transitions
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Number of running → stopped transitions
    pub fn stops(&self) -> u64 {
        self.stops
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    /// Probe every registered connection once
    pub fn sweep(&mut self, registry: &mut SubscriptionRegistry) -> SweepReport {
        let mut report = SweepReport::default();

        for conn in registry.connections_mut() {
            if conn.is_alive() {
                conn.set_alive(false);
                if conn.is_open() && conn.ping().is_ok() {
                    report.pinged += 1;
                }
            } else if conn.is_open() {
                conn.terminate();
                report.terminated.push(conn.endpoint().clone());
            }
        }

        self.sweeps += 1;
        if self.is_running() {
            self.next_due = Some(Instant::now() + self.period);
        }
        report
    }
}

impl Default for HeartbeatSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}
