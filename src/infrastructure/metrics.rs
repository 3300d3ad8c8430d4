//! Metrics collection for stream monitoring
//!
//! Lock-free counters updated by the router, read through snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stream metrics collector
///
/// Thread-safe counters updated from the engine task.
/// Snapshots taken for export.
pub struct StreamMetrics {
    /// Connections that reached open
    opened: AtomicU64,
    /// Connections that reported close (opened or not)
    closed: AtomicU64,
    /// Payloads decoded and dispatched
    messages: AtomicU64,
    /// Payloads dropped for failing to decode
    decode_errors: AtomicU64,
    /// Transport errors reported by sockets
    transport_errors: AtomicU64,
    /// Heartbeat pings queued
    pings: AtomicU64,
    /// Connections dropped by the heartbeat
    heartbeat_terminations: AtomicU64,
    /// Replacement connections created
    reconnects: AtomicU64,
    /// Reconnect attempts that failed outright
    reconnect_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub opened: u64,
    pub closed: u64,
    pub messages: u64,
    pub decode_errors: u64,
    pub transport_errors: u64,
    pub pings: u64,
    pub heartbeat_terminations: u64,
    pub reconnects: u64,
    pub reconnect_failures: u64,
    pub uptime: Duration,
}

impl StreamMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            pings: AtomicU64::new(0),
            heartbeat_terminations: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            reconnect_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pings(&self, count: u64) {
        self.pings.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat_termination(&self) {
        self.heartbeat_terminations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect_failure(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the collector was created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
            heartbeat_terminations: self.heartbeat_terminations.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            uptime: self.uptime(),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}
