//! Infrastructure - cold path only
//!
//! This module contains code outside the connection lifecycle:
//! - Logging and metrics
//! - Configuration management

pub mod config;
pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, StreamMetrics};
