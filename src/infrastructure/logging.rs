//! Logging setup
//!
//! Console output always; with a configured directory, daily rolling files:
//! - <dir>/main.* - everything
//! - <dir>/ws.* - connection lifecycle (target "ws")
//! - <dir>/error.* - warnings and errors only

use crate::infrastructure::config::LoggingConfig;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging
///
/// `RUST_LOG` wins over the configured level. Returns the file writer guards,
/// which must be kept alive for the duration of the program.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<Vec<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    // Console layer
    layers.push(fmt::layer().with_target(true).with_level(true).boxed());

    if let Some(dir) = config.directory.as_deref() {
        fs::create_dir_all(dir)?;

        let (main_appender, main_guard) = create_appender(dir, "main");
        guards.push(main_guard);
        let main_layer = fmt::layer()
            .with_writer(main_appender)
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true);
        layers.push(if config.json {
            main_layer.json().boxed()
        } else {
            main_layer.boxed()
        });

        let (ws_appender, ws_guard) = create_appender(dir, "ws");
        guards.push(ws_guard);
        layers.push(
            fmt::layer()
                .with_writer(ws_appender)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
                    metadata.target() == "ws"
                }))
                .boxed(),
        );

        let (error_appender, error_guard) = create_appender(dir, "error");
        guards.push(error_guard);
        layers.push(
            fmt::layer()
                .with_writer(error_appender)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_filter(tracing_subscriber::filter::LevelFilter::WARN)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    tracing::info!("Logging initialized");

    Ok(guards)
}

/// Create a rolling file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_ws {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "ws", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_main {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "main", $level, $($arg)+)
    };
}
