//! OKEx kline stream runner
//!
//! Subscribes to candlesticks for the configured symbols and logs every
//! payload until Ctrl-C.

use anyhow::Context;
use okex_stream::infrastructure::logging::init_logging;
use okex_stream::ws::MessageHandler;
use okex_stream::{log_main, Config, StreamEngine};
use std::sync::Arc;
use tracing::Level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let _guards = init_logging(&config.logging).context("initializing logging")?;

    log_main!(
        Level::INFO,
        "Starting OKEx stream on {} for {:?} ({})",
        config.stream.url,
        config.feed.symbols,
        config.feed.interval
    );

    let (engine, client) = StreamEngine::from_config(&config.stream)?;
    let engine = engine.spawn();

    let handler: MessageHandler = Arc::new(|payload| {
        log_main!(Level::INFO, "{}", payload);
    });
    let endpoint = client
        .candlesticks(config.feed.symbols.as_slice(), config.feed.interval, handler)
        .await?;
    log_main!(Level::INFO, "Subscribed as {}", endpoint);

    tokio::signal::ctrl_c().await?;
    log_main!(Level::INFO, "Shutting down, {:?}", client.metrics());

    client.shutdown().await?;
    engine.await?;
    Ok(())
}
