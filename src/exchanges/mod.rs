//! Exchange-specific channel naming

pub mod okex;

pub use okex::{candlesticks, kline_channel, KlineInterval, OKEX_STREAM_URL};
