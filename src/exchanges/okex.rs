//! OKEx spot stream channels
//!
//! Channel naming for the v1 spot WebSocket and ready-made kline
//! subscriptions. Payloads stay opaque; only the channel names live here.

use crate::ws::subscription::{MessageHandler, OpenedAction, SubscribeRequest, Topics};
use crate::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Public spot stream endpoint
pub const OKEX_STREAM_URL: &str = "wss://real.okex.com:10441/websocket";

/// Kline (candlestick) period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "3min")]
    ThreeMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "2hour")]
    TwoHours,
    #[serde(rename = "4hour")]
    FourHours,
    #[serde(rename = "6hour")]
    SixHours,
    #[serde(rename = "12hour")]
    TwelveHours,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "3day")]
    ThreeDays,
    #[serde(rename = "week")]
    Week,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 13] = [
        KlineInterval::OneMinute,
        KlineInterval::ThreeMinutes,
        KlineInterval::FiveMinutes,
        KlineInterval::FifteenMinutes,
        KlineInterval::ThirtyMinutes,
        KlineInterval::OneHour,
        KlineInterval::TwoHours,
        KlineInterval::FourHours,
        KlineInterval::SixHours,
        KlineInterval::TwelveHours,
        KlineInterval::Day,
        KlineInterval::ThreeDays,
        KlineInterval::Week,
    ];

    /// Wire name used in channel names
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::OneMinute => "1min",
            KlineInterval::ThreeMinutes => "3min",
            KlineInterval::FiveMinutes => "5min",
            KlineInterval::FifteenMinutes => "15min",
            KlineInterval::ThirtyMinutes => "30min",
            KlineInterval::OneHour => "1hour",
            KlineInterval::TwoHours => "2hour",
            KlineInterval::FourHours => "4hour",
            KlineInterval::SixHours => "6hour",
            KlineInterval::TwelveHours => "12hour",
            KlineInterval::Day => "day",
            KlineInterval::ThreeDays => "3day",
            KlineInterval::Week => "week",
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        KlineInterval::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| StreamError::Config(format!("unknown kline interval: {}", s)))
    }
}

/// `ok_sub_spot_<symbol>_kline_<interval>`, symbol taken as given
pub fn kline_channel(symbol: &str, interval: KlineInterval) -> String {
    format!("ok_sub_spot_{}_kline_{}", symbol, interval)
}

/// Kline subscription for one or more symbols
///
/// One symbol gets its own connection named after the channel, with the
/// symbol lower-cased; several share a multiplexed connection and keep their
/// case. Either way the subscription reconnects and re-sends `addChannel` on
/// every open.
///
/// # Errors
/// `StreamError::Config` for an empty list or duplicate symbols.
pub fn candlesticks<S: AsRef<str>>(
    symbols: &[S],
    interval: KlineInterval,
    handler: MessageHandler,
) -> Result<SubscribeRequest> {
    let topics = match symbols {
        [] => return Err(StreamError::Config("candlesticks: no symbols given".to_string())),
        [symbol] => Topics::single(kline_channel(&symbol.as_ref().to_lowercase(), interval)),
        _ => Topics::combined(symbols.iter().map(|s| kline_channel(s.as_ref(), interval)))
            .map_err(|e| StreamError::Config(format!("candlesticks: {}", e)))?,
    };

    Ok(SubscribeRequest::new(topics, handler)
        .reconnect(true)
        .on_opened(OpenedAction::AddChannels))
}
