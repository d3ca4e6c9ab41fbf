// ===============================
// src/binance.rs
// ===============================
use chrono::Utc;
use serde::Deserialize;

use crate::domain::{Instrument, LiveTrade};
use crate::sources::ts_from_millis;

// ---- Minimal trade stream model ----
// Contoh payload:
// {"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,"p":"16600.01000000","q":"0.00100000","T":1672515782134,"m":true}
// Field lain (e, s, q, m, ...) diabaikan.
#[derive(Debug, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
}

/// `wss://.../ws/btcusdt@trade`
pub fn trade_stream_url(ws_base: &str, instrument: &Instrument) -> String {
    format!("{}/{}@trade", ws_base.trim_end_matches('/'), instrument.stream_pair())
}

/// Parse one text frame; anything without a positive numeric `p` is ignored.
pub fn parse_trade(txt: &str) -> Option<LiveTrade> {
    let ev: TradeEvent = serde_json::from_str(txt).ok()?;
    let price = ev.price.trim().parse::<f64>().ok().filter(|p| p.is_finite() && *p > 0.0)?;
    let ts = ev.trade_time.and_then(ts_from_millis).unwrap_or_else(Utc::now);
    Some(LiveTrade { price, ts })
}
