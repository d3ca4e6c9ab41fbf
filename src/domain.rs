// ===============================
// src/domain.rs
// ===============================
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aset yang sedang dipantau (id CoinGecko + ticker).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub symbol: String,
}

impl Instrument {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self { id: id.into(), symbol: symbol.into().to_ascii_uppercase() }
    }

    /// Binance spot pair used by the trade stream, e.g. `btcusdt`.
    pub fn stream_pair(&self) -> String {
        format!("{}usdt", self.symbol.to_ascii_lowercase())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language { En, Tr, Fr, De, Es, Ru }

impl Language {
    pub const ALL: [Language; 6] =
        [Language::En, Language::Tr, Language::Fr, Language::De, Language::Es, Language::Ru];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Tr => "tr",
            Language::Fr => "fr",
            Language::De => "de",
            Language::Es => "es",
            Language::Ru => "ru",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|l| l.code() == s)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One (timestamp, price) sample of the polled history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: DateTime<Utc>,
    pub price: f64,
}

/// Stats + history from the same poll cycle. Always published together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub name: Option<String>,
    pub current_price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    /// ascending by `ts`, unique timestamps
    pub history: Vec<PricePoint>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineSet {
    pub source: String,
    pub items: Vec<String>,
}

/// Latest polled state. Each slot is replaced as a whole; `None` = not fetched yet.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub market: Option<Arc<MarketData>>,
    pub news: Option<Arc<HeadlineSet>>,
    pub commentary: Option<Arc<HeadlineSet>>,
}

/// Slot-level update emitted by the poller.
#[derive(Debug, Clone)]
pub enum SnapshotUpdate {
    Market(MarketData),
    News(HeadlineSet),
    Commentary(HeadlineSet),
}

impl SnapshotUpdate {
    pub fn slot(&self) -> &'static str {
        match self {
            SnapshotUpdate::Market(_) => "market",
            SnapshotUpdate::News(_) => "news",
            SnapshotUpdate::Commentary(_) => "commentary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveTrade {
    pub price: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionParameters {
    pub investment: f64,
    pub purchase_price: f64,
    pub stop_price: f64,
    pub currency: String,
}

impl Default for PositionParameters {
    fn default() -> Self {
        Self { investment: 1000.0, purchase_price: 0.0, stop_price: 0.0, currency: "USD".into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PnlStatus { Unset, Profit, Loss, StopLossTriggered }

impl PnlStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PnlStatus::Unset => "unset",
            PnlStatus::Profit => "profit",
            PnlStatus::Loss => "loss",
            PnlStatus::StopLossTriggered => "stop_loss_triggered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitLossResult {
    pub profit: f64,
    pub status: PnlStatus,
}

/// Combined view handed to subscribers: live price + polled slots + derived PnL.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub instrument: Instrument,
    pub trade: Option<LiveTrade>,
    pub snapshot: MarketSnapshot,
    pub position: PositionParameters,
    /// `None` until the first trade arrives
    pub pnl: Option<ProfitLossResult>,
}

impl MarketView {
    pub fn price(&self) -> Option<f64> {
        self.trade.map(|t| t.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamped_types_serialize_as_rfc3339() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let point = serde_json::to_value(PricePoint { ts, price: 25_000.0 }).unwrap();
        assert_eq!(point["ts"], "2023-11-14T22:13:20Z");

        let trade: LiveTrade = serde_json::from_str(r#"{"price":1.5,"ts":"2023-11-14T22:13:20Z"}"#).unwrap();
        assert_eq!(trade.ts, ts);
        assert_eq!(trade.price, 1.5);
    }
}
