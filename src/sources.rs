// ===============================
// src/sources.rs
// ===============================
//
// Empat sumber REST yang dipoll:
// - CoinGecko /coins/markets            -> statistik pasar
// - CoinGecko /coins/{id}/market_chart  -> histori harga 30 hari (harian)
// - NewsAPI /v2/everything              -> headline berita
// - CryptoCompare /data/v2/news/        -> komentar / analisis
//
// Field yang hilang dianggap "tidak ada data" (Ok(None)), bukan error.
//
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::Endpoints;
use crate::credentials::ApiKeys;
use crate::domain::{HeadlineSet, Instrument, Language, MarketData, PricePoint};
use crate::error::FetchError;
use crate::fetcher::{QueryParams, RetryableFetcher};

pub const HISTORY_DAYS: u32 = 30;
pub const HISTORY_CAPACITY: usize = 512;
pub const NEWS_SOURCE: &str = "NewsAPI.org";
pub const COMMENTARY_SOURCE: &str = "CryptoCompare";

/// Market stats before they are paired with a history.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketStats {
    pub name: Option<String>,
    pub current_price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
}

impl MarketStats {
    pub fn with_history(self, history: Vec<PricePoint>, currency: &str) -> MarketData {
        MarketData {
            name: self.name,
            current_price: self.current_price,
            change_24h_pct: self.change_24h_pct,
            market_cap: self.market_cap,
            volume_24h: self.volume_24h,
            history,
            currency: currency.to_ascii_uppercase(),
        }
    }
}

pub struct MarketSources {
    fetcher: RetryableFetcher,
    endpoints: Endpoints,
    keys: ApiKeys,
}

impl MarketSources {
    pub fn new(fetcher: RetryableFetcher, endpoints: Endpoints, keys: ApiKeys) -> Self {
        Self { fetcher, endpoints, keys }
    }

    pub fn markets_url(&self) -> String {
        format!("{}/coins/markets", self.endpoints.coingecko.trim_end_matches('/'))
    }

    pub fn history_url(&self, instrument: &Instrument) -> String {
        format!("{}/coins/{}/market_chart", self.endpoints.coingecko.trim_end_matches('/'), instrument.id)
    }

    pub async fn fetch_market_stats(
        &self,
        instrument: &Instrument,
        currency: &str,
    ) -> Result<Option<MarketStats>, FetchError> {
        let params: QueryParams = vec![
            ("vs_currency", currency.to_ascii_lowercase()),
            ("ids", instrument.id.clone()),
            ("order", "market_cap_desc".into()),
            ("sparkline", "false".into()),
            ("price_change_percentage", "1h,24h,7d".into()),
        ];
        let v = self.fetcher.fetch(&self.markets_url(), &params).await?;
        Ok(parse_market_stats(&v))
    }

    pub async fn fetch_price_history(
        &self,
        instrument: &Instrument,
        currency: &str,
    ) -> Result<Option<Vec<PricePoint>>, FetchError> {
        let params: QueryParams = vec![
            ("vs_currency", currency.to_ascii_lowercase()),
            ("days", HISTORY_DAYS.to_string()),
            ("interval", "daily".into()),
        ];
        let v = self.fetcher.fetch(&self.history_url(instrument), &params).await?;
        Ok(parse_price_history(&v))
    }

    pub async fn fetch_news(
        &self,
        instrument: &Instrument,
        language: Language,
    ) -> Result<Option<HeadlineSet>, FetchError> {
        let params: QueryParams = vec![
            ("q", instrument.id.clone()),
            ("language", language.code().into()),
            ("apiKey", self.keys.news.clone()),
        ];
        let v = self.fetcher.fetch(&self.endpoints.news, &params).await?;
        Ok(parse_titles(&v, "articles").map(|items| HeadlineSet { source: NEWS_SOURCE.into(), items }))
    }

    pub async fn fetch_commentary(
        &self,
        instrument: &Instrument,
        language: Language,
    ) -> Result<Option<HeadlineSet>, FetchError> {
        let params: QueryParams = vec![
            ("categories", instrument.symbol.clone()),
            ("lang", language.code().into()),
            ("api_key", self.keys.commentary.clone()),
        ];
        let v = self.fetcher.fetch(&self.endpoints.commentary, &params).await?;
        Ok(parse_titles(&v, "Data").map(|items| HeadlineSet { source: COMMENTARY_SOURCE.into(), items }))
    }
}

/// First element of the `/coins/markets` array; empty array means no data.
pub fn parse_market_stats(v: &Value) -> Option<MarketStats> {
    let row = v.as_array()?.first()?;
    let num = |k: &str| row.get(k).and_then(Value::as_f64);
    Some(MarketStats {
        name: row.get("name").and_then(Value::as_str).map(str::to_string),
        current_price: num("current_price"),
        change_24h_pct: num("price_change_percentage_24h"),
        market_cap: num("market_cap"),
        volume_24h: num("total_volume"),
    })
}

/// `prices: [[ms, price], ...]` sorted ascending, dedup by timestamp (last wins),
/// trimmed to the newest `HISTORY_CAPACITY` points. Empty means no data.
pub fn parse_price_history(v: &Value) -> Option<Vec<PricePoint>> {
    let rows = v.get("prices")?.as_array()?;
    let mut points: Vec<(i64, f64)> = rows
        .iter()
        .filter_map(|r| {
            let pair = r.as_array()?;
            let ms = pair.first()?.as_f64()? as i64;
            let px = pair.get(1)?.as_f64()?;
            Some((ms, px))
        })
        .collect();

    // stable sort keeps arrival order among equal timestamps
    points.sort_by_key(|(ms, _)| *ms);
    let mut out: Vec<PricePoint> = Vec::with_capacity(points.len());
    for (ms, price) in points {
        let Some(ts) = ts_from_millis(ms) else { continue };
        match out.last_mut() {
            Some(last) if last.ts == ts => last.price = price,
            _ => out.push(PricePoint { ts, price }),
        }
    }
    if out.len() > HISTORY_CAPACITY {
        out.drain(..out.len() - HISTORY_CAPACITY);
    }
    if out.is_empty() { None } else { Some(out) }
}

/// `field[].title`; a missing list is no data, an empty list is a valid (empty) result.
pub fn parse_titles(v: &Value, field: &str) -> Option<Vec<String>> {
    let list = v.get(field)?.as_array()?;
    Some(
        list.iter()
            .filter_map(|a| a.get("title").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

pub fn ts_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
