// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : coinwatch: async crypto market tracker in Rust
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Merges the Binance trade stream with periodic CoinGecko stats,
          price history, NewsAPI headlines and CryptoCompare commentary,
          and derives profit/loss + stop-loss status for one position.
=============================================================================
*/
use std::env;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use clap::Parser;
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::domain::{Instrument, Language, PositionParameters};
use crate::retry::RetryPolicy;

/// Koin yang bisa dipilih (id CoinGecko, ticker).
pub const INSTRUMENTS: [(&str, &str); 5] = [
    ("bitcoin", "BTC"),
    ("ethereum", "ETH"),
    ("solana", "SOL"),
    ("cardano", "ADA"),
    ("ripple", "XRP"),
];

// Mata uang default per bahasa
static CURRENCY_BY_LANGUAGE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let table: [(&'static str, &[&'static str]); 4] =
        [("USD", &["en", "es"][..]), ("TRY", &["tr"][..]), ("EUR", &["fr", "de"][..]), ("RUB", &["ru"][..])];
    for (cur, langs) in table {
        for l in langs {
            m.insert(*l, cur);
        }
    }
    m
});

pub fn default_currency_for(language: Language) -> &'static str {
    CURRENCY_BY_LANGUAGE.get(language.code()).copied().unwrap_or("USD")
}

/// Lookup by ticker (case-insensitive) or by CoinGecko id.
pub fn find_instrument(key: &str) -> Option<Instrument> {
    let key = key.trim();
    INSTRUMENTS
        .iter()
        .find(|(id, sym)| sym.eq_ignore_ascii_case(key) || id.eq_ignore_ascii_case(key))
        .map(|(id, sym)| Instrument::new(*id, *sym))
}

pub fn default_instrument() -> Instrument {
    let (id, sym) = INSTRUMENTS[0];
    Instrument::new(id, sym)
}

/// Parse user-typed decimals; `,` counts as decimal separator, garbage becomes 0.
pub fn parse_amount(s: &str) -> f64 {
    s.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub coingecko: String,
    pub news: String,
    pub commentary: String,
    pub binance_ws: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            coingecko: "https://api.coingecko.com/api/v3".into(),
            news: "https://newsapi.org/v2/everything".into(),
            commentary: "https://min-api.cryptocompare.com/data/v2/news/".into(),
            binance_ws: "wss://stream.binance.com:9443/ws".into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub ws_base: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_base: Endpoints::default().binance_ws,
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(32),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub endpoints: Endpoints,
    pub feed: FeedConfig,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub metrics_port: u16,
    pub api_keys_file: String,
}

/// Opsi sesi dari command line (fallback ke ENV).
#[derive(Parser, Clone, Debug)]
#[command(name = "coinwatch", version, about = "Live crypto price + PnL tracker")]
pub struct Session {
    /// Ticker or CoinGecko id (BTC, ETH, SOL, ADA, XRP)
    #[arg(long, env = "COIN", default_value = "BTC")]
    pub coin: String,
    /// Quote currency; defaults to the language's currency
    #[arg(long, env = "CURRENCY")]
    pub currency: Option<String>,
    /// en, tr, fr, de, es, ru (bukan `LANGUAGE` milik gettext)
    #[arg(long, env = "COINWATCH_LANGUAGE", default_value = "en")]
    pub language: String,
    #[arg(long, env = "INVESTMENT", default_value = "1000.0")]
    pub investment: String,
    #[arg(long, env = "PURCHASE_PRICE", default_value = "0.0")]
    pub purchase_price: String,
    #[arg(long, env = "STOP_PRICE", default_value = "0.0")]
    pub stop_price: String,
}

impl Session {
    /// Unknown codes fall back to English with a warning.
    pub fn language(&self) -> Language {
        Language::parse(&self.language).unwrap_or_else(|| {
            warn!(language = %self.language, "unsupported language, using en");
            Language::En
        })
    }

    pub fn instrument(&self) -> Instrument {
        find_instrument(&self.coin).unwrap_or_else(default_instrument)
    }

    pub fn position(&self) -> PositionParameters {
        let currency = self
            .currency
            .clone()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_currency_for(self.language()).to_string());
        PositionParameters {
            investment: parse_amount(&self.investment),
            purchase_price: parse_amount(&self.purchase_price),
            stop_price: parse_amount(&self.stop_price),
            currency,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

pub fn load() -> Args {
    // Pastikan .env dibaca
    let _ = dotenv();

    let defaults = Endpoints::default();
    let endpoints = Endpoints {
        coingecko: env_or("COINGECKO_URL", &defaults.coingecko),
        news: env_or("NEWS_URL", &defaults.news),
        commentary: env_or("COMMENTARY_URL", &defaults.commentary),
        binance_ws: env_or("BINANCE_WS_URL", &defaults.binance_ws),
    };

    let feed = FeedConfig {
        ws_base: endpoints.binance_ws.clone(),
        reconnect_base: Duration::from_millis(env_num("FEED_RECONNECT_BASE_MS", 500)),
        reconnect_max: Duration::from_millis(env_num("FEED_RECONNECT_MAX_MS", 32_000)),
    };

    // 30 menit default, sama seperti jadwal refresh data statis
    let poll_interval = Duration::from_secs(env_num("POLL_INTERVAL_SECS", 1800u64).max(1));
    let http_timeout = Duration::from_secs(env_num("HTTP_TIMEOUT_SECS", 15));
    let retry = RetryPolicy::new(
        env_num("RETRY_MAX_ATTEMPTS", 3),
        Duration::from_secs(env_num("RETRY_INITIAL_DELAY_SECS", 5)),
        env_num("RETRY_MULTIPLIER", 2),
    );

    Args {
        endpoints,
        feed,
        poll_interval,
        http_timeout,
        retry,
        metrics_port: env_num("METRICS_PORT", 9899),
        api_keys_file: env_or("API_KEYS_FILE", "api_keys.json"),
    }
}
