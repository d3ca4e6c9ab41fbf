// ===============================
// src/main.rs
// ===============================
/*
 # harga live + status PnL per update
 RUST_LOG=info cargo run -- --coin ETH --language tr --purchase-price 2000 --stop-price 1800

 # metrics
 curl -s localhost:9899/metrics | egrep '^(trades_total|feed_connected|fetch_total)'
*/
/*
=============================================================================
Project : coinwatch: async crypto market tracker in Rust
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Merges the Binance trade stream with periodic CoinGecko stats,
          price history, NewsAPI headlines and CryptoCompare commentary,
          and derives profit/loss + stop-loss status for one position.
=============================================================================
*/
use std::sync::Arc;

use clap::Parser;
use tokio::{io::BufReader, select, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coinwatch::{
    config::{self, Session},
    console, credentials,
    fetcher::{http_client, RetryableFetcher},
    metrics,
    sources::MarketSources,
    tracker::Tracker,
};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config & session ----
    let args = config::load();
    let session = Session::parse();

    let keys = match credentials::load_api_keys(&args.api_keys_file) {
        Ok(k) => k,
        Err(e) => {
            error!(%e, "startup aborted");
            std::process::exit(1);
        }
    };

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(args.metrics_port);

    let instrument = session.instrument();
    let language = session.language();
    let position = session.position();

    info!(
        instrument = %instrument,
        language = %language,
        currency = %position.currency,
        investment = position.investment,
        purchase_price = position.purchase_price,
        stop_price = position.stop_price,
        poll_secs = args.poll_interval.as_secs(),
        binance_ws = %args.feed.ws_base,
        coingecko = %args.endpoints.coingecko,
        "startup config"
    );

    // ---- Sources ----
    let transport = Arc::new(http_client(args.http_timeout));
    let fetcher = RetryableFetcher::new(transport, args.retry);
    let sources = Arc::new(MarketSources::new(fetcher, args.endpoints.clone(), keys));

    // ---- Tracker (feed + poller) ----
    let mut tracker = Tracker::start(
        sources,
        args.feed.clone(),
        args.poll_interval,
        instrument,
        language,
        position,
    );
    // tiap tick masuk debug; info hanya kalau status/slot berubah
    let mut view_log = console::ViewLog::default();
    let _logger = tracker.subscribe(move |view| view_log.log(&view));

    info!("commands: coin <TICKER> | currency <CODE> | lang <CODE> | position <inv> <buy> <stop> | show | quit");

    // ---- Console + heartbeat ----
    let stdin = BufReader::new(tokio::io::stdin());
    {
        let console = console::run(&mut tracker, stdin);
        tokio::pin!(console);
        let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
        heartbeat.tick().await;

        loop {
            select! {
                _ = &mut console => break,
                _ = tokio::signal::ctrl_c() => {
                    info!("ctrl-c received");
                    break;
                }
                _ = heartbeat.tick() => {
                    let feed = metrics::FEED_CONNECTED.get();
                    let trades = metrics::TRADES.get();
                    info!(feed_connected = feed, trades, "heartbeat");
                }
            }
        }
    }

    tracker.shutdown().await;
}
