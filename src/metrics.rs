// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Once;
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Streaming feed --------
pub static TRADES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trades_total", "trade prices accepted into market state").unwrap());

pub static TRADES_STALE: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("trades_stale_total", "trades dropped because their feed epoch is stale").unwrap()
});

pub static FEED_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("feed_connected", "number of subscribed trade streams").unwrap()
});

pub static FEED_RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("feed_reconnects_total", "trade stream reconnect attempts").unwrap());

// -------- Polling --------
pub static FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fetch_total", "REST fetches (labels: source, outcome)"),
        &["source", "outcome"],
    )
    .unwrap()
});

pub static RATE_LIMITED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("fetch_rate_limited_total", "HTTP 429 responses seen").unwrap());

pub static SNAPSHOT_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("snapshot_published_total", "snapshot slot replacements (label: slot)"),
        &["slot"],
    )
    .unwrap()
});

// -------- Price & PnL --------
pub static LAST_PRICE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("last_price", "last streamed trade price").unwrap());

pub static PROFIT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("position_profit", "profit/loss of the configured position").unwrap());

static INIT: Once = Once::new();

pub fn init() {
    // Register all metrics to the custom registry
    INIT.call_once(|| {
        for m in [
            REGISTRY.register(Box::new(TRADES.clone())),
            REGISTRY.register(Box::new(TRADES_STALE.clone())),
            REGISTRY.register(Box::new(FEED_CONNECTED.clone())),
            REGISTRY.register(Box::new(FEED_RECONNECTS.clone())),
            REGISTRY.register(Box::new(FETCHES.clone())),
            REGISTRY.register(Box::new(RATE_LIMITED.clone())),
            REGISTRY.register(Box::new(SNAPSHOT_PUBLISHED.clone())),
            REGISTRY.register(Box::new(LAST_PRICE.clone())),
            REGISTRY.register(Box::new(PROFIT.clone())),
        ] {
            let _ = m;
        }
    });
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Runs the metrics responder on a dedicated OS thread; port 0 disables it.
pub fn serve_metrics(port: u16) {
    if port == 0 {
        return;
    }
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, ?e, "metrics bind failed");
                return;
            }
        };
        tracing::info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}
