// ===============================
// src/feed.rs
// ===============================
//
// Streaming trade feed (Binance `<pair>@trade`), satu instance per instrumen.
//
// State machine:
//   Disconnected -> Connecting -> Subscribed -> Disconnected (close/error) -> ...
//   Stopped setelah stop(); tidak ada reconnect lagi.
//
// - Semua disconnect dianggap sementara: reconnect dengan exponential backoff + jitter.
// - Setiap trade diberi cap epoch feed ini; MarketState menolak epoch lama.
// - stop() idempotent, memutus koneksi, membatalkan backoff, dan me-retire epoch.
//
use futures_util::StreamExt; // for .next()
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::binance::{parse_trade, trade_stream_url};
use crate::config::FeedConfig;
use crate::domain::Instrument;
use crate::metrics::{FEED_CONNECTED, FEED_RECONNECTS};
use crate::state::{FeedEpoch, MarketState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

pub struct FeedHandle {
    instrument: Instrument,
    epoch: FeedEpoch,
    market: MarketState,
    stop: CancellationToken,
    state_rx: watch::Receiver<FeedState>,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Spawn the receive loop for `instrument` under a fresh feed epoch.
    pub fn start(instrument: Instrument, market: MarketState, cfg: FeedConfig) -> Self {
        let epoch = market.begin_feed();
        let stop = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(FeedState::Disconnected);

        let task = tokio::spawn(run(instrument.clone(), epoch, market.clone(), cfg, stop.clone(), state_tx));
        info!(%instrument, epoch = epoch.0, "trade feed started");

        Self { instrument, epoch, market, stop, state_rx, task: Some(task) }
    }

    /// Idempotent. Trades from this feed are refused as soon as this returns.
    pub fn stop(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        self.market.retire_feed(self.epoch);
        info!(instrument = %self.instrument, epoch = self.epoch.0, "trade feed stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn state(&self) -> FeedState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state_rx.clone()
    }

    pub fn epoch(&self) -> FeedEpoch {
        self.epoch
    }

    /// Stop and wait for the receive loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// Gauge = jumlah stream yang sedang subscribed. inc/dec berpasangan, jadi feed
// lama yang keluar saat ganti koin tidak menimpa status feed baru.
struct ConnectedMark;

impl ConnectedMark {
    fn new() -> Self {
        FEED_CONNECTED.inc();
        ConnectedMark
    }
}

impl Drop for ConnectedMark {
    fn drop(&mut self) {
        FEED_CONNECTED.dec();
    }
}

/// base * 2^min(attempt,6), capped, plus up to 250ms jitter.
pub fn reconnect_delay(cfg: &FeedConfig, attempt: u32) -> Duration {
    let shift = attempt.min(6);
    let factor = 1u32 << shift; // 1,2,4,...,64
    let base = cfg.reconnect_base.saturating_mul(factor).min(cfg.reconnect_max);
    let jitter_cap = (cfg.reconnect_base.as_millis() as u64).min(250);
    // jangan simpan ThreadRng melewati .await
    let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
    base + Duration::from_millis(jitter)
}

async fn run(
    instrument: Instrument,
    epoch: FeedEpoch,
    market: MarketState,
    cfg: FeedConfig,
    stop: CancellationToken,
    state_tx: watch::Sender<FeedState>,
) {
    let ws_url = trade_stream_url(&cfg.ws_base, &instrument);
    if let Err(e) = Url::parse(&ws_url) {
        error!(?e, %ws_url, "bad ws url");
        let _ = state_tx.send(FeedState::Stopped);
        return;
    }

    let mut attempt: u32 = 0;
    loop {
        if stop.is_cancelled() {
            break;
        }
        let _ = state_tx.send(FeedState::Connecting);
        info!(%ws_url, "connecting trade stream");

        let connected = tokio::select! {
            _ = stop.cancelled() => break,
            r = connect_async(ws_url.as_str()) => r,
        };

        match connected {
            Ok((mut ws, _resp)) => {
                info!(symbol = %instrument.symbol, epoch = epoch.0, "subscribed to trade stream");
                let _ = state_tx.send(FeedState::Subscribed);
                let _connected = ConnectedMark::new();
                attempt = 0; // reset backoff

                loop {
                    let next = tokio::select! {
                        _ = stop.cancelled() => None,
                        frame = ws.next() => Some(frame),
                    };
                    let Some(frame) = next else {
                        let _ = ws.close(None).await;
                        break;
                    };
                    match frame {
                        Some(Ok(m)) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            match parse_trade(&txt) {
                                Some(trade) if !stop.is_cancelled() => {
                                    market.update_trade(trade, epoch);
                                }
                                Some(_) => {}
                                None => debug!(%txt, "ignoring non-trade message"),
                            }
                        }
                        Some(Ok(_)) => {
                            // ping/pong/binary/close frame; tungstenite balas ping otomatis
                        }
                        Some(Err(e)) => {
                            error!(?e, "ws read error");
                            break;
                        }
                        None => break,
                    }
                }
                drop(_connected);
                if !stop.is_cancelled() {
                    info!("trade stream disconnected, will reconnect…");
                }
            }
            Err(e) => {
                error!(?e, %ws_url, "connect failed");
            }
        }

        if stop.is_cancelled() {
            break;
        }
        let _ = state_tx.send(FeedState::Disconnected);

        attempt = attempt.saturating_add(1);
        let delay = reconnect_delay(&cfg, attempt);
        FEED_RECONNECTS.inc();
        debug!(attempt, ?delay, "reconnect scheduled");
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    let _ = state_tx.send(FeedState::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionParameters;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    fn trade_json(price: f64) -> String {
        format!(r#"{{"e":"trade","s":"BTCUSDT","p":"{price}","q":"1","T":1700000000000}}"#)
    }

    fn test_cfg(ws_base: String) -> FeedConfig {
        FeedConfig {
            ws_base,
            reconnect_base: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
        }
    }

    /// Serves one websocket session per entry; each session sends its frames.
    /// Sessions with `hold = true` stay open afterwards, the rest close right away.
    async fn serve(sessions: Vec<(Vec<String>, bool)>) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            for (frames, hold) in sessions {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    for f in frames {
                        if ws.send(Message::Text(f)).await.is_err() {
                            return;
                        }
                    }
                    if hold {
                        sleep(Duration::from_secs(30)).await;
                    } else {
                        let _ = ws.close(None).await;
                    }
                }));
            }
            // keep session tasks owned until the server is aborted
            for h in held {
                let _ = h.await;
            }
        });
        (format!("ws://{addr}"), handle)
    }

    async fn wait_for(rx: &mut watch::Receiver<FeedState>, want: FeedState) {
        timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want)).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_remote_close_and_keeps_updating() {
        let (url, server) = serve(vec![
            (vec![trade_json(100.0)], false),
            (vec![trade_json(200.0), trade_json(201.0)], true),
        ])
        .await;
        let market = MarketState::new(Instrument::new("bitcoin", "BTC"), PositionParameters::default());
        let mut views = market.subscribe_channel();

        let feed = FeedHandle::start(Instrument::new("bitcoin", "BTC"), market.clone(), test_cfg(url));
        let epoch = feed.epoch();

        let mut prices = Vec::new();
        while prices.len() < 3 {
            let v = timeout(Duration::from_secs(5), views.recv()).await.unwrap().unwrap();
            prices.push(v.price().unwrap());
        }
        assert_eq!(prices, vec![100.0, 200.0, 201.0]);
        // same feed generation across the reconnect
        assert_eq!(market.feed_epoch(), epoch);
        assert_eq!(feed.state(), FeedState::Subscribed);

        feed.shutdown().await;
        server.abort();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_blocks_late_trades() {
        let frames: Vec<String> = (1..=200).map(|i| trade_json(i as f64)).collect();
        let (url, server) = serve(vec![(frames, true)]).await;
        let market = MarketState::new(Instrument::new("bitcoin", "BTC"), PositionParameters::default());
        let mut views = market.subscribe_channel();

        let feed = FeedHandle::start(Instrument::new("bitcoin", "BTC"), market.clone(), test_cfg(url));
        timeout(Duration::from_secs(5), views.recv()).await.unwrap().unwrap();

        feed.stop();
        feed.stop();
        assert!(feed.is_stopped());
        assert_ne!(market.feed_epoch(), feed.epoch());

        while views.try_recv().is_ok() {}
        let mut state_rx = feed.watch_state();
        wait_for(&mut state_rx, FeedState::Stopped).await;
        sleep(Duration::from_millis(50)).await;
        assert!(views.try_recv().is_err());

        feed.shutdown().await;
        server.abort();
    }

    #[tokio::test]
    async fn stop_interrupts_reconnect_backoff() {
        // ambil port kosong lalu tutup listener-nya -> connection refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let market = MarketState::new(Instrument::new("bitcoin", "BTC"), PositionParameters::default());
        let cfg = FeedConfig {
            ws_base: format!("ws://{addr}"),
            reconnect_base: Duration::from_secs(60),
            reconnect_max: Duration::from_secs(60),
        };
        let feed = FeedHandle::start(Instrument::new("bitcoin", "BTC"), market, cfg);
        let mut state_rx = feed.watch_state();
        // connect ke port tertutup gagal seketika, lalu masuk backoff 60s
        sleep(Duration::from_millis(200)).await;
        wait_for(&mut state_rx, FeedState::Disconnected).await;

        timeout(Duration::from_secs(2), feed.shutdown()).await.unwrap();
        assert_eq!(*state_rx.borrow(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn restarted_feed_supersedes_old_epoch() {
        let (url, server) = serve(vec![(vec![trade_json(10.0)], true), (vec![trade_json(20.0)], true)]).await;
        let market = MarketState::new(Instrument::new("bitcoin", "BTC"), PositionParameters::default());
        let mut views = market.subscribe_channel();

        let first = FeedHandle::start(Instrument::new("bitcoin", "BTC"), market.clone(), test_cfg(url.clone()));
        timeout(Duration::from_secs(5), views.recv()).await.unwrap().unwrap();
        let old_epoch = first.epoch();
        first.shutdown().await;

        let second = FeedHandle::start(Instrument::new("bitcoin", "BTC"), market.clone(), test_cfg(url));
        assert!(second.epoch() > old_epoch);
        let v = timeout(Duration::from_secs(5), views.recv()).await.unwrap().unwrap();
        assert_eq!(v.price(), Some(20.0));

        // a late trade from the dead connection is refused
        assert!(!market.update_trade(crate::domain::LiveTrade { price: 1.0, ts: chrono::Utc::now() }, old_epoch));
        assert_eq!(market.current_view().price(), Some(20.0));

        second.shutdown().await;
        server.abort();
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        let cfg = FeedConfig {
            ws_base: String::new(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(32),
        };
        let d1 = reconnect_delay(&cfg, 1);
        assert!(d1 >= Duration::from_millis(1000) && d1 <= Duration::from_millis(1250));
        let d10 = reconnect_delay(&cfg, 10);
        assert!(d10 >= Duration::from_secs(32) && d10 <= Duration::from_millis(32_250));
    }

    #[test]
    fn connected_gauge_survives_overlapping_feeds() {
        let old = ConnectedMark::new();
        let new = ConnectedMark::new();
        drop(old);
        // feed lain di test paralel hanya bisa menambah nilai
        assert!(FEED_CONNECTED.get() >= 1);
        drop(new);
    }
}
