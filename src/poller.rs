// ===============================
// src/poller.rs
// ===============================
//
// SnapshotPoller: tiap `interval` (default 30 menit) dan segera setelah
// selection berubah, jalankan satu siklus:
//   - stats + histori : dipublish BERSAMA hanya kalau keduanya sukses
//   - berita          : independen, publish begitu ada
//   - komentar        : independen, publish begitu ada
// Kegagalan fetch tidak menghapus slot lama (data basi > kosong).
// Siklus lama dibatalkan hanya saat selection berubah; publish yang lolos
// tetap ditolak MarketState lewat selection epoch. Tick interval tidak
// membatalkan siklus yang masih jalan.
//
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Instrument, Language, SnapshotUpdate};
use crate::error::FetchError;
use crate::metrics::FETCHES;
use crate::sources::MarketSources;
use crate::state::{MarketState, SelectionEpoch};

/// What the poller is currently polling for.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub instrument: Instrument,
    pub currency: String,
    pub language: Language,
    pub epoch: SelectionEpoch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Published,
    /// response was fine but carried nothing usable
    NoData,
    Failed(FetchError),
    /// selection moved on while fetching
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub market: SlotOutcome,
    pub news: SlotOutcome,
    pub commentary: SlotOutcome,
}

fn record<T>(source: &str, res: &Result<Option<T>, FetchError>) {
    let outcome = match res {
        Ok(Some(_)) => "ok",
        Ok(None) => "no_data",
        Err(e) => e.kind(),
    };
    FETCHES.with_label_values(&[source, outcome]).inc();
}

fn publish(state: &MarketState, update: SnapshotUpdate, epoch: SelectionEpoch) -> SlotOutcome {
    if state.apply(update, epoch) {
        SlotOutcome::Published
    } else {
        SlotOutcome::Superseded
    }
}

async fn poll_market(sources: &MarketSources, state: &MarketState, sel: &Selection) -> SlotOutcome {
    let stats = sources.fetch_market_stats(&sel.instrument, &sel.currency).await;
    record("market_stats", &stats);
    let stats = match stats {
        Ok(Some(s)) => s,
        Ok(None) => return SlotOutcome::NoData,
        Err(e) => return SlotOutcome::Failed(e),
    };

    let history = sources.fetch_price_history(&sel.instrument, &sel.currency).await;
    record("price_history", &history);
    match history {
        Ok(Some(h)) => publish(state, SnapshotUpdate::Market(stats.with_history(h, &sel.currency)), sel.epoch),
        Ok(None) => SlotOutcome::NoData,
        Err(e) => SlotOutcome::Failed(e),
    }
}

async fn poll_news(sources: &MarketSources, state: &MarketState, sel: &Selection) -> SlotOutcome {
    let res = sources.fetch_news(&sel.instrument, sel.language).await;
    record("news", &res);
    match res {
        Ok(Some(n)) => publish(state, SnapshotUpdate::News(n), sel.epoch),
        Ok(None) => SlotOutcome::NoData,
        Err(e) => SlotOutcome::Failed(e),
    }
}

async fn poll_commentary(sources: &MarketSources, state: &MarketState, sel: &Selection) -> SlotOutcome {
    let res = sources.fetch_commentary(&sel.instrument, sel.language).await;
    record("commentary", &res);
    match res {
        Ok(Some(c)) => publish(state, SnapshotUpdate::Commentary(c), sel.epoch),
        Ok(None) => SlotOutcome::NoData,
        Err(e) => SlotOutcome::Failed(e),
    }
}

/// One full cycle. The three branches run concurrently and publish as soon as each is done.
pub async fn poll_once(sources: &MarketSources, state: &MarketState, sel: &Selection) -> CycleReport {
    let (market, news, commentary) = tokio::join!(
        poll_market(sources, state, sel),
        poll_news(sources, state, sel),
        poll_commentary(sources, state, sel),
    );
    CycleReport { market, news, commentary }
}

fn log_report(sel: &Selection, report: &CycleReport) {
    for (slot, outcome) in [("market", &report.market), ("news", &report.news), ("commentary", &report.commentary)] {
        match outcome {
            SlotOutcome::Failed(e) => {
                warn!(symbol = %sel.instrument.symbol, slot, error = %e, "fetch failed, keeping previous data")
            }
            SlotOutcome::NoData => debug!(symbol = %sel.instrument.symbol, slot, "no data in response"),
            SlotOutcome::Superseded => debug!(slot, "selection changed, result discarded"),
            SlotOutcome::Published => {}
        }
    }
}

pub struct SnapshotPoller {
    sources: Arc<MarketSources>,
    state: MarketState,
    interval: Duration,
}

impl SnapshotPoller {
    pub fn new(sources: Arc<MarketSources>, state: MarketState, interval: Duration) -> Self {
        Self { sources, state, interval }
    }

    /// Poll on every interval and whenever `selection` changes, until `shutdown` fires
    /// or the selection sender is dropped. Only a selection change cancels a running
    /// cycle; a tick that lands while the cycle is still busy is skipped.
    pub async fn run(self, mut selection: watch::Receiver<Selection>, shutdown: CancellationToken) {
        info!(interval = ?self.interval, "snapshot poller started");
        let mut sel = selection.borrow_and_update().clone();
        let mut cycle = shutdown.child_token();
        let mut running = self.spawn_cycle(sel.clone(), cycle.clone());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {
                    if running.is_finished() {
                        debug!("poll interval elapsed");
                        running = self.spawn_cycle(sel.clone(), cycle.clone());
                    } else {
                        debug!(symbol = %sel.instrument.symbol, "previous poll cycle still running, tick skipped");
                    }
                }
                changed = selection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    info!("selection changed, restarting poll cycle");
                    // siklus untuk selection lama dibatalkan
                    cycle.cancel();
                    sel = selection.borrow_and_update().clone();
                    cycle = shutdown.child_token();
                    running = self.spawn_cycle(sel.clone(), cycle.clone());
                }
            }
        }
        cycle.cancel();
        info!("snapshot poller stopped");
    }

    fn spawn_cycle(&self, sel: Selection, cycle: CancellationToken) -> JoinHandle<()> {
        let sources = self.sources.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            debug!(symbol = %sel.instrument.symbol, currency = %sel.currency, epoch = sel.epoch.0, "poll cycle start");
            tokio::select! {
                _ = cycle.cancelled() => {
                    debug!(symbol = %sel.instrument.symbol, "poll cycle cancelled");
                }
                report = poll_once(&sources, &state, &sel) => log_report(&sel, &report),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use crate::credentials::ApiKeys;
    use crate::domain::{MarketData, PositionParameters};
    use crate::fetcher::testing::ScriptedTransport;
    use crate::fetcher::RetryableFetcher;
    use crate::retry::RetryPolicy;
    use tokio::time::timeout;

    const STATS: &str = r#"[{"name":"Bitcoin","current_price":25000.0,"price_change_percentage_24h":2.5,"market_cap":5e11,"total_volume":2e10}]"#;
    const HISTORY: &str = r#"{"prices":[[1000,24000.0],[2000,25000.0]]}"#;

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        sources: Arc<MarketSources>,
        state: MarketState,
        endpoints: Endpoints,
    }

    fn btc() -> Instrument {
        Instrument::new("bitcoin", "BTC")
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let endpoints = Endpoints::default();
        let sources = Arc::new(MarketSources::new(
            RetryableFetcher::new(transport.clone(), RetryPolicy::default()),
            endpoints.clone(),
            ApiKeys { news: "n".into(), commentary: "c".into() },
        ));
        let state = MarketState::new(btc(), PositionParameters::default());
        Fixture { transport, sources, state, endpoints }
    }

    impl Fixture {
        fn markets(&self) -> String {
            self.sources.markets_url()
        }
        fn history(&self) -> String {
            self.sources.history_url(&btc())
        }
        fn selection(&self, currency: &str) -> Selection {
            Selection {
                instrument: btc(),
                currency: currency.into(),
                language: Language::En,
                epoch: self.state.selection_epoch(),
            }
        }
    }

    fn old_market() -> MarketData {
        MarketData {
            name: Some("Bitcoin".into()),
            current_price: Some(1.0),
            change_24h_pct: None,
            market_cap: None,
            volume_24h: None,
            history: vec![],
            currency: "USD".into(),
        }
    }

    #[tokio::test]
    async fn full_cycle_publishes_every_slot() {
        let f = fixture();
        f.transport.ok(&f.markets(), STATS).ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[{"title":"n1"}]}"#);
        f.transport.ok(&f.endpoints.commentary, r#"{"Data":[{"title":"c1"},{"title":"c2"}]}"#);

        let report = poll_once(&f.sources, &f.state, &f.selection("usd")).await;
        assert_eq!(report.market, SlotOutcome::Published);
        assert_eq!(report.news, SlotOutcome::Published);
        assert_eq!(report.commentary, SlotOutcome::Published);

        let snap = f.state.current_view().snapshot;
        let market = snap.market.unwrap();
        assert_eq!(market.current_price, Some(25000.0));
        assert_eq!(market.history.len(), 2);
        assert_eq!(market.currency, "USD");
        assert_eq!(snap.news.unwrap().items, vec!["n1".to_string()]);
        assert_eq!(snap.commentary.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn history_failure_keeps_previous_market_slot() {
        let f = fixture();
        f.state.apply(SnapshotUpdate::Market(old_market()), f.state.selection_epoch());
        f.transport.ok(&f.markets(), STATS).status(&f.history(), 500);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[{"title":"fresh"}]}"#);
        f.transport.status(&f.endpoints.commentary, 401);

        let report = poll_once(&f.sources, &f.state, &f.selection("usd")).await;
        assert!(matches!(report.market, SlotOutcome::Failed(FetchError::Http { status: 500, .. })));
        assert_eq!(report.news, SlotOutcome::Published);
        assert!(matches!(report.commentary, SlotOutcome::Failed(_)));

        let snap = f.state.current_view().snapshot;
        // stats from this cycle are not mixed with the old history
        assert_eq!(snap.market.unwrap().current_price, Some(1.0));
        assert_eq!(snap.news.unwrap().items, vec!["fresh".to_string()]);
        assert!(snap.commentary.is_none());
    }

    #[tokio::test]
    async fn stats_failure_skips_history() {
        let f = fixture();
        f.transport.push(&f.markets(), Err(FetchError::Transport("dns".into())));
        f.transport.ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{}"#).ok(&f.endpoints.commentary, r#"{"Data":[]}"#);

        let report = poll_once(&f.sources, &f.state, &f.selection("usd")).await;
        assert_eq!(report.market, SlotOutcome::Failed(FetchError::Transport("dns".into())));
        assert_eq!(report.news, SlotOutcome::NoData);
        assert_eq!(report.commentary, SlotOutcome::Published);
        assert_eq!(f.transport.call_count(&f.history()), 0);
        assert!(f.state.current_view().snapshot.market.is_none());
    }

    #[tokio::test]
    async fn empty_stats_is_no_data() {
        let f = fixture();
        f.transport.ok(&f.markets(), "[]").ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, "{}").ok(&f.endpoints.commentary, "{}");

        let report = poll_once(&f.sources, &f.state, &f.selection("usd")).await;
        assert_eq!(report.market, SlotOutcome::NoData);
    }

    #[tokio::test]
    async fn results_for_an_old_selection_are_discarded() {
        let f = fixture();
        f.transport.ok(&f.markets(), STATS).ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[]}"#);
        f.transport.ok(&f.endpoints.commentary, r#"{"Data":[]}"#);

        let stale = f.selection("usd");
        f.state.bump_selection();
        let report = poll_once(&f.sources, &f.state, &stale).await;
        assert_eq!(report.market, SlotOutcome::Superseded);
        assert_eq!(report.news, SlotOutcome::Superseded);
        assert!(f.state.current_view().snapshot.market.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn selection_change_cancels_backoff_and_repolls() {
        let f = fixture();
        // siklus pertama kena 429 lalu tidur 5s; siklus kedua dapat 200
        f.transport.status(&f.markets(), 429).ok(&f.markets(), STATS).ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[]}"#);
        f.transport.ok(&f.endpoints.commentary, r#"{"Data":[]}"#);

        let (sel_tx, sel_rx) = watch::channel(f.selection("usd"));
        let shutdown = CancellationToken::new();
        let poller = SnapshotPoller::new(f.sources.clone(), f.state.clone(), Duration::from_secs(1800));
        let task = tokio::spawn(poller.run(sel_rx, shutdown.clone()));

        // biarkan siklus pertama sampai ke backoff
        while f.transport.call_count(&f.markets()) == 0 {
            tokio::task::yield_now().await;
        }
        let epoch = f.state.bump_selection();
        sel_tx
            .send(Selection { instrument: btc(), currency: "eur".into(), language: Language::De, epoch })
            .unwrap();

        let mut views = f.state.subscribe_channel();
        let market = loop {
            let v = timeout(Duration::from_secs(60), views.recv()).await.unwrap().unwrap();
            if let Some(m) = v.snapshot.market {
                break m;
            }
        };
        assert_eq!(market.currency, "EUR");

        // jauh melewati backoff siklus lama: tidak ada retry untuk "usd"
        sleep(Duration::from_secs(30)).await;
        let usd_calls = f
            .transport
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, p)| *u == f.markets() && p.contains(&("vs_currency", "usd".to_string())))
            .count();
        assert_eq!(usd_calls, 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn polls_again_after_interval() {
        let f = fixture();
        f.transport.ok(&f.markets(), STATS).ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[]}"#);
        f.transport.ok(&f.endpoints.commentary, r#"{"Data":[]}"#);

        let (_sel_tx, sel_rx) = watch::channel(f.selection("usd"));
        let shutdown = CancellationToken::new();
        let poller = SnapshotPoller::new(f.sources.clone(), f.state.clone(), Duration::from_secs(1800));
        let task = tokio::spawn(poller.run(sel_rx, shutdown.clone()));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(f.transport.call_count(&f.endpoints.news), 1);
        sleep(Duration::from_secs(1800)).await;
        assert_eq!(f.transport.call_count(&f.endpoints.news), 2);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_outlives_short_interval() {
        let f = fixture();
        // satu siklus butuh 24s (stats 12s lalu histori 12s), interval cuma 10s
        f.transport.ok(&f.markets(), STATS).ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[{"title":"n"}]}"#);
        f.transport.ok(&f.endpoints.commentary, r#"{"Data":[]}"#);
        for url in [f.markets(), f.history(), f.endpoints.news.clone(), f.endpoints.commentary.clone()] {
            f.transport.latency(&url, Duration::from_secs(12));
        }

        let (_sel_tx, sel_rx) = watch::channel(f.selection("usd"));
        let shutdown = CancellationToken::new();
        let poller = SnapshotPoller::new(f.sources.clone(), f.state.clone(), Duration::from_secs(10));
        let task = tokio::spawn(poller.run(sel_rx, shutdown.clone()));

        sleep(Duration::from_secs(45)).await;
        let snap = f.state.current_view().snapshot;
        assert!(snap.market.is_some());
        assert!(snap.news.is_some());
        assert!(snap.commentary.is_some());
        // t=0 and t=30; the ticks at 10s and 20s found the first cycle busy
        assert_eq!(f.transport.call_count(&f.endpoints.news), 2);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_news_does_not_hold_back_market() {
        let f = fixture();
        f.transport.ok(&f.markets(), STATS).ok(&f.history(), HISTORY);
        f.transport.ok(&f.endpoints.news, r#"{"articles":[{"title":"late"}]}"#);
        f.transport.ok(&f.endpoints.commentary, r#"{"Data":[]}"#);
        f.transport.latency(&f.endpoints.news, Duration::from_secs(600));

        let (_sel_tx, sel_rx) = watch::channel(f.selection("usd"));
        let shutdown = CancellationToken::new();
        let poller = SnapshotPoller::new(f.sources.clone(), f.state.clone(), Duration::from_secs(1800));
        let task = tokio::spawn(poller.run(sel_rx, shutdown.clone()));

        sleep(Duration::from_secs(1)).await;
        let snap = f.state.current_view().snapshot;
        assert!(snap.market.is_some());
        assert!(snap.commentary.is_some());
        assert!(snap.news.is_none());

        sleep(Duration::from_secs(600)).await;
        assert_eq!(f.state.current_view().snapshot.news.unwrap().items, vec!["late".to_string()]);

        shutdown.cancel();
        task.await.unwrap();
    }
}
