// ===============================
// src/state.rs (shared market view)
// ===============================
//
// Satu-satunya titik mutasi. Semua worker (feed, poller) menulis ke sini,
// konsumen hanya membaca lewat `current_view()` atau subscribe.
//
// - feed epoch      : dinaikkan tiap feed baru start; trade dari epoch lama ditolak
// - selection epoch : dinaikkan tiap ganti koin/currency/bahasa; publish poller lama ditolak
// - notifikasi dikirim di dalam lock, jadi urutan per subscriber = urutan update
//
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{
    Instrument, LiveTrade, MarketSnapshot, MarketView, PositionParameters, SnapshotUpdate,
};
use crate::metrics::{LAST_PRICE, PROFIT, SNAPSHOT_PUBLISHED, TRADES, TRADES_STALE};
use crate::pnl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedEpoch(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SelectionEpoch(pub u64);

struct Inner {
    instrument: Instrument,
    feed_epoch: u64,
    selection_epoch: u64,
    snapshot: MarketSnapshot,
    trade: Option<LiveTrade>,
    position: PositionParameters,
    subscribers: Vec<mpsc::UnboundedSender<MarketView>>,
}

impl Inner {
    fn view(&self) -> MarketView {
        let pnl = self.trade.map(|t| pnl::evaluate_position(t.price, &self.position));
        MarketView {
            instrument: self.instrument.clone(),
            trade: self.trade,
            snapshot: self.snapshot.clone(),
            position: self.position.clone(),
            pnl,
        }
    }

    fn notify(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let view = self.view();
        // buang subscriber yang receiver-nya sudah di-drop
        self.subscribers.retain(|tx| tx.send(view.clone()).is_ok());
    }
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct MarketState {
    inner: Arc<Mutex<Inner>>,
}

impl MarketState {
    pub fn new(instrument: Instrument, position: PositionParameters) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                instrument,
                feed_epoch: 0,
                selection_epoch: 0,
                snapshot: MarketSnapshot::default(),
                trade: None,
                position,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // poisoned lock: data tetap konsisten karena tiap update adalah replace utuh
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch instrument: drops snapshot + trade and invalidates every running feed and poll cycle.
    pub fn select_instrument(&self, instrument: Instrument) -> SelectionEpoch {
        let mut g = self.lock();
        g.instrument = instrument;
        g.snapshot = MarketSnapshot::default();
        g.trade = None;
        g.feed_epoch += 1;
        g.selection_epoch += 1;
        let epoch = SelectionEpoch(g.selection_epoch);
        g.notify();
        epoch
    }

    /// Invalidate in-flight poll cycles without discarding stale-but-present slots.
    pub fn bump_selection(&self) -> SelectionEpoch {
        let mut g = self.lock();
        g.selection_epoch += 1;
        SelectionEpoch(g.selection_epoch)
    }

    pub fn selection_epoch(&self) -> SelectionEpoch {
        SelectionEpoch(self.lock().selection_epoch)
    }

    /// New feed generation; trades stamped with older epochs are dropped from now on.
    pub fn begin_feed(&self) -> FeedEpoch {
        let mut g = self.lock();
        g.feed_epoch += 1;
        FeedEpoch(g.feed_epoch)
    }

    /// Called on `stop()`: if `epoch` is still current, move past it so late trades are refused.
    pub fn retire_feed(&self, epoch: FeedEpoch) {
        let mut g = self.lock();
        if g.feed_epoch == epoch.0 {
            g.feed_epoch += 1;
        }
    }

    pub fn feed_epoch(&self) -> FeedEpoch {
        FeedEpoch(self.lock().feed_epoch)
    }

    /// Returns false (and fires nothing) when `epoch` is not the current feed epoch.
    pub fn update_trade(&self, trade: LiveTrade, epoch: FeedEpoch) -> bool {
        let mut g = self.lock();
        if epoch.0 != g.feed_epoch {
            TRADES_STALE.inc();
            debug!(epoch = epoch.0, current = g.feed_epoch, "stale feed epoch, trade dropped");
            return false;
        }
        g.trade = Some(trade);
        TRADES.inc();
        LAST_PRICE.set(trade.price);
        PROFIT.set(pnl::evaluate_position(trade.price, &g.position).profit);
        g.notify();
        true
    }

    /// Wholesale replacement of all snapshot slots.
    pub fn update_snapshot(&self, snapshot: MarketSnapshot, epoch: SelectionEpoch) -> bool {
        let mut g = self.lock();
        if epoch.0 != g.selection_epoch {
            debug!(epoch = epoch.0, current = g.selection_epoch, "stale selection, snapshot dropped");
            return false;
        }
        g.snapshot = snapshot;
        SNAPSHOT_PUBLISHED.with_label_values(&["all"]).inc();
        g.notify();
        true
    }

    /// Replace one slot; the other slots are left as they are.
    pub fn apply(&self, update: SnapshotUpdate, epoch: SelectionEpoch) -> bool {
        let mut g = self.lock();
        if epoch.0 != g.selection_epoch {
            debug!(slot = update.slot(), epoch = epoch.0, current = g.selection_epoch, "stale selection, slot update dropped");
            return false;
        }
        SNAPSHOT_PUBLISHED.with_label_values(&[update.slot()]).inc();
        match update {
            SnapshotUpdate::Market(m) => g.snapshot.market = Some(Arc::new(m)),
            SnapshotUpdate::News(n) => g.snapshot.news = Some(Arc::new(n)),
            SnapshotUpdate::Commentary(c) => g.snapshot.commentary = Some(Arc::new(c)),
        }
        g.notify();
        true
    }

    pub fn set_position(&self, position: PositionParameters) {
        let mut g = self.lock();
        if let Some(t) = g.trade {
            PROFIT.set(pnl::evaluate_position(t.price, &position).profit);
        }
        g.position = position;
        g.notify();
    }

    pub fn position(&self) -> PositionParameters {
        self.lock().position.clone()
    }

    pub fn current_view(&self) -> MarketView {
        self.lock().view()
    }

    /// Ordered stream of combined views, one per accepted update.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<MarketView> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Invoke `callback` for every update, in update order, on a tokio task.
    /// Marshaling onto a UI thread is the callback's business.
    pub fn subscribe<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(MarketView) + Send + 'static,
    {
        let mut rx = self.subscribe_channel();
        tokio::spawn(async move {
            while let Some(view) = rx.recv().await {
                callback(view);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
