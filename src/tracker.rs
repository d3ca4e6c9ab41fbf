// ===============================
// src/tracker.rs
// ===============================
//
// Facade untuk presentation layer:
//   select_instrument / set_currency / set_language / set_position_parameters
//   subscribe / current_view
// Memegang feed aktif (maks satu) dan channel selection ke poller.
//
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{default_currency_for, FeedConfig};
use crate::domain::{Instrument, Language, MarketView, PositionParameters};
use crate::feed::FeedHandle;
use crate::poller::{Selection, SnapshotPoller};
use crate::sources::MarketSources;
use crate::state::MarketState;

pub struct Tracker {
    state: MarketState,
    feed_cfg: FeedConfig,
    feed: Option<FeedHandle>,
    language: Language,
    selection_tx: watch::Sender<Selection>,
    cancel: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

impl Tracker {
    /// Spawns the feed for `instrument` and the snapshot poller. Must run inside a tokio runtime.
    pub fn start(
        sources: Arc<MarketSources>,
        feed_cfg: FeedConfig,
        poll_interval: std::time::Duration,
        instrument: Instrument,
        language: Language,
        position: PositionParameters,
    ) -> Self {
        let currency = position.currency.clone();
        let state = MarketState::new(instrument.clone(), position);

        let selection = Selection {
            instrument: instrument.clone(),
            currency,
            language,
            epoch: state.selection_epoch(),
        };
        let (selection_tx, selection_rx) = watch::channel(selection);

        let shutdown = CancellationToken::new();
        let poller = SnapshotPoller::new(sources, state.clone(), poll_interval);
        let poller = tokio::spawn(poller.run(selection_rx, shutdown.clone()));

        let feed = FeedHandle::start(instrument, state.clone(), feed_cfg.clone());

        Self { state, feed_cfg, feed: Some(feed), language, selection_tx, cancel: shutdown, poller: Some(poller) }
    }

    fn publish_selection(&self, epoch: crate::state::SelectionEpoch) {
        let view = self.state.current_view();
        let selection = Selection {
            instrument: view.instrument,
            currency: view.position.currency,
            language: self.language,
            epoch,
        };
        // send_replace: tetap jalan walau poller sudah berhenti
        self.selection_tx.send_replace(selection);
    }

    /// Stop the old feed, reset market state, start a new feed and re-poll right away.
    pub fn select_instrument(&mut self, instrument: Instrument) {
        if let Some(old) = self.feed.take() {
            old.stop();
        }
        info!(%instrument, "instrument selected");
        let epoch = self.state.select_instrument(instrument.clone());
        self.feed = Some(FeedHandle::start(instrument, self.state.clone(), self.feed_cfg.clone()));
        self.publish_selection(epoch);
    }

    /// Changes the quote currency and re-polls. Slots keep their old data until the new poll lands.
    pub fn set_currency(&mut self, code: &str) {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return;
        }
        let mut position = self.state.position();
        position.currency = code.clone();
        self.state.set_position(position);
        info!(currency = %code, "currency selected");
        let epoch = self.state.bump_selection();
        self.publish_selection(epoch);
    }

    /// Language only reaches the news/commentary params; it also resets the
    /// quote currency to the language's default.
    pub fn set_language(&mut self, language: Language) {
        self.language = language;
        let mut position = self.state.position();
        position.currency = default_currency_for(language).to_string();
        self.state.set_position(position);
        info!(%language, currency = default_currency_for(language), "language selected");
        let epoch = self.state.bump_selection();
        self.publish_selection(epoch);
    }

    pub fn set_position_parameters(&self, investment: f64, purchase_price: f64, stop_price: f64) {
        let mut position = self.state.position();
        position.investment = investment;
        position.purchase_price = purchase_price;
        position.stop_price = stop_price;
        self.state.set_position(position);
    }

    pub fn subscribe<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(MarketView) + Send + 'static,
    {
        self.state.subscribe(callback)
    }

    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<MarketView> {
        self.state.subscribe_channel()
    }

    pub fn current_view(&self) -> MarketView {
        self.state.current_view()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    /// Stop feed + poller and wait for both to wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(feed) = self.feed.take() {
            feed.shutdown().await;
        }
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }
        info!("tracker stopped");
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
