// ===============================
// src/console.rs
// ===============================
//
// Driver baris perintah (stdin):
//   coin <TICKER> | currency <CODE> | lang <CODE>
//   position <investment> <purchase> <stop> | show | quit
//
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::config::{find_instrument, parse_amount};
use crate::domain::{Instrument, Language, MarketSnapshot, MarketView, PnlStatus, PositionParameters};
use crate::tracker::Tracker;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Coin(Instrument),
    Currency(String),
    Lang(Language),
    Position { investment: f64, purchase_price: f64, stop_price: f64 },
    Show,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown coin `{0}`")]
    UnknownCoin(String),
    #[error("unsupported language `{0}`")]
    UnknownLanguage(String),
}

/// Empty/blank lines are `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let cmd = match head.to_ascii_lowercase().as_str() {
        "coin" => {
            let [key] = args[..] else {
                return Err(CommandError::Usage("coin <TICKER>"));
            };
            let inst = find_instrument(key).ok_or_else(|| CommandError::UnknownCoin(key.to_string()))?;
            Command::Coin(inst)
        }
        "currency" => {
            let [code] = args[..] else {
                return Err(CommandError::Usage("currency <CODE>"));
            };
            Command::Currency(code.to_ascii_uppercase())
        }
        "lang" => {
            let [code] = args[..] else {
                return Err(CommandError::Usage("lang <en|tr|fr|de|es|ru>"));
            };
            let lang = Language::parse(code).ok_or_else(|| CommandError::UnknownLanguage(code.to_string()))?;
            Command::Lang(lang)
        }
        "position" => {
            let [inv, buy, stop] = args[..] else {
                return Err(CommandError::Usage("position <investment> <purchase> <stop>"));
            };
            Command::Position {
                investment: parse_amount(inv),
                purchase_price: parse_amount(buy),
                stop_price: parse_amount(stop),
            }
        }
        "show" => Command::Show,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

/// One-line summary of a combined view.
pub fn describe(view: &MarketView) -> String {
    let cur = &view.position.currency;
    let price = view
        .price()
        .map(|p| format!("{p:.2}"))
        .unwrap_or_else(|| "-".to_string());
    let change = view
        .snapshot
        .market
        .as_ref()
        .and_then(|m| m.change_24h_pct)
        .map(|c| format!("{c:+.2}%"))
        .unwrap_or_else(|| "-".to_string());
    let pnl = match &view.pnl {
        Some(r) => format!("{:.2} {cur} ({})", r.profit, r.status.label()),
        None => "-".to_string(),
    };
    let news = view.snapshot.news.as_ref().map(|n| n.items.len()).unwrap_or(0);
    let commentary = view.snapshot.commentary.as_ref().map(|c| c.items.len()).unwrap_or(0);
    format!(
        "{} price={price} 24h={change} pnl={pnl} news={news} commentary={commentary}",
        view.instrument
    )
}

fn same_slot<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// Remembers the last logged view so plain price ticks can go to `debug!`.
#[derive(Default)]
pub struct ViewLog {
    instrument: Option<Instrument>,
    position: Option<PositionParameters>,
    status: Option<PnlStatus>,
    snapshot: MarketSnapshot,
}

impl ViewLog {
    /// True when something other than the trade price moved: instrument,
    /// position, PnL status, or any snapshot slot.
    pub fn is_notable(&mut self, view: &MarketView) -> bool {
        let status = view.pnl.map(|p| p.status);
        let notable = self.instrument.as_ref() != Some(&view.instrument)
            || self.position.as_ref() != Some(&view.position)
            || self.status != status
            || !same_slot(&self.snapshot.market, &view.snapshot.market)
            || !same_slot(&self.snapshot.news, &view.snapshot.news)
            || !same_slot(&self.snapshot.commentary, &view.snapshot.commentary);
        if notable {
            self.instrument = Some(view.instrument.clone());
            self.position = Some(view.position.clone());
            self.status = status;
            self.snapshot = view.snapshot.clone();
        }
        notable
    }

    /// `info!` for notable views, `debug!` for bare price ticks.
    pub fn log(&mut self, view: &MarketView) {
        if self.is_notable(view) {
            info!("{}", describe(view));
        } else {
            debug!("{}", describe(view));
        }
    }
}

/// Applies a parsed command. Returns false when the driver should exit.
pub fn apply(tracker: &mut Tracker, cmd: Command) -> bool {
    match cmd {
        Command::Coin(inst) => tracker.select_instrument(inst),
        Command::Currency(code) => tracker.set_currency(&code),
        Command::Lang(lang) => tracker.set_language(lang),
        Command::Position { investment, purchase_price, stop_price } => {
            tracker.set_position_parameters(investment, purchase_price, stop_price)
        }
        Command::Show => {
            let view = tracker.current_view();
            info!("{}", describe(&view));
            if let Some(news) = &view.snapshot.news {
                for title in &news.items {
                    info!(source = %news.source, "{title}");
                }
            }
            if let Some(c) = &view.snapshot.commentary {
                for title in &c.items {
                    info!(source = %c.source, "{title}");
                }
            }
        }
        Command::Quit => return false,
    }
    true
}

/// Reads commands until `quit` or EOF.
pub async fn run<R>(tracker: &mut Tracker, reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                warn!(?e, "stdin read failed");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                if !apply(tracker, cmd) {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{e}"),
        }
    }
}
