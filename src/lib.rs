// ===============================
// src/lib.rs
// ===============================
pub mod binance;
pub mod config;
pub mod console;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod metrics;
pub mod pnl;
pub mod poller;
pub mod retry;
pub mod sources;
pub mod state;
pub mod tracker;
