// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

/// Failure of a single REST fetch after the retry loop has finished with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited, gave up after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("invalid json body: {0}")]
    Decode(String),
}

impl FetchError {
    /// Label used for the `fetch_total{outcome=..}` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Http { .. } => "http",
            FetchError::RateLimitExhausted { .. } => "rate_limited",
            FetchError::Decode(_) => "decode",
        }
    }
}

/// Errors that abort the process before any worker is spawned.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing API key: {0}")]
    MissingCredential(&'static str),
    #[error("cannot read credentials: {0}")]
    InvalidCredentials(String),
}
