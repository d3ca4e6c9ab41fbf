// ===============================
// src/fetcher.rs
// ===============================
//
// RetryableFetcher: satu GET + retry khusus HTTP 429.
// - 429            : tidur sesuai RetryPolicy, lalu coba lagi (maks max_attempts)
// - status gagal   : langsung Http{status, body}, tidak di-retry
// - transport gagal: langsung Transport, tidak di-retry
// Logging kegagalan final adalah urusan pemanggil (poller).
//
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::error::FetchError;
use crate::metrics::RATE_LIMITED;
use crate::retry::RetryPolicy;

pub type QueryParams = Vec<(&'static str, String)>;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the retry loop and the actual HTTP client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, params: &[(&'static str, String)]) -> Result<HttpResponse, FetchError>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn get(&self, url: &str, params: &[(&'static str, String)]) -> Result<HttpResponse, FetchError> {
        let rsp = reqwest::Client::get(self, url)
            .query(params)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = rsp.status().as_u16();
        let body = rsp.text().await.map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("coinwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!(?e, "http client builder failed, using defaults");
            reqwest::Client::new()
        })
}

#[derive(Clone)]
pub struct RetryableFetcher {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryableFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// GET `url` with `params` and decode the body as JSON.
    pub async fn fetch(&self, url: &str, params: &[(&'static str, String)]) -> Result<Value, FetchError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let rsp = self.transport.get(url, params).await?;

            if rsp.status == 429 {
                RATE_LIMITED.inc();
                if !self.policy.should_retry(attempts) {
                    return Err(FetchError::RateLimitExhausted { attempts });
                }
                let delay = self.policy.delay_for(attempts - 1);
                warn!(%url, attempt = attempts, ?delay, "rate limited, backing off");
                sleep(delay).await;
                continue;
            }

            if !(200..300).contains(&rsp.status) {
                return Err(FetchError::Http { status: rsp.status, body: rsp.body });
            }

            return serde_json::from_str(&rsp.body).map_err(|e| FetchError::Decode(e.to_string()));
        }
    }
}
