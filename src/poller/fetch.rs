// Live-status fetch: trait seam for the poller plus the reqwest implementation.

use crate::models::{LiveStatus, PollTarget};
use std::time::Duration;
use thiserror::Error;

/// Why a single poll failed. Every variant feeds the failure streak; the
/// distinction is for logging and for "reachable but useless" payloads.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// One remote call per poll. Injectable so tests can script outcomes.
pub trait StatusFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        target: &PollTarget,
        timeout: Duration,
    ) -> impl Future<Output = Result<LiveStatus, FetchError>> + Send;
}

pub struct HttpStatusFetcher {
    client: reqwest::Client,
}

impl Default for HttpStatusFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpStatusFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl StatusFetcher for HttpStatusFetcher {
    async fn fetch(
        &self,
        target: &PollTarget,
        timeout: Duration,
    ) -> Result<LiveStatus, FetchError> {
        let mut req = self.client.get(target.status_url()).timeout(timeout);
        if let Some(token) = &target.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json::<LiveStatus>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Malformed(e.to_string())
    } else {
        FetchError::Connect(e.to_string())
    }
}
