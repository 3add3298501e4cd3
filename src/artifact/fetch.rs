//! Downloading remote artifacts.
//!
//! The cache talks to the network through the [`Fetcher`] trait so tests can
//! substitute an in-memory implementation. [`HttpFetcher`] is the real one:
//! it retries connection failures and transient HTTP statuses with
//! exponential backoff.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ArtifactError, ArtifactResult};
use crate::config::HttpConfig;

/// HTTP statuses worth retrying.
const RETRY_STATUSES: [u16; 5] = [413, 429, 500, 503, 504];

/// Downloads one URL into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Writes the body of `url` to `dest`, replacing its contents.
    ///
    /// Returns the number of bytes written.
    async fn fetch(&self, url: &Url, dest: &Path) -> ArtifactResult<u64>;
}

/// Outcome of a single attempt.
enum Attempt {
    Retryable(String),
    Fatal(String),
}

/// [`Fetcher`] backed by `reqwest`.
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    /// Builds a fetcher from the `[http]` configuration section.
    pub fn new(config: &HttpConfig) -> ArtifactResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("bootrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(std::io::Error::other)?;

        Ok(Self {
            client,
            retries: config.retries,
            backoff: Duration::from_secs(config.backoff_secs),
        })
    }

    /// Delay before the `attempt`-th retry (1-based).
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    async fn fetch_once(&self, url: &Url, dest: &Path) -> Result<u64, Attempt> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Attempt::Retryable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {}", status);
            return Err(if RETRY_STATUSES.contains(&status.as_u16()) {
                Attempt::Retryable(reason)
            } else {
                Attempt::Fatal(reason)
            });
        }

        let fatal = |e: std::io::Error| Attempt::Fatal(e.to_string());
        let mut file = tokio::fs::File::create(dest).await.map_err(fatal)?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Attempt::Retryable(e.to_string()))?
        {
            file.write_all(&chunk).await.map_err(fatal)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(fatal)?;

        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, dest: &Path) -> ArtifactResult<u64> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, dest).await {
                Ok(written) => {
                    debug!("Fetched {} bytes from {}", written, url);
                    return Ok(written);
                }
                Err(Attempt::Retryable(reason)) if attempt < self.retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(
                        "Fetching {} failed ({}), retry {}/{} in {:?}",
                        url, reason, attempt, self.retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Retryable(reason)) | Err(Attempt::Fatal(reason)) => {
                    return Err(ArtifactError::Fetch {
                        url: url.to_string(),
                        reason,
                    });
                }
            }
        }
    }
}
