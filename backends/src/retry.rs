use async_trait::async_trait;
use bytes::Bytes;
use pinsnap_core::{Error, Fetcher, Result, Unpinner, UploadOptions, UploadReceipt, Uploader};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy for [`Retrying`] and [`retry_with_backoff`].
///
/// The delay before retry `n` (0-based) is `base_delay * multiplier^n`, capped
/// at `max_delay`. With `jitter` up to a quarter of that delay is added.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total calls, including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Gateway reads and local stores.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Pinning uploads, where a lost backup costs more than waiting.
    pub fn persistent() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            ..Default::default()
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(self.multiplier.saturating_pow(retry))
            .min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "rate limit",
    "temporarily unavailable",
    "try again",
    "connection reset",
    "failed to reach",
    "error sending request",
];

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Backend(msg) => is_transient(msg),
            _ => false,
        }
    }
}

/// A backend message carrying an HTTP status is judged by the status alone:
/// 408, 429 and 5xx are transient. Otherwise known transport failures are.
fn is_transient(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    match http_status(&message) {
        Some(code) => code == 408 || code == 429 || (500..600).contains(&code),
        None => TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker)),
    }
}

fn http_status(message: &str) -> Option<u16> {
    let (_, rest) = message.split_once("status ")?;
    rest.get(..3)?.parse().ok()
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` calls have been made.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(operation = operation_name, retries, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                debug!(operation = operation_name, error = %error, "Not retrying");
                return Err(error);
            }
            Err(error) if retries + 1 >= max_attempts => {
                warn!(operation = operation_name, max_attempts, error = %error, "Giving up");
                return Err(error);
            }
            Err(error) => {
                let delay = config.delay_for(retries);
                retries += 1;
                warn!(
                    operation = operation_name,
                    attempt = retries,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Wraps a backend and retries transient failures of each capability it has.
pub struct Retrying<B> {
    inner: B,
    config: RetryConfig,
}

impl<B> Retrying<B> {
    pub fn new(inner: B, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<B: Uploader> Uploader for Retrying<B> {
    async fn upload(&self, payload: Bytes, options: &UploadOptions) -> Result<UploadReceipt> {
        retry_with_backoff(&self.config, "upload", || {
            self.inner.upload(payload.clone(), options)
        })
        .await
    }
}

#[async_trait]
impl<B: Fetcher> Fetcher for Retrying<B> {
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        retry_with_backoff(&self.config, "fetch", || self.inner.fetch(id)).await
    }
}

#[async_trait]
impl<B: Unpinner> Unpinner for Retrying<B> {
    async fn unpin(&self, id: &str) -> Result<bool> {
        retry_with_backoff(&self.config, "unpin", || self.inner.unpin(id)).await
    }
}
