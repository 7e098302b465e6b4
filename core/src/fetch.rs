//! The physical I/O seam and the retrying fetch primitive.
//!
//! # Design
//! `Fetch` performs exactly one physical attempt. `fetch_with_retry` layers
//! per-attempt timeouts and a bounded retry budget on top of it:
//!
//! - attempts are strictly sequential, so a non-idempotent POST never races
//!   its own retry;
//! - only timer-driven aborts are retried, any other failure is returned
//!   as-is;
//! - the caller's cancellation token stops the in-flight attempt and ends
//!   the request without retrying;
//! - once every attempt has timed out the result is a synthetic 408
//!   response rather than an error.
//!
//! With a budget of zero the attempt is issued once and its failure,
//! including a timeout, propagates unchanged.
//!
//! Each attempt races the fetch future against its own timer inside
//! `tokio::select!`; whichever side loses is dropped, which clears the
//! timer or stops the fetch.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::http::{FetchRequest, RawResponse};

/// Executes one physical HTTP request.
///
/// Implementations should stop promptly when `signal` is cancelled and
/// return `FetchError::Aborted`.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        signal: CancellationToken,
    ) -> Result<RawResponse, FetchError>;
}

/// How the per-attempt timeout grows after a timed-out attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backoff {
    /// Attempt `d` (d >= 1) waits `previous + base * ln(2)^d`.
    #[default]
    LogTwo,
    /// Every attempt waits `base`.
    Constant,
}

impl Backoff {
    /// Timeout for attempt `depth`, given the timeout of the previous one.
    pub fn next_timeout(&self, base: Duration, previous: Duration, depth: u32) -> Duration {
        match self {
            Backoff::LogTwo => {
                let growth = base.mul_f64(std::f64::consts::LN_2.powi(depth as i32));
                previous + growth
            }
            Backoff::Constant => base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed beyond the first.
    pub retries: u32,
    /// Timeout of the first attempt; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        Self {
            retries,
            timeout: Some(timeout),
            backoff: Backoff::default(),
        }
    }

    /// A single attempt with no retries, bounded by `timeout` if given.
    pub fn single(timeout: Option<Duration>) -> Self {
        Self {
            retries: 0,
            timeout,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(12_000))
    }
}

/// Issue `request` under `policy`, honouring the caller's `signal`.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetch,
    request: FetchRequest,
    policy: &RetryPolicy,
    signal: Option<&CancellationToken>,
) -> Result<RawResponse, FetchError> {
    let caller = signal.cloned().unwrap_or_default();

    if policy.retries == 0 {
        return attempt(fetcher, request, policy.timeout, &caller).await;
    }

    let base = policy.timeout;
    let mut timeout = base;
    for depth in 0..=policy.retries {
        if depth > 0 {
            if let Some(base) = base {
                let previous = timeout.unwrap_or(base);
                timeout = Some(policy.backoff.next_timeout(base, previous, depth));
            }
        }
        match attempt(fetcher, request.clone(), timeout, &caller).await {
            Ok(response) => return Ok(response),
            Err(FetchError::TimedOut(elapsed)) => {
                warn!(
                    method = %request.method,
                    url = %request.url,
                    attempt = depth + 1,
                    max_attempts = policy.retries + 1,
                    timeout_ms = elapsed.as_millis() as u64,
                    "attempt timed out"
                );
            }
            Err(err) => return Err(err),
        }
    }

    debug!(
        method = %request.method,
        url = %request.url,
        attempts = policy.retries + 1,
        "retry budget exhausted"
    );
    Ok(RawResponse::timeout(request.url))
}

/// One physical attempt bounded by `timeout` and the caller's token.
async fn attempt(
    fetcher: &dyn Fetch,
    request: FetchRequest,
    timeout: Option<Duration>,
    caller: &CancellationToken,
) -> Result<RawResponse, FetchError> {
    if caller.is_cancelled() {
        return Err(FetchError::Aborted);
    }

    let controller = caller.child_token();
    let fetch = fetcher.fetch(request, controller.clone());
    let timer = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = fetch => result,
        _ = caller.cancelled() => Err(FetchError::Aborted),
        _ = timer => {
            controller.cancel();
            Err(FetchError::TimedOut(timeout.unwrap_or_default()))
        }
    }
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(
        &self,
        request: FetchRequest,
        signal: CancellationToken,
    ) -> Result<RawResponse, FetchError> {
        let mut builder = self
            .client
            .request(http::Method::from(request.method), &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = tokio::select! {
            result = builder.send() => result.map_err(|e| FetchError::Network(e.to_string()))?,
            _ = signal.cancelled() => return Err(FetchError::Aborted),
        };

        let status = response.status();
        let url = response.url().to_string();
        let redirected = url != request.url;
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(|e| FetchError::Network(e.to_string()));

        Ok(RawResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            url,
            redirected,
            body: Some(Box::pin(body)),
        })
    }
}
