//! HTTP page retrieval with retry and backoff.
//!
//! The fetcher behaves like a browser tab that never closes: it keeps a
//! pooled keep-alive connection per source, sends browser-like headers,
//! cancels requests that exceed the timeout, and retries failures according
//! to a [`RetryPolicy`]. Listing pages use an unbounded policy (2s, 4s, 8s,
//! then every 10 minutes) because the poller is a long-lived background
//! job; article pages use a bounded one.
//!
//! Every attempt, successful or not, is reported to the [`Monitor`].

use crate::errors::FetchError;
use crate::monitor::{AttemptOutcome, FetchAttempt, Monitor};
use crate::retry::RetryPolicy;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Build the shared HTTP client for one source.
///
/// `referer` is sent with every request; sites behind bot filters are less
/// suspicious of requests that appear to come from their own pages.
pub fn build_client(referer: &str, request_timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(header::REFERER, value);
    }

    ClientBuilder::new()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(15))
        .timeout(request_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

/// Page fetcher bound to one source.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    source: String,
    client: Client,
    request_timeout: Duration,
    monitor: Arc<Monitor>,
}

impl PageFetcher {
    pub fn new(
        source: impl Into<String>,
        client: Client,
        request_timeout: Duration,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            source: source.into(),
            client,
            request_timeout,
            monitor,
        }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Fetch `url` and return its body, retrying per `policy`.
    ///
    /// With an unbounded policy this only returns once the page has been
    /// retrieved; callers that need to give up must pass a bounded one.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute page URL
    /// * `policy` - Backoff schedule and attempt budget
    ///
    /// # Returns
    ///
    /// The response body of the first successful attempt, or the error of
    /// the last one once the budget is spent.
    #[instrument(level = "debug", skip(self, policy), fields(source = %self.source))]
    pub async fn fetch_page(&self, url: &str, policy: &RetryPolicy) -> Result<String, FetchError> {
        let mut attempt = 1u32;
        loop {
            let t0 = Instant::now();
            let result = self.fetch_once(url).await;
            let duration = t0.elapsed();

            match result {
                Ok((status, body)) => {
                    self.monitor.record_fetch(&FetchAttempt {
                        source: self.source.clone(),
                        url: url.to_string(),
                        attempt,
                        duration,
                        outcome: AttemptOutcome::Success {
                            status,
                            bytes: body.len(),
                        },
                        next_retry: None,
                    });
                    return Ok(body);
                }
                Err(e) => {
                    let next_retry = policy.delay_after(attempt);
                    self.monitor.record_fetch(&FetchAttempt {
                        source: self.source.clone(),
                        url: url.to_string(),
                        attempt,
                        duration,
                        outcome: AttemptOutcome::Failure {
                            kind: e.outcome(),
                            error: e.to_string(),
                        },
                        next_retry,
                    });

                    match next_retry {
                        Some(delay) => {
                            debug!(attempt, ?delay, "Backing off before next fetch attempt");
                            sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(e),
                    }
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<(u16, String), FetchError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    status,
                });
            }

            let body = response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;
            Ok((status.as_u16(), body))
        };

        match timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}
