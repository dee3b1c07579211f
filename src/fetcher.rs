//! Pooled, rate-limited, retrying HTTP fetcher.
//!
//! Grounded on `async_http_client.py`'s `AsyncHTTPClient.fetch`: retry loop
//! with 429 `Retry-After` handling (bounded, not counted against the retry
//! budget), exponential backoff for 5xx/transport errors, immediate failure
//! on other 4xx, and a fully-read body before the connection is returned to
//! the pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};

use crate::error::{CrawlError, CrawlResult};
use crate::rate_limiter::RateLimiter;

const DEFAULT_429_WAIT_SECS: u64 = 60;
const MAX_429_WAIT_SECS: u64 = 300;

#[derive(Debug, Default)]
pub struct FetcherStats {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_bytes: AtomicU64,
    start_time: once_cell::sync::OnceCell<std::time::Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct FetcherStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_bytes: u64,
    pub duration_secs: f64,
}

impl FetcherStatsSnapshot {
    #[must_use]
    pub fn avg_requests_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total_requests as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

impl FetcherStats {
    fn record_attempt(&self) {
        self.start_time.get_or_init(std::time::Instant::now);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, bytes: u64) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> FetcherStatsSnapshot {
        let duration_secs = self
            .start_time
            .get()
            .map_or(0.0, |t| t.elapsed().as_secs_f64());
        FetcherStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            duration_secs,
        }
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn text(&self) -> anyhow::Result<String> {
        Ok(String::from_utf8_lossy(&self.body).into_owned())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub struct FetcherConfig {
    pub max_connections: usize,
    pub max_per_host: usize,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
    pub max_retries: u8,
    pub retry_delay_seconds: f64,
    pub request_timeout_secs: u64,
}

/// Pooled HTTP client with rate limiting, retry/backoff and stats.
///
/// `acquire()`-style global capping is enforced with a semaphore since
/// `reqwest` only exposes a per-host idle-connection cap, not a hard global
/// connection count.
pub struct Fetcher {
    client: Client,
    rate_limiter: RateLimiter,
    global_limit: tokio::sync::Semaphore,
    max_retries: u8,
    retry_delay_seconds: f64,
    stats: FetcherStats,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_per_host)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/124.0.0.0 Safari/537.36",
            )
            .default_headers(default_headers())
            .build()?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst),
            global_limit: tokio::sync::Semaphore::new(config.max_connections),
            max_retries: config.max_retries,
            retry_delay_seconds: config.retry_delay_seconds,
            stats: FetcherStats::default(),
        })
    }

    #[must_use]
    pub fn stats(&self) -> FetcherStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn fetch(
        &self,
        url: &str,
        method: Method,
        body: Option<Vec<u8>>,
    ) -> CrawlResult<FetchResponse> {
        let mut last_error: Option<CrawlError> = None;
        let mut attempt: u8 = 0;

        loop {
            let _permit = self
                .global_limit
                .acquire()
                .await
                .map_err(|_| CrawlError::Cancelled)?;
            self.rate_limiter.acquire().await;
            self.stats.record_attempt();

            let mut request = self.client.request(method.clone(), url);
            if let Some(body) = body.clone() {
                request = request.body(body);
            }

            let response = request.send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = retry_after_secs(&resp).unwrap_or(DEFAULT_429_WAIT_SECS);
                        let wait = wait.min(MAX_429_WAIT_SECS);
                        log::warn!("429 from {url}, sleeping {wait}s before retry");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }

                    if status.is_server_error() {
                        last_error = Some(CrawlError::Http {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    } else if status.is_client_error() {
                        self.stats.record_failure();
                        return Err(CrawlError::Http {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    } else {
                        let headers = resp.headers().clone();
                        let final_url = resp.url().to_string();
                        let bytes = resp.bytes().await.map_err(|e| {
                            CrawlError::Transport(format!("failed to read body: {e}"))
                        })?;
                        self.stats.record_success(bytes.len() as u64);
                        return Ok(FetchResponse {
                            status,
                            url: final_url,
                            headers,
                            body: bytes.to_vec(),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(CrawlError::Transport(e.to_string()));
                }
            }

            if attempt + 1 >= self.max_retries {
                self.stats.record_failure();
                return Err(last_error.unwrap_or(CrawlError::Transport("unknown".into())));
            }

            let backoff = self.retry_delay_seconds * 2f64.powi(i32::from(attempt));
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            attempt += 1;
        }
    }

    pub async fn fetch_text(&self, url: &str) -> CrawlResult<String> {
        let resp = self.fetch(url, Method::GET, None).await?;
        resp.text().map_err(|e| CrawlError::Parse(e.to_string()))
    }

    pub async fn fetch_bytes(&self, url: &str) -> CrawlResult<Vec<u8>> {
        let resp = self.fetch(url, Method::GET, None).await?;
        Ok(resp.body)
    }

    pub async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CrawlResult<T> {
        let resp = self.fetch(url, Method::GET, None).await?;
        resp.json().map_err(|e| CrawlError::Parse(e.to_string()))
    }
}

fn default_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers
}

fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}
