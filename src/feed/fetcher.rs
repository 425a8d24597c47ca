use crate::config::Config;
use crate::feed::parser::{build_items, FeedParser, ParseError};
use crate::feed::sections::{ParsedSections, SectionScraper};
use crate::feed::types::{FeedBreakdown, FeedSource, FeedStatus, RawItem};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const ACCEPT_LANGUAGE_VALUE: &str = "zh-CN,zh;q=0.9";

/// Statuses that are worth asking for again.
const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Upper bound on simultaneous fetches.
const MAX_POOL: usize = 20;
/// Lower bound on simultaneous fetches.
const MIN_POOL: usize = 4;

/// Errors that can occur while fetching and parsing one source.
///
/// Every variant ends up as text in that source's [`FeedStatus`]; none of
/// them stop the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, body read)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body was not a usable feed document
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    }
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::HttpStatus(status) => RETRY_STATUSES.contains(status),
            FetchError::Timeout | FetchError::IncompleteResponse { .. } => true,
            FetchError::Network(e) => e.is_connect() || e.is_body() || e.is_request(),
            FetchError::Parse(_) | FetchError::ResponseTooLarge => false,
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first request.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Items and status of one source.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub items: Vec<RawItem>,
    pub status: FeedStatus,
}

/// Everything a batch of sources produced.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Items of all successful sources, in source order.
    pub items: Vec<RawItem>,
    /// One status per source, ordered by display name.
    pub statuses: Vec<FeedStatus>,
}

/// Shared HTTP handle used for every fetch in a run.
///
/// Cloning is cheap: the connection pool and the parser are shared.
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    policy: RetryPolicy,
    parser: Arc<dyn FeedParser>,
}

impl FeedClient {
    /// Builds the client from configuration: browser user agent,
    /// `Accept-Language` header, per-request timeout and the configured parser.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let http = build_http_client(
            Duration::from_secs(config.request_timeout_secs),
            &config.user_agent,
        )?;
        Ok(Self::from_parts(http, RetryPolicy::default(), config.parser.build()))
    }

    pub fn from_parts(
        http: reqwest::Client,
        policy: RetryPolicy,
        parser: Arc<dyn FeedParser>,
    ) -> Self {
        Self {
            http,
            policy,
            parser,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetches and parses one source. Never fails: errors are reported in the
    /// returned status with zero items.
    pub async fn fetch_source(&self, source: &FeedSource, now: DateTime<Utc>) -> SourceFetch {
        self.fetch_with_body(source, now).await.0
    }

    /// Fetches the aggregator feed once and derives both its items and its
    /// digest sections from the same body.
    pub async fn fetch_aggregator(
        &self,
        source: &FeedSource,
        scraper: &dyn SectionScraper,
        now: DateTime<Utc>,
    ) -> (SourceFetch, ParsedSections) {
        let (fetch, body) = self.fetch_with_body(source, now).await;
        let sections = body
            .map(|body| scraper.scrape(&body))
            .unwrap_or_default();
        (fetch, sections)
    }

    /// Fetches every source concurrently and waits for all of them.
    ///
    /// `max_sources > 0` keeps only the first `max_sources` entries. A
    /// failing source never affects the others.
    pub async fn fetch_all(
        &self,
        mut sources: Vec<FeedSource>,
        max_sources: usize,
        now: DateTime<Utc>,
    ) -> FetchOutcome {
        if max_sources > 0 {
            sources.truncate(max_sources);
        }
        if sources.is_empty() {
            return FetchOutcome::default();
        }

        let total = sources.len();
        let pool = pool_size(total);
        tracing::info!(sources = total, pool = pool, "Fetching feeds");

        let mut results: Vec<(usize, SourceFetch)> = stream::iter(sources.into_iter().enumerate())
            .map(|(index, source)| async move { (index, self.fetch_source(&source, now).await) })
            .buffer_unordered(pool)
            .collect()
            .await;

        // Completion order is arbitrary; restore source order for the items.
        results.sort_by_key(|(index, _)| *index);

        let mut outcome = FetchOutcome::default();
        for (_, fetch) in results {
            outcome.items.extend(fetch.items);
            outcome.statuses.push(fetch.status);
        }
        outcome
            .statuses
            .sort_by(|a, b| a.display_name().cmp(b.display_name()));

        let ok = outcome.statuses.iter().filter(|s| s.ok).count();
        tracing::info!(
            sources = total,
            ok = ok,
            failed = total - ok,
            items = outcome.items.len(),
            "Feed fetch complete"
        );
        outcome
    }

    async fn fetch_with_body(
        &self,
        source: &FeedSource,
        now: DateTime<Utc>,
    ) -> (SourceFetch, Option<Vec<u8>>) {
        let start = Instant::now();
        let (result, body) = match self.fetch_bytes(&source.feed_url).await {
            Ok(body) => {
                let items = self
                    .parser
                    .parse(&body)
                    .map(|parsed| build_items(parsed, source, now))
                    .map_err(FetchError::from);
                (items, Some(body))
            }
            Err(e) => (Err(e), None),
        };
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let feed_title = Some(source.title_fallback.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let (items, error) = match result {
            Ok(items) => (items, None),
            Err(e) => {
                tracing::warn!(feed = %source.feed_url, error = %e, "Feed fetch failed");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let status = FeedStatus {
            site_id: source.site_id.clone(),
            site_name: source.site_name.clone(),
            ok: error.is_none(),
            item_count: items.len(),
            duration_ms,
            error,
            feed_url: Some(source.feed_url.clone()),
            feed_title,
            breakdown: None,
        };
        (SourceFetch { items, status }, body)
    }

    /// GET with the retry policy applied.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && retry_count < self.policy.max_retries => {
                    let delay = self.policy.delay(retry_count);
                    tracing::warn!(
                        feed = %url,
                        error = %e,
                        retry = retry_count,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Fetch failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

/// Worker count for `n` sources: `min(20, max(4, n))`.
pub fn pool_size(n: usize) -> usize {
    n.clamp(MIN_POOL, MAX_POOL)
}

/// Folds a batch into one status for its category.
///
/// Durations add up; the batch is ok when at least one source was.
pub fn summarize(site_id: &str, site_name: &str, outcome: &FetchOutcome) -> FeedStatus {
    let feed_count = outcome.statuses.len();
    let ok_feed_count = outcome.statuses.iter().filter(|s| s.ok).count();
    let failed_feed_count = feed_count - ok_feed_count;

    FeedStatus {
        site_id: site_id.to_string(),
        site_name: site_name.to_string(),
        ok: ok_feed_count > 0,
        item_count: outcome.items.len(),
        duration_ms: outcome.statuses.iter().map(|s| s.duration_ms).sum(),
        error: (failed_feed_count > 0).then(|| format!("{} feeds failed", failed_feed_count)),
        feed_url: None,
        feed_title: None,
        breakdown: Some(FeedBreakdown {
            partial_failures: failed_feed_count,
            feed_count,
            ok_feed_count,
            failed_feed_count,
        }),
    }
}

fn build_http_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Interrupted transfers surface as short bodies; the caller retries them.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
