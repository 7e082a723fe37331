use futures::stream::{self, StreamExt};
use secrecy::ExposeSecret;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::parser::parse_feed;
use crate::fetcher::{ClientCache, RequestBuilder, DEFAULT_TIMEOUT_SECS};
use crate::sanitizer::Sanitizer;
use crate::script::{rewrite_entries, EntryScript, ScriptError};
use crate::storage::{Database, DatabaseError, Entry, Feed, FetchOutcome, RefreshJob};

/// Default cap on a feed response body (15MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 15 * 1024 * 1024;

/// Errors that can occur while refreshing one feed.
///
/// All of them are recorded against the feed; none of them stops the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// Request exceeded the configured client timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with a status other than 2xx or 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body could not be decoded as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// The feed's custom script failed
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// Loading the feed or storing its entries failed
    #[error("Database error: {0}")]
    Database(String),
    /// The job refers to a feed that no longer exists
    #[error("Feed {0} not found")]
    FeedNotFound(i64),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

impl From<DatabaseError> for FetchError {
    fn from(err: DatabaseError) -> Self {
        FetchError::Database(err.to_string())
    }
}

/// Outcome of one refresh job.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_id: i64,
    /// Number of new entries stored, or the error that occurred
    pub result: Result<usize, FetchError>,
}

/// Totals over a batch, for the per-cycle log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    pub new_entries: usize,
}

impl RefreshSummary {
    pub fn from_results(results: &[FetchResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, r| {
            match &r.result {
                Ok(count) => {
                    summary.refreshed += 1;
                    summary.new_entries += count;
                }
                Err(_) => summary.failed += 1,
            }
            summary
        })
    }
}

/// Process-wide fetch settings, applied under each feed's own overrides.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Sent when a feed has no user agent of its own
    pub user_agent: String,
    /// Request timeout in seconds (0 = none)
    pub timeout_secs: u64,
    pub max_body_size: usize,
    /// Minutes until a refreshed feed is due again
    pub polling_frequency_minutes: u64,
    /// Consecutive failures after which automatic batches skip a feed
    pub error_limit: i64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("brook/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            polling_frequency_minutes: 60,
            error_limit: 3,
        }
    }
}

/// Drives refresh jobs through fetch, decode, script, sanitize and store,
/// and records each outcome on the feed.
///
/// Cloning is cheap; all clones share one client cache.
#[derive(Clone)]
pub struct Refresher {
    db: Database,
    clients: Arc<ClientCache>,
    sanitizer: Arc<Sanitizer>,
    scripts: Arc<dyn EntryScript>,
    settings: RefreshSettings,
}

impl Refresher {
    pub fn new(
        db: Database,
        sanitizer: Sanitizer,
        scripts: Arc<dyn EntryScript>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            db,
            clients: Arc::new(ClientCache::default()),
            sanitizer: Arc::new(sanitizer),
            scripts,
            settings,
        }
    }

    /// Share an existing client cache instead of a private one.
    pub fn with_client_cache(mut self, clients: Arc<ClientCache>) -> Self {
        self.clients = clients;
        self
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Refresh a batch with at most `workers` jobs in flight.
    ///
    /// Results come back in completion order, not job order.
    pub async fn refresh_batch(&self, jobs: Vec<RefreshJob>, workers: usize) -> Vec<FetchResult> {
        if jobs.is_empty() {
            return Vec::new();
        }

        stream::iter(jobs)
            .map(|job| async move { self.refresh_one(job.feed_id).await })
            .buffer_unordered(workers.max(1))
            .collect()
            .await
    }

    /// Refresh one feed and record the outcome.
    pub async fn refresh_one(&self, feed_id: i64) -> FetchResult {
        let result = match self.db.get_feed(feed_id).await {
            Ok(Some(feed)) => {
                let result = self.fetch_one(&feed).await;
                self.record_fetch_result(&feed, &result).await;
                result.map(|(new_entries, _)| new_entries)
            }
            Ok(None) => Err(FetchError::FeedNotFound(feed_id)),
            Err(e) => Err(e.into()),
        };

        FetchResult { feed_id, result }
    }

    fn next_check_at(&self) -> i64 {
        let minutes = i64::try_from(self.settings.polling_frequency_minutes).unwrap_or(i64::MAX);
        chrono::Utc::now()
            .timestamp()
            .saturating_add(minutes.saturating_mul(60))
    }

    /// Database errors here are logged, not returned: the job's own result
    /// is what the caller cares about.
    async fn record_fetch_result(&self, feed: &Feed, result: &Result<(usize, FetchOutcome), FetchError>) {
        let next_check_at = self.next_check_at();
        match result {
            Ok((_, outcome)) => {
                let outcome = FetchOutcome {
                    next_check_at,
                    ..outcome.clone()
                };
                if let Err(e) = self.db.record_fetch_success(feed.id, &outcome).await {
                    tracing::warn!(feed_id = feed.id, error = %e, "Failed to record fetch success");
                }
            }
            Err(err) => {
                tracing::warn!(feed_id = feed.id, url = %feed.feed_url, error = %err, "Feed refresh failed");
                match self
                    .db
                    .record_fetch_error(feed.id, &err.to_string(), next_check_at)
                    .await
                {
                    Ok(errors) if errors >= self.settings.error_limit => {
                        tracing::info!(
                            feed_id = feed.id,
                            title = %feed.title,
                            errors,
                            "Feed reached the error limit and leaves automatic batches"
                        );
                    }
                    Ok(_) => {}
                    Err(db_err) => {
                        tracing::warn!(feed_id = feed.id, error = %db_err, "Failed to record fetch error");
                    }
                }
            }
        }
    }

    fn request_for(&self, feed: &Feed) -> RequestBuilder {
        let mut request = RequestBuilder::new()
            .with_user_agent(feed.user_agent.as_deref().unwrap_or(""), &self.settings.user_agent)
            .with_cookie(feed.cookie.as_deref().unwrap_or(""))
            .with_timeout(self.settings.timeout_secs)
            .with_proxy(feed.proxy_url.as_deref().unwrap_or(""))
            .use_proxy(feed.use_proxy)
            .disable_http2(feed.disable_http2)
            .ignore_tls_errors(feed.ignore_tls_errors);

        if let (Some(username), Some(password)) = (&feed.username, &feed.password) {
            request = request.with_credentials(username, password.expose_secret());
        }
        if let Some(etag) = &feed.etag {
            request = request.with_etag(etag);
        }
        if let Some(last_modified) = &feed.last_modified {
            request = request.with_last_modified(last_modified);
        }
        if feed.without_redirects {
            request = request.without_redirects();
        }
        request
    }

    async fn fetch_one(&self, feed: &Feed) -> Result<(usize, FetchOutcome), FetchError> {
        let response = self
            .request_for(feed)
            .execute(&self.clients, &feed.feed_url)
            .await?;

        let status = response.status();
        let outcome = FetchOutcome {
            etag: header_value(&response, reqwest::header::ETAG),
            last_modified: header_value(&response, reqwest::header::LAST_MODIFIED),
            next_check_at: 0,
        };

        if status == reqwest::StatusCode::NOT_MODIFIED {
            tracing::debug!(feed_id = feed.id, "Feed not modified");
            return Ok((0, outcome));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.settings.max_body_size).await?;
        let entries = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        let entries = match feed.custom_script.as_deref() {
            Some(script) if !script.trim().is_empty() => {
                run_script(Arc::clone(&self.scripts), script.to_string(), entries).await?
            }
            _ => entries,
        };

        let entries = self.sanitize_entries(feed, entries);
        let new_entries = self
            .db
            .store_entries(feed.id, feed.user_id, &entries)
            .await?;

        tracing::debug!(
            feed_id = feed.id,
            entries = entries.len(),
            new_entries,
            "Feed refreshed"
        );
        Ok((new_entries, outcome))
    }

    /// Sanitize entry content against the entry's own URL, falling back to
    /// the site and then the feed URL for relative links.
    fn sanitize_entries(&self, feed: &Feed, entries: Vec<Entry>) -> Vec<Entry> {
        entries
            .into_iter()
            .map(|mut entry| {
                let base = entry
                    .url
                    .as_deref()
                    .or(feed.site_url.as_deref())
                    .unwrap_or(&feed.feed_url);
                entry.content = entry
                    .content
                    .as_deref()
                    .map(|content| self.sanitizer.sanitize(base, content));
                entry
            })
            .collect()
    }
}

/// Run an entry script on the blocking thread pool.
async fn run_script(
    scripts: Arc<dyn EntryScript>,
    script: String,
    entries: Vec<Entry>,
) -> Result<Vec<Entry>, FetchError> {
    let rewritten =
        tokio::task::spawn_blocking(move || rewrite_entries(scripts.as_ref(), &script, entries))
            .await
            .map_err(|e| ScriptError::Runtime(e.to_string()))??;
    Ok(rewritten)
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// Read a response body, failing once it grows past `limit` bytes or when
/// fewer bytes arrive than Content-Length announced.
async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

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
