//! The resilient fetch client.
//!
//! [`FetchClient::request`] composes the other modules into one call:
//!
//! 1. serve a fresh cache entry without touching the network,
//! 2. cancel whatever request this client still has in flight,
//! 3. offer the cached ETag as `If-None-Match`,
//! 4. run the transport under the retry engine,
//! 5. answer `304 Not Modified` from the cache, or store the fresh body.
//!
//! Consumers get a [`Payload`], [`FetchError::Cancelled`] (render nothing,
//! newer state is on its way), or another [`FetchError`] to display.

mod stats;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

pub use stats::StatsSnapshot;

use crate::cache::TtlCache;
use crate::cancel::{CancelToken, Coordinator};
use crate::config::{ClientConfig, ConfigError};
use crate::error::FetchError;
use crate::http::headers::{ACCEPT, IF_NONE_MATCH};
use crate::http::{Headers, Request, Response};
use crate::retry::{RetryEngine, RetryPolicy};
use crate::transport::Transport;
use stats::ClientStats;

/// A decoded-on-demand response body plus the collection size the origin
/// reported in `X-Total-Count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    body: Bytes,
    total_count: Option<u64>,
}

impl Payload {
    /// Wraps a body and an optional `X-Total-Count`.
    pub fn new(body: impl Into<Bytes>, total_count: Option<u64>) -> Self {
        Self {
            body: body.into(),
            total_count,
        }
    }

    fn from_response(response: Response) -> Self {
        let total_count = response.total_count();
        Self::new(response.into_body(), total_count)
    }

    /// Returns the raw response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Total item count for paginated endpoints, when the origin sent one.
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// The three ways a request ends, from a consumer's point of view.
///
/// ```
/// use refetch::cancel::CancelReason;
/// use refetch::client::Outcome;
/// use refetch::error::FetchError;
///
/// let outcome: Outcome<u32> = Err(FetchError::Cancelled(CancelReason::Superseded)).into();
/// assert!(matches!(outcome, Outcome::Cancelled));
/// ```
#[derive(Debug)]
pub enum Outcome<T> {
    Value(T),
    /// Superseded or cancelled by the caller; nothing to show.
    Cancelled,
    /// Worth showing, typically with a retry button.
    Failed(FetchError),
}

impl<T> Outcome<T> {
    /// Returns the value, discarding cancellations and failures.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Cancelled | Self::Failed(_) => None,
        }
    }
}

impl<T> From<Result<T, FetchError>> for Outcome<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) if error.is_cancelled() => Self::Cancelled,
            Err(error) => Self::Failed(error),
        }
    }
}

/// Per-call overrides of the client's [`ClientConfig`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use refetch::cancel::CancelToken;
/// use refetch::client::RequestOptions;
///
/// let stop = CancelToken::new();
/// let options = RequestOptions::new()
///     .ignore_cache(true)
///     .max_attempts(5)
///     .timeout(Duration::from_secs(10))
///     .cancel(stop.clone());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    ignore_cache: bool,
    ttl: Option<Duration>,
    max_attempts: Option<u32>,
    base_backoff: Option<Duration>,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
    headers: Headers,
}

impl RequestOptions {
    /// Options that defer to the client's configuration for everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips the cache lookup and the conditional header; the fresh response is still stored.
    #[must_use]
    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    /// Time-to-live for the response this call stores.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Total attempts for this call, the first one included.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before the first retry of this call.
    #[must_use]
    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = Some(backoff);
        self
    }

    /// Upper bound on each attempt.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// External token; firing it ends the call with [`FetchError::Cancelled`].
    #[must_use]
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Adds a request header. Names that are not valid header tokens are
    /// dropped and line breaks are stripped from values when the request is sent.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }
}

/// What a successful attempt produced.
enum Fetched {
    Fresh(Response),
    NotModified(Payload),
}

/// Fetch client with retries, TTL caching, ETag revalidation, and
/// cancellation of superseded requests.
///
/// One client is one request slot: starting a request cancels the one
/// still in flight. Use one client per independently updating view (a
/// search box, a detail pane) so they don't cancel each other.
///
/// # Examples
///
/// ```rust,no_run
/// use refetch::cache::cache_key;
/// use refetch::client::{FetchClient, RequestOptions};
/// use refetch::config::ClientConfig;
/// use refetch::transport::HttpTransport;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = FetchClient::new(HttpTransport::new(), ClientConfig::default())?;
/// let url = cache_key("http://localhost:3000/movies", &[("q", "heat"), ("_page", "1")]);
///
/// match client.request(&url, RequestOptions::new()).await {
///     Ok(page) => println!("{} bytes", page.body().len()),
///     Err(e) if e.is_cancelled() => {}
///     Err(e) => eprintln!("could not load movies: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FetchClient<T> {
    transport: T,
    config: ClientConfig,
    default_headers: Headers,
    cache: Mutex<TtlCache<Payload>>,
    slot: Coordinator,
    stats: ClientStats,
}

impl<T: Transport> FetchClient<T> {
    /// Creates a client over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(transport: T, config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut default_headers = Headers::new();
        if let Some(accept) = &config.accept {
            default_headers.set(ACCEPT, accept.as_str());
        }

        Ok(Self {
            transport,
            cache: Mutex::new(TtlCache::new(config.ttl()).retain_stale(config.retain_stale)),
            config,
            default_headers,
            slot: Coordinator::new(),
            stats: ClientStats::default(),
        })
    }

    /// Returns the configuration every request starts from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the transport requests are issued on.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches `url`, from the cache when a fresh entry exists.
    ///
    /// `url` doubles as the cache key; build it with
    /// [`cache_key`](crate::cache::cache_key) so equivalent queries share an entry.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`]: superseded by a newer request on this client,
    ///   or the options' token fired.
    /// - [`FetchError::HttpClient`]: the origin answered `4xx`; not retried.
    /// - [`FetchError::ExhaustedRetries`]: every attempt failed transiently.
    /// - [`FetchError::InvalidUrl`]: `url` does not parse.
    /// - [`FetchError::InvalidOptions`]: `options` ask for zero attempts or a zero timeout.
    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<Payload, FetchError> {
        let target = Url::parse(url)?;
        let policy = self.policy_for(&options);
        policy.validate()?;

        if !options.ignore_cache {
            let cached = self.cache().get(url);
            if let Some(payload) = cached {
                // A newer request always replaces the one in flight, even when
                // it never reaches the network.
                self.slot.cancel_previous();
                self.stats.record_cache_hit();
                debug!(url, "served from cache");
                return Ok(payload);
            }
        }

        let slot_token = self.slot.begin();
        let call = CancelToken::merge(options.cancel.as_ref(), slot_token.clone());

        let result = self.fetch(&target, url, &options, policy, &call).await;
        self.slot.finish(&slot_token);

        if let Err(FetchError::Cancelled(reason)) = &result {
            self.stats.record_cancelled();
            debug!(url, reason = %reason, "request cancelled");
        }
        result
    }

    /// [`request`](Self::request), then decode the body as JSON.
    pub async fn request_json<D: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<D, FetchError> {
        self.request(url, options).await?.json()
    }

    /// Cancels this client's in-flight request, if any. Returns `true` if one was cancelled.
    pub fn cancel_in_flight(&self) -> bool {
        self.slot.cancel_in_flight()
    }

    /// Returns the cached payload for `key` if it is still fresh.
    pub fn cached(&self, key: &str) -> Option<Payload> {
        self.cache().get(key)
    }

    /// Number of fresh cache entries.
    pub fn cache_size(&self) -> usize {
        self.cache().size()
    }

    /// Empties the cache and resets the served-from-cache counter.
    pub fn clear_cache(&self) {
        self.cache().clear();
        self.stats.reset_cache_hits();
        info!("cache cleared");
    }

    /// Evicts every expired entry, including ones kept for revalidation.
    /// Returns how many were removed.
    ///
    /// Long-lived clients that see many distinct URLs call this periodically.
    pub fn purge_expired(&self) -> usize {
        let purged = self.cache().purge_expired();
        debug!(purged, "purged expired cache entries");
        purged
    }

    /// Returns a snapshot of this client's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    async fn fetch(
        &self,
        url: &Url,
        key: &str,
        options: &RequestOptions,
        policy: RetryPolicy,
        call: &CancelToken,
    ) -> Result<Payload, FetchError> {
        let engine = RetryEngine::new(policy);
        debug!(
            url = key,
            max_attempts = engine.policy().max_attempts,
            "fetching from origin"
        );
        let conditional = !options.ignore_cache && self.config.use_etag;

        let fetched = engine
            .run(call, |attempt, token| {
                if attempt > 1 {
                    self.stats.record_retry();
                }

                let mut request = Request::new(url.clone(), attempt, token)
                    .headers_from(&self.default_headers)
                    .headers_from(&options.headers);
                // Looked up per attempt: if the entry vanished since the last
                // one, the next attempt goes out unconditionally.
                let validator = if conditional {
                    self.cache().validator(key)
                } else {
                    None
                };
                if let Some(tag) = validator {
                    request = request.header(IF_NONE_MATCH, tag);
                }

                async move {
                    let response = self.transport.issue(&request).await?;
                    self.stats.record_response();
                    self.classify(response, key)
                }
            })
            .await?;

        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl());
        match fetched {
            Fetched::NotModified(payload) => {
                self.stats.record_revalidated();
                let mut cache = self.cache();
                let validator = cache
                    .entry(key)
                    .and_then(|entry| entry.validator().map(str::to_owned));
                cache.set_with_ttl(key, payload.clone(), validator, ttl);
                debug!(url = key, "revalidated cached entry");
                Ok(payload)
            }
            Fetched::Fresh(response) => {
                let etag = response.etag().map(str::to_owned);
                let payload = Payload::from_response(response);
                self.cache().set_with_ttl(key, payload.clone(), etag, ttl);
                Ok(payload)
            }
        }
    }

    fn classify(&self, response: Response, key: &str) -> Result<Fetched, FetchError> {
        let status = response.status();
        if status.is_not_modified() {
            let cached = self.cache().peek(key);
            return cached
                .map(Fetched::NotModified)
                .ok_or(FetchError::NotModifiedWithoutEntry);
        }
        if let Some(error) = FetchError::from_status(status) {
            return Err(error);
        }
        Ok(Fetched::Fresh(response))
    }

    fn policy_for(&self, options: &RequestOptions) -> RetryPolicy {
        let defaults = self.config.retry_policy();
        RetryPolicy {
            max_attempts: options.max_attempts.unwrap_or(defaults.max_attempts),
            base_backoff: options.base_backoff.unwrap_or(defaults.base_backoff),
            timeout: options.timeout.unwrap_or(defaults.timeout),
            max_jitter: defaults.max_jitter,
        }
    }

    fn cache(&self) -> MutexGuard<'_, TtlCache<Payload>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
