//! TTL cache with per-entry validators.
//!
//! [`TtlCache`] maps string keys to values that stay readable for a
//! time-to-live after insertion. Each entry may carry a validator (an ETag)
//! used to revalidate it with a conditional request. Expired entries are
//! evicted lazily, on the next access that sees them, unless they are kept
//! for revalidation.
//!
//! The cache has no internal locking; its owner decides how it is shared.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// A cached value plus the metadata needed to expire and revalidate it.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
    validator: Option<String>,
}

impl<V> CacheEntry<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn validator(&self) -> Option<&str> {
        self.validator.as_deref()
    }

    /// An entry is fresh iff `now - stored_at < ttl`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Key/value store with time-to-live expiry.
///
/// With `retain_stale` enabled, expired entries that carry a validator are kept
/// (but never returned by [`get`](Self::get)) so that the validator can still be
/// offered for a conditional request and the value served on `304 Not Modified`.
/// Expired entries without a validator are evicted either way, and
/// [`purge_expired`](Self::purge_expired) drops the retained ones too.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use refetch::cache::TtlCache;
///
/// let mut cache = TtlCache::new(Duration::from_secs(300));
/// cache.set("/movies?_page=1", vec!["Heat"], Some("\"v1\"".to_owned()));
///
/// assert_eq!(cache.get("/movies?_page=1"), Some(vec!["Heat"]));
/// assert_eq!(cache.validator("/movies?_page=1").as_deref(), Some("\"v1\""));
/// assert_eq!(cache.size(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
    retain_stale: bool,
}

impl<V: Clone> TtlCache<V> {
    /// Creates an empty cache whose entries live for `ttl` unless stored with their own TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            retain_stale: false,
        }
    }

    /// Keeps expired entries around for revalidation instead of evicting them on access.
    #[must_use]
    pub fn retain_stale(mut self, retain: bool) -> Self {
        self.retain_stale = retain;
        self
    }

    /// Default time-to-live for [`set`](Self::set).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value for `key` if present and unexpired.
    ///
    /// An expired entry is evicted (or left in place when stale entries are retained).
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.fresh_entry(key).map(|entry| entry.value.clone())
    }

    /// Inserts or overwrites `key` with the default TTL, restarting its clock.
    pub fn set(&mut self, key: impl Into<String>, value: V, validator: Option<String>) {
        let ttl = self.ttl;
        self.set_with_ttl(key, value, validator, ttl);
    }

    /// Inserts or overwrites `key` with an explicit TTL.
    pub fn set_with_ttl(
        &mut self,
        key: impl Into<String>,
        value: V,
        validator: Option<String>,
        ttl: Duration,
    ) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
                validator,
            },
        );
    }

    /// Returns the last-known validator for `key`.
    ///
    /// Without `retain_stale` an expired entry has no validator (and is evicted);
    /// with it, the validator outlives the TTL so the entry can be revalidated.
    pub fn validator(&mut self, key: &str) -> Option<String> {
        let fresh = self.fresh_entry(key).map(|entry| entry.validator.clone());
        match fresh {
            Some(validator) => validator,
            // Only an expired entry kept for revalidation is still present.
            None => self.entries.get(key).and_then(|entry| entry.validator.clone()),
        }
    }

    /// Returns the value for `key` regardless of its age, without evicting anything.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Returns the full entry for `key` regardless of its age.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Counts unexpired entries.
    ///
    /// Expired entries scanned along the way are evicted unless they are kept
    /// for revalidation; either way the count only reflects what
    /// [`get`](Self::get) would return, so calling it repeatedly has no further effect.
    pub fn size(&mut self) -> usize {
        let now = Instant::now();
        let retain_stale = self.retain_stale;
        self.entries
            .retain(|_, entry| entry.is_fresh(now) || Self::revalidatable(retain_stale, entry));
        self.entries.values().filter(|entry| entry.is_fresh(now)).count()
    }

    /// Evicts every expired entry, retained stale ones included. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before - self.entries.len()
    }

    fn fresh_entry(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if !entry.is_fresh(now) {
            if !Self::revalidatable(self.retain_stale, entry) {
                self.entries.remove(key);
            }
            return None;
        }
        self.entries.get(key)
    }

    /// An expired entry is only worth keeping if it can still be revalidated.
    fn revalidatable(retain_stale: bool, entry: &CacheEntry<V>) -> bool {
        retain_stale && entry.validator.is_some()
    }
}

/// Builds a cache key (and request URL) from a base URL and query parameters.
///
/// Parameters are sorted and form-encoded so the same query always maps to
/// the same key, whatever order the caller assembled it in.
///
/// # Examples
///
/// ```
/// use refetch::cache::cache_key;
///
/// let a = cache_key("http://localhost:3000/movies", &[("q", "heat"), ("_page", "1")]);
/// let b = cache_key("http://localhost:3000/movies", &[("_page", "1"), ("q", "heat")]);
/// assert_eq!(a, b);
/// assert_eq!(a, "http://localhost:3000/movies?_page=1&q=heat");
/// ```
pub fn cache_key<K, V>(base: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut sorted: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    if sorted.is_empty() {
        return base.to_owned();
    }
    sorted.sort_unstable();

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn entry_expires_exactly_at_ttl() {
        let mut cache = TtlCache::new(TTL);
        cache.set("k", 1, None);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.entry("k").is_none(), "expired entry is evicted on access");
    }

    #[tokio::test(start_paused = true)]
    async fn set_restarts_the_clock() {
        let mut cache = TtlCache::new(TTL);
        cache.set("k", 1, None);
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.set("k", 2, None);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn per_entry_ttl() {
        let mut cache = TtlCache::new(TTL);
        cache.set_with_ttl("short", 1, None, Duration::from_secs(1));
        cache.set("long", 2, None);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn size_is_idempotent() {
        let mut cache = TtlCache::new(TTL);
        cache.set("a", 1, None);
        cache.set_with_ttl("b", 2, None, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn validator_dropped_with_expired_entry() {
        let mut cache = TtlCache::new(TTL);
        cache.set("k", 1, Some("\"v1\"".to_owned()));
        tokio::time::advance(TTL).await;
        assert_eq!(cache.validator("k"), None);
        assert_eq!(cache.peek("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retained_stale_entry_keeps_validator() {
        let mut cache = TtlCache::new(TTL).retain_stale(true);
        cache.set("k", 1, Some("\"v1\"".to_owned()));
        tokio::time::advance(TTL).await;

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.validator("k").as_deref(), Some("\"v1\""));
        assert_eq!(cache.peek("k"), Some(1));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.validator("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retained_cache_still_evicts_entries_without_validator() {
        let mut cache = TtlCache::new(TTL).retain_stale(true);
        for i in 0..1000 {
            cache.set(format!("/movies?q={i}"), i, None);
        }
        cache.set("/movies?q=heat", -1, Some("\"v1\"".to_owned()));
        tokio::time::advance(TTL).await;

        assert_eq!(cache.get("/movies?q=0"), None);
        assert!(cache.entry("/movies?q=0").is_none());
        assert_eq!(cache.validator("/movies?q=1"), None);
        assert!(cache.entry("/movies?q=1").is_none());

        assert_eq!(cache.size(), 0);
        assert!(cache.entry("/movies?q=999").is_none());
        assert_eq!(cache.peek("/movies?q=heat"), Some(-1));
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let mut cache = TtlCache::new(TTL);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.peek("a"), None);
    }

    #[test]
    fn cache_key_encodes_and_appends() {
        assert_eq!(cache_key::<&str, &str>("http://h/shows", &[]), "http://h/shows");
        assert_eq!(
            cache_key("http://h/search/shows?embed=cast", &[("q", "the wire")]),
            "http://h/search/shows?embed=cast&q=the+wire"
        );
    }
}
