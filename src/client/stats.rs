//! Observability counters for a [`FetchClient`](super::FetchClient).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct ClientStats {
    responses: AtomicU64,
    served_from_cache: AtomicU64,
    revalidated: AtomicU64,
    retries: AtomicU64,
    cancelled: AtomicU64,
}

impl ClientStats {
    pub(crate) fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.served_from_cache.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_revalidated(&self) {
        self.revalidated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_cache_hits(&self) {
        self.served_from_cache.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            responses: self.responses.load(Ordering::Relaxed),
            served_from_cache: self.served_from_cache.load(Ordering::Relaxed),
            revalidated: self.revalidated.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a client's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Responses received from the transport, any status.
    pub responses: u64,
    /// Requests answered from a fresh cache entry without a network call.
    pub served_from_cache: u64,
    /// Requests answered by `304 Not Modified` from a revalidated entry.
    pub revalidated: u64,
    /// Attempts beyond the first.
    pub retries: u64,
    /// Requests that ended cancelled (by the caller or by a newer request).
    pub cancelled: u64,
}
