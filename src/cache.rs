//! Bounded, TTL-aware cache for address attribute lookups.
//!
//! Entries are evicted least-recently-used first; successful and failed
//! lookups expire on independent TTLs. Concurrent lookups for the same
//! address are collapsed into a single upstream fetch.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::watch;
use tracing::debug;

use crate::providers::{GeoAttributes, ProviderError};

/// Outcome of an attribute lookup, as stored in the cache and shared with
/// every waiter. Failures keep only the error message: outcomes are cloned
/// across waiters and provider errors are not cloneable.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Success(GeoAttributes),
    Failure(String),
}

impl LookupOutcome {
    fn from_fetch(result: Result<GeoAttributes, ProviderError>) -> Self {
        match result {
            Ok(attrs) => LookupOutcome::Success(attrs),
            Err(e) => LookupOutcome::Failure(e.to_string()),
        }
    }
}

/// Cached lookup result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub outcome: LookupOutcome,
    pub fetched_at: Instant,
}

/// In-flight fetches publish their outcome on a watch channel. Waiters that
/// join before completion wake on the send; late joiners read the stored
/// value directly.
type InflightRx = watch::Receiver<Option<LookupOutcome>>;

struct CacheInner {
    /// `None` when capacity is 0: caching disabled, nothing is stored.
    entries: Option<LruCache<IpAddr, CacheEntry>>,
    inflight: HashMap<IpAddr, InflightRx>,
}

struct Shared {
    inner: Mutex<CacheInner>,
    success_ttl: Duration,
    error_ttl: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // The lock only guards map bookkeeping, so a poisoned guard still
        // holds consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Entry age is compared against the TTL for its own outcome kind.
    /// A zero TTL pins the entry forever.
    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let ttl = match entry.outcome {
            LookupOutcome::Success(_) => self.success_ttl,
            LookupOutcome::Failure(_) => self.error_ttl,
        };
        !ttl.is_zero() && entry.fetched_at.elapsed() > ttl
    }

    /// Store the fetch result and retire the in-flight marker in one step,
    /// so no caller can observe one without the other.
    fn complete(&self, ip: IpAddr, outcome: LookupOutcome) {
        let mut inner = self.lock();
        if let Some(entries) = inner.entries.as_mut() {
            let entry = CacheEntry {
                outcome,
                fetched_at: Instant::now(),
            };
            // put() drops the least-recently-used entry when at capacity.
            entries.put(ip, entry);
        }
        inner.inflight.remove(&ip);
    }
}

/// Thread-safe lookup cache. Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct LookupCache {
    shared: Arc<Shared>,
}

impl LookupCache {
    /// Create a cache holding at most `capacity` addresses. Capacity 0
    /// disables storage entirely; a TTL of zero never expires.
    pub fn new(capacity: usize, success_ttl: Duration, error_ttl: Duration) -> Self {
        let entries = NonZeroUsize::new(capacity).map(LruCache::new);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(CacheInner {
                    entries,
                    inflight: HashMap::new(),
                }),
                success_ttl,
                error_ttl,
            }),
        }
    }

    /// Look up an address without triggering any I/O.
    ///
    /// An expired entry is reported as absent; it stays in the store until
    /// the refetch that replaces it completes.
    pub fn get(&self, ip: &IpAddr) -> Option<CacheEntry> {
        let mut inner = self.shared.lock();
        let entries = inner.entries.as_mut()?;
        let entry = entries.get(ip)?;
        if self.shared.is_expired(entry) {
            None
        } else {
            Some(entry.clone())
        }
    }

    /// Resolve attributes for `ip`, fetching through `fetch` on a miss.
    ///
    /// At most one fetch is in flight per address: concurrent callers for
    /// the same address all receive the outcome of that single fetch. The
    /// fetch runs on its own task, so it still completes for the remaining
    /// waiters when the caller that started it goes away.
    pub async fn resolve<F, Fut>(&self, ip: IpAddr, fetch: F) -> LookupOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GeoAttributes, ProviderError>> + Send + 'static,
    {
        let mut rx = {
            let mut inner = self.shared.lock();

            if let Some(entries) = inner.entries.as_mut() {
                if let Some(entry) = entries.get(&ip) {
                    if !self.shared.is_expired(entry) {
                        return entry.outcome.clone();
                    }
                    debug!(ip = %ip, "cache entry expired, refetching");
                }
            }

            match inner.inflight.get(&ip) {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inner.inflight.insert(ip, rx.clone());

                    // Calling the closure only constructs the future; it
                    // runs on the spawned task, outside the lock.
                    let fut = fetch();
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        let outcome = LookupOutcome::from_fetch(fut.await);
                        shared.complete(ip, outcome.clone());
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        let result = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => match outcome.clone() {
                Some(outcome) => outcome,
                None => LookupOutcome::Failure("lookup produced no result".to_string()),
            },
            Err(_) => LookupOutcome::Failure("lookup task failed before completion".to_string()),
        };
        result
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        let inner = self.shared.lock();
        inner.entries.as_ref().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
