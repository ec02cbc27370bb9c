//! Fingerprint cache + request coalescer.
//!
//! `CoalescingCache` is the one object shared across concurrent pipeline
//! runs. It keys expensive lookup results by deterministic fingerprint
//! (`crate::fingerprint`) and guarantees:
//!
//! - a live cached value is returned without invoking the producer;
//! - concurrent callers for an absent fingerprint collapse into a single
//!   in-flight producer call and all observe the same settlement;
//! - a terminal failure is never cached, and its in-flight handle is removed
//!   on settlement so the next caller retries from scratch.
//!
//! The producing future runs on its own spawned task, so a caller that is
//! cancelled or abandoned never aborts a flight other callers are attached
//! to. The check-then-act over the internal maps happens under a single
//! mutex acquisition, never held across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::lookup::LookupError;

/// Settlement shared by every caller attached to one flight. The error is
/// reference-counted so all attached callers observe the same failure.
pub type SharedResult<V> = Result<V, Arc<LookupError>>;

type FlightRx<V> = watch::Receiver<Option<SharedResult<V>>>;

/// One stored value with its expiry window.
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    in_flight: HashMap<String, FlightRx<V>>,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries served without a producer call
    pub hits: u64,
    /// Producer invocations (fresh flights started)
    pub misses: u64,
    /// Callers attached to an already-running flight
    pub coalesced: u64,
    /// Values stored after a successful flight
    pub stores: u64,
    /// Expired entries removed (lazy or sweeper)
    pub evicted: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} hits, {} misses, {} coalesced, {} stores, {} evicted",
            self.hits, self.misses, self.coalesced, self.stores, self.evicted
        )
    }
}

#[derive(Default)]
struct StatsCells {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stores: AtomicU64,
    evicted: AtomicU64,
}

struct Shared<V> {
    inner: Mutex<Inner<V>>,
    stats: StatsCells,
}

impl<V> Shared<V> {
    fn lock_inner(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time-bounded, coalescing key/value store for lookup results.
///
/// Construct once per process and share by cloning (clones share state).
/// Isolated instances in tests are just `CoalescingCache::new()`.
pub struct CoalescingCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for CoalescingCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> Default for CoalescingCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CoalescingCache<V> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                }),
                stats: StatsCells::default(),
            }),
        }
    }

    /// Snapshot the cache counters.
    pub fn stats(&self) -> CacheStats {
        let stats = &self.shared.stats;
        CacheStats {
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            coalesced: stats.coalesced.load(Ordering::Relaxed),
            stores: stats.stores.load(Ordering::Relaxed),
            evicted: stats.evicted.load(Ordering::Relaxed),
        }
    }

    /// Number of stored entries, live or not yet evicted.
    pub fn len(&self) -> usize {
        self.shared.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry now. Returns the eviction count.
    pub fn evict_expired(&self) -> usize {
        let mut inner = self.shared.lock_inner();
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live(now));
        let evicted = before - inner.entries.len();
        if evicted > 0 {
            self.shared
                .stats
                .evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }
}

impl<V> CoalescingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Resolve `fingerprint` to a value, producing at most one flight.
    ///
    /// 1. A live cache entry is returned immediately.
    /// 2. An existing flight is joined; the producer is not invoked again.
    /// 3. Otherwise this caller becomes the producer: the future from
    ///    `producer()` runs on a detached task, the result is stored under
    ///    `ttl` on success (a `ttl` of zero disables storing), and every
    ///    attached caller receives the settlement. The in-flight handle is
    ///    removed on settlement regardless of outcome.
    pub async fn resolve<F, Fut>(&self, fingerprint: &str, ttl: Duration, producer: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, LookupError>> + Send + 'static,
    {
        let rx = {
            let mut inner = self.shared.lock_inner();
            let now = Instant::now();

            match inner.entries.get(fingerprint) {
                Some(entry) if entry.is_live(now) => {
                    self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint, "cache hit");
                    return Ok(entry.value.clone());
                }
                Some(_) => {
                    // Expired: treat as absent, evict lazily
                    inner.entries.remove(fingerprint);
                    self.shared.stats.evicted.fetch_add(1, Ordering::Relaxed);
                }
                None => {}
            }

            if let Some(rx) = inner.in_flight.get(fingerprint) {
                self.shared.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint, "coalescing onto in-flight lookup");
                rx.clone()
            } else {
                self.shared.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint, ttl_ms = ttl.as_millis() as u64, "cache miss, starting flight");

                let (tx, rx) = watch::channel(None);
                inner.in_flight.insert(fingerprint.to_string(), rx.clone());

                let flight = producer();
                let shared = Arc::clone(&self.shared);
                let key = fingerprint.to_string();
                tokio::spawn(async move {
                    let result: SharedResult<V> = flight.await.map_err(Arc::new);
                    {
                        let mut inner = shared.lock_inner();
                        if let Ok(ref value) = result {
                            if !ttl.is_zero() {
                                inner.entries.insert(
                                    key.clone(),
                                    CacheEntry {
                                        value: value.clone(),
                                        stored_at: Instant::now(),
                                        ttl,
                                    },
                                );
                                shared.stats.stores.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        // Settlement removes the handle whether or not the
                        // value was cached; a failed flight must not wedge
                        // future callers.
                        inner.in_flight.remove(&key);
                    }
                    let _ = tx.send(Some(result));
                });
                rx
            }
        };

        Self::await_flight(rx).await
    }

    async fn await_flight(mut rx: FlightRx<V>) -> SharedResult<V> {
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // Producer task died without settling (panic/abort)
                return Err(Arc::new(LookupError::Aborted));
            }
        }
    }

    /// Spawn a background sweeper that evicts expired entries on an
    /// interval until `cancel` fires. Optional; lazy eviction alone keeps
    /// correctness, the sweeper only bounds memory.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        info!(interval_secs = interval.as_secs(), "cache sweeper started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "cache sweep evicted expired entries");
                        }
                    }
                }
            }
        })
    }
}
