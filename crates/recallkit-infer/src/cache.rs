//! LRU memoization cache for expensive remote calls.
//!
//! Wraps an embedding or completion call with an exact-match cache keyed by
//! the call's full argument tuple. Default: 1000 entries.
//!
//! Concurrent callers asking for the same key share one in-flight
//! computation: one of them runs it and the rest receive its outcome,
//! success or failure. Failed computations are never stored, so the next
//! request after a failure runs again. If the computing caller is cancelled,
//! its slot is released and a waiting caller takes over.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use recallkit_core::{Error, Result, DEFAULT_CACHE_CAPACITY};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Cached result with its recency stamp.
struct CacheEntry<V> {
    value: V,
    tick: u64,
}

/// Outcome channel of a running computation; `None` while it runs.
type Flight<V, E> = watch::Sender<Option<std::result::Result<V, E>>>;

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls answered with a value without running `compute`
    /// (stored, or shared from an in-flight computation).
    pub hits: u64,
    /// Calls that ran `compute`.
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
}

/// Thread-safe, bounded, coalescing memoization cache.
pub struct MemoCache<K, V, E = Error> {
    inner: Mutex<CacheInner<K, V, E>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct CacheInner<K, V, E> {
    entries: HashMap<K, CacheEntry<V>>,
    /// tick -> key, oldest first.
    recency: BTreeMap<u64, K>,
    /// One entry per key whose computation is currently running.
    in_flight: HashMap<K, Flight<V, E>>,
    next_tick: u64,
    max_size: usize,
}

impl<K, V, E> CacheInner<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Return the stored value and mark it most recently used.
    fn touch(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = self.next_tick;
        self.next_tick += 1;
        self.recency.insert(entry.tick, key.clone());
        Some(entry.value.clone())
    }

    /// Store a value, evicting least recently used entries as needed.
    /// Returns how many entries were evicted.
    fn insert(&mut self, key: K, value: V) -> u64 {
        if let Some(old) = self.entries.remove(&key) {
            self.recency.remove(&old.tick);
        }

        let mut evicted = 0;
        while self.entries.len() >= self.max_size {
            match self.recency.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }

        let tick = self.next_tick;
        self.next_tick += 1;
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, CacheEntry { value, tick });
        evicted
    }
}

/// Releases the in-flight slot if the computing caller is dropped before
/// it finishes. Dropping the channel wakes the waiters.
struct FlightGuard<'a, K: Eq + Hash, V, E> {
    inner: &'a Mutex<CacheInner<K, V, E>>,
    key: &'a K,
    armed: bool,
}

impl<K: Eq + Hash, V, E> FlightGuard<'_, K, V, E> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<K: Eq + Hash, V, E> Drop for FlightGuard<'_, K, V, E> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().in_flight.remove(self.key);
            debug!("In-flight computation abandoned");
        }
    }
}

enum Role<V, E> {
    Lead,
    Wait(watch::Receiver<Option<std::result::Result<V, E>>>),
}

impl<K, V, E> MemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// Create a cache holding at most `max_size` results.
    pub fn new(max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::InvalidArgument(
                "cache capacity must be at least 1".into(),
            ));
        }
        Ok(Self::with_max_size(max_size))
    }

    /// Create a cache with the default capacity (1000 entries).
    pub fn default_cache() -> Self {
        Self::with_max_size(DEFAULT_CACHE_CAPACITY)
    }

    fn with_max_size(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_size.min(DEFAULT_CACHE_CAPACITY)),
                recency: BTreeMap::new(),
                in_flight: HashMap::new(),
                next_tick: 0,
                max_size,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached result for `key`, or run `compute` and cache it.
    ///
    /// `compute` runs at most once per key while the entry stays cached.
    /// Callers that arrive while it runs get the same outcome. Errors are
    /// returned unchanged and nothing is stored, so a later identical
    /// request runs `compute` again.
    pub async fn call<F, Fut>(&self, key: K, compute: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        loop {
            let role = {
                let mut inner = self.inner.lock();
                if let Some(value) = inner.touch(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                match inner.in_flight.get(&key) {
                    Some(flight) => Role::Wait(flight.subscribe()),
                    None => {
                        inner.in_flight.insert(key.clone(), watch::channel(None).0);
                        Role::Lead
                    }
                }
            };

            match role {
                Role::Lead => return self.lead(key, compute).await,
                Role::Wait(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(state) => state.clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(Ok(value)) => {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok(value);
                        }
                        Some(Err(e)) => return Err(e),
                        // The computing caller went away; try again.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Run `compute` for a slot this caller registered, then publish.
    async fn lead<F, Fut>(&self, key: K, compute: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let guard = FlightGuard {
            inner: &self.inner,
            key: &key,
            armed: true,
        };
        let result = compute().await;
        guard.disarm();

        self.misses.fetch_add(1, Ordering::Relaxed);
        let flight = {
            let mut inner = self.inner.lock();
            if let Ok(value) = &result {
                let evicted = inner.insert(key.clone(), value.clone());
                if evicted > 0 {
                    self.evictions.fetch_add(evicted, Ordering::Relaxed);
                    debug!(evicted, "Evicted least recently used entries");
                }
            }
            inner.in_flight.remove(&key)
        };

        if let Some(flight) = flight {
            flight.send_replace(Some(result.clone()));
        }
        result
    }

    /// Get a cached result, refreshing its recency. Never computes.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().touch(key)
    }

    /// Whether `key` is cached. Does not affect recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys whose computation is currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().max_size
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Clear all stored entries. Running computations still complete and
    /// store their results.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_compute(
        counter: &AtomicUsize,
        value: u32,
    ) -> impl Future<Output = std::result::Result<u32, Error>> + '_ {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cache: MemoCache<String, u32> = MemoCache::new(10).unwrap();
        let calls = AtomicUsize::new(0);

        let first = cache.call("k".into(), || counting_compute(&calls, 42)).await.unwrap();
        let second = cache.call("k".into(), || counting_compute(&calls, 99)).await.unwrap();

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, evictions: 0 });
    }

    #[tokio::test]
    async fn test_eviction_removes_least_recent() {
        let cache: MemoCache<&str, u32> = MemoCache::new(2).unwrap();
        let calls = AtomicUsize::new(0);

        cache.call("a", || counting_compute(&calls, 1)).await.unwrap();
        cache.call("b", || counting_compute(&calls, 2)).await.unwrap();
        cache.call("c", || counting_compute(&calls, 3)).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_access_protects_from_eviction() {
        let cache: MemoCache<&str, u32> = MemoCache::new(2).unwrap();
        let calls = AtomicUsize::new(0);

        cache.call("a", || counting_compute(&calls, 1)).await.unwrap();
        cache.call("b", || counting_compute(&calls, 2)).await.unwrap();
        // Hit on "a" makes "b" the least recently used
        cache.call("a", || counting_compute(&calls, 1)).await.unwrap();
        cache.call("c", || counting_compute(&calls, 3)).await.unwrap();

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let cache: MemoCache<&str, u32> = MemoCache::new(2).unwrap();
        let calls = AtomicUsize::new(0);

        cache.call("a", || counting_compute(&calls, 1)).await.unwrap();
        cache.call("b", || counting_compute(&calls, 2)).await.unwrap();
        assert_eq!(cache.get(&"a"), Some(1));
        cache.call("c", || counting_compute(&calls, 3)).await.unwrap();

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache: MemoCache<&str, u32> = MemoCache::new(10).unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let err = cache
            .call("k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(Error::Provider("rate limited".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(cache.is_empty());

        let value = cache.call("k", || counting_compute(&calls, 5)).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.contains(&"k"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_coalesce() {
        let cache: MemoCache<&str, u32> = MemoCache::new(10).unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let slow = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<u32, Error>(7)
        };

        let (a, b, c) = tokio::join!(
            cache.call("k", slow),
            cache.call("k", slow),
            cache.call("k", slow)
        );

        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(c.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1, evictions: 0 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coalescing_across_threads() {
        let cache: Arc<MemoCache<String, String>> = Arc::new(MemoCache::new(10).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .call("shared".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<_, Error>("done".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "done");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_hands_off_to_waiter() {
        let cache: MemoCache<&str, u32> = MemoCache::new(10).unwrap();

        let leader = tokio::time::timeout(
            Duration::from_millis(20),
            cache.call("k", || std::future::pending::<std::result::Result<u32, Error>>()),
        );
        let follower = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cache.call("k", || async { Ok::<u32, Error>(11) }).await
        };

        let (leader, follower) = tokio::join!(leader, follower);
        assert!(leader.is_err(), "leader should have timed out");
        assert_eq!(follower.unwrap(), 11);
        assert_eq!(cache.get(&"k"), Some(11));
    }

    #[tokio::test]
    async fn test_abandoned_slot_is_reusable() {
        let cache: MemoCache<&str, u32> = MemoCache::new(10).unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            cache.call("k", || std::future::pending::<std::result::Result<u32, Error>>()),
        )
        .await;
        assert!(abandoned.is_err());

        let value = cache.call("k", || async { Ok::<u32, Error>(3) }).await.unwrap();
        assert_eq!(value, 3);
        assert!(cache.contains(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_calls_release_their_slots() {
        let cache: MemoCache<u32, u32> = MemoCache::new(16).unwrap();

        for key in 0..5000 {
            let abandoned = tokio::time::timeout(
                Duration::from_micros(1),
                cache.call(key, || std::future::pending::<std::result::Result<u32, Error>>()),
            )
            .await;
            assert!(abandoned.is_err());
        }

        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_is_shared() {
        let cache: Arc<MemoCache<&'static str, u32>> = Arc::new(MemoCache::new(10).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .call("k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Err::<u32, _>(Error::Provider("upstream unavailable".into()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Provider(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());

        // Nothing was stored, so the next request computes again.
        let counter = calls.clone();
        let value = cache
            .call("k", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, Error>(4)
            })
            .await
            .unwrap();
        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slot_released_after_store() {
        let cache: MemoCache<&str, u32> = MemoCache::new(10).unwrap();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let leader = cache.call("k", || async move {
            let _ = gate.await;
            Ok::<u32, Error>(8)
        });
        let observer = async {
            tokio::task::yield_now().await;
            assert_eq!(cache.in_flight(), 1);
            assert!(!cache.contains(&"k"));
            release.send(()).ok();
        };

        let (value, ()) = tokio::join!(leader, observer);
        assert_eq!(value.unwrap(), 8);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.get(&"k"), Some(8));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result: Result<MemoCache<String, u32>> = MemoCache::new(0);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoCache::<&str, u32>::default_cache();
        assert_eq!(cache.capacity(), 1000);
        cache.call("a", || async { Ok::<u32, Error>(1) }).await.unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&"a").is_none());
    }
}
