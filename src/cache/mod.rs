//! Capacity-bounded caches with reference-counted eviction. Every cached
//! resource is accessed through `with_entry`, which pins the entry for the
//! duration of the caller's work; eviction is strict LRU over unpinned
//! entries only, so an embedded-DB handle can never be closed mid-read.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::Future;
use lru::LruCache;
use prometheus::IntCounter;
use sqlx::SqlitePool;
use tokio::sync::OnceCell;

use crate::dump::encoding::{DocumentBlob, ResultChunkBlob};
use crate::dump::store;
use crate::metrics::Metrics;

/// Uniform capacity accounting: every cached value reports a weight.
/// Connection handles weigh one unit each; decoded blobs report an
/// estimate of their decoded size in bytes.
pub trait Measured {
    fn weight(&self) -> u64;
}

impl Measured for SqlitePool {
    fn weight(&self) -> u64 {
        1
    }
}

impl Measured for Arc<DocumentBlob> {
    fn weight(&self) -> u64 {
        self.estimated_size().max(1)
    }
}

impl Measured for Arc<ResultChunkBlob> {
    fn weight(&self) -> u64 {
        self.estimated_size().max(1)
    }
}

#[derive(Clone)]
pub struct CacheCounters {
    pub hits: IntCounter,
    pub misses: IntCounter,
    pub evictions: IntCounter,
}

impl CacheCounters {
    #[cfg(test)]
    pub(crate) fn unregistered() -> Self {
        CacheCounters {
            hits: IntCounter::new("test_hits", "test").unwrap(),
            misses: IntCounter::new("test_misses", "test").unwrap(),
            evictions: IntCounter::new("test_evictions", "test").unwrap(),
        }
    }
}

struct CacheEntry<V> {
    /// Pin count; mutated only while the cache state lock is held.
    pins: AtomicUsize,
    /// Weight recorded once the factory resolves.
    weight: AtomicU64,
    cell: OnceCell<V>,
}

struct CacheState<K: Hash + Eq, V> {
    entries: HashMap<K, Arc<CacheEntry<V>>>,
    /// Recency order over unpinned entries only.
    recency: LruCache<K, ()>,
    total_weight: u64,
}

pub struct BoundedCache<K: Hash + Eq, V> {
    capacity: u64,
    state: Mutex<CacheState<K, V>>,
    counters: CacheCounters,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Measured + Clone,
{
    pub fn new(capacity: u64, counters: CacheCounters) -> Self {
        BoundedCache {
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: LruCache::unbounded(),
                total_weight: 0,
            }),
            counters,
        }
    }

    /// Acquire the entry for `key` (running `factory` if it is not
    /// resident), pin it, and run `use_fn` against the value. Concurrent
    /// misses on the same key coalesce onto a single factory call. The pin
    /// is dropped on the way out, including on error and cancellation.
    pub async fn with_entry<Factory, Fut, Use, UseFut, R>(
        &self,
        key: K,
        factory: Factory,
        use_fn: Use,
    ) -> Result<R>
    where
        Factory: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
        Use: FnOnce(V) -> UseFut,
        UseFut: Future<Output = Result<R>>,
    {
        let entry = self.acquire(&key);
        let _pin = PinGuard {
            cache: self,
            key: key.clone(),
            entry: entry.clone(),
        };

        let value = entry
            .cell
            .get_or_try_init(|| async {
                let value = factory().await?;
                let weight = value.weight().max(1);
                entry.weight.store(weight, Ordering::Relaxed);
                self.state.lock().unwrap().total_weight += weight;
                Ok::<V, anyhow::Error>(value)
            })
            .await?
            .clone();

        use_fn(value).await
    }

    fn acquire(&self, key: &K) -> Arc<CacheEntry<V>> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get(key) {
            let entry = entry.clone();
            entry.pins.fetch_add(1, Ordering::Relaxed);
            state.recency.pop(key);
            self.counters.hits.inc();
            entry
        } else {
            let entry = Arc::new(CacheEntry {
                pins: AtomicUsize::new(1),
                weight: AtomicU64::new(0),
                cell: OnceCell::new(),
            });
            state.entries.insert(key.clone(), entry.clone());
            self.counters.misses.inc();
            entry
        }
    }

    fn release(&self, key: &K, entry: &CacheEntry<V>) {
        let mut state = self.state.lock().unwrap();
        if entry.pins.fetch_sub(1, Ordering::Relaxed) == 1 {
            if entry.cell.initialized() {
                state.recency.put(key.clone(), ());
            } else {
                // The factory failed; drop the placeholder so a later call
                // retries instead of finding a dead entry.
                state.entries.remove(key);
            }
        }
        self.evict(&mut state);
    }

    fn evict(&self, state: &mut CacheState<K, V>) {
        while state.total_weight > self.capacity {
            let Some((key, _)) = state.recency.pop_lru() else {
                break;
            };
            if let Some(entry) = state.entries.remove(&key) {
                state.total_weight -= entry.weight.load(Ordering::Relaxed);
                self.counters.evictions.inc();
            }
        }
    }

    #[cfg(test)]
    fn resident(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

struct PinGuard<'a, K: Hash + Eq + Clone, V: Measured + Clone> {
    cache: &'a BoundedCache<K, V>,
    key: K,
    entry: Arc<CacheEntry<V>>,
}

impl<K: Hash + Eq + Clone, V: Measured + Clone> Drop for PinGuard<'_, K, V> {
    fn drop(&mut self) {
        self.cache.release(&self.key, &self.entry);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheCapacities {
    pub connections: u64,
    pub documents: u64,
    pub result_chunks: u64,
}

/// The three shared caches used on every query path.
pub struct CacheTier {
    pub connections: BoundedCache<PathBuf, SqlitePool>,
    pub documents: BoundedCache<(i64, String), Arc<DocumentBlob>>,
    pub result_chunks: BoundedCache<(i64, i64), Arc<ResultChunkBlob>>,
}

impl CacheTier {
    pub fn new(capacities: CacheCapacities, metrics: &Metrics) -> Self {
        CacheTier {
            connections: BoundedCache::new(
                capacities.connections,
                metrics.cache_counters("connections"),
            ),
            documents: BoundedCache::new(capacities.documents, metrics.cache_counters("documents")),
            result_chunks: BoundedCache::new(
                capacities.result_chunks,
                metrics.cache_counters("result_chunks"),
            ),
        }
    }

    /// Open (or reuse) the read-only pool for a dump file and run `use_fn`
    /// under its pin. All dump-file access funnels through here.
    pub async fn with_dump_connection<Use, UseFut, R>(&self, path: PathBuf, use_fn: Use) -> Result<R>
    where
        Use: FnOnce(SqlitePool) -> UseFut,
        UseFut: Future<Output = Result<R>>,
    {
        let open_path = path.clone();
        self.connections
            .with_entry(
                path,
                move || async move { store::open_read_pool(&open_path).await },
                use_fn,
            )
            .await
    }
}
