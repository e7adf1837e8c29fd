//! Expiring concurrent caches
//!
//! [`TtlCache`] backs both the router's forwarding dedup cache and the
//! validators' duplicate detection. An entry means "this key was processed
//! within the TTL window". Expired entries are evicted lazily on access and
//! in bulk by [`TtlCache::prune_expired`], which a background sweeper can run
//! periodically.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Concurrent key-value map whose entries expire after a fixed TTL
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }

    /// Insert or refresh an entry
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Insert only if no live entry exists
    ///
    /// Check and insert happen under the shard lock, so of several concurrent
    /// callers with the same key exactly one gets `true`.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let fresh = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if self.is_expired(occupied.get()) {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    /// Check for a live entry, evicting it if it has expired
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Value of a live entry
    pub fn get(&self, key: &K) -> Option<V> {
        let live = match self.entries.get(key) {
            None => return None,
            Some(entry) if self.is_expired(&entry) => None,
            Some(entry) => Some(entry.value.clone()),
        };
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| self.is_expired(entry));
        }
        live
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drop every expired entry, returning how many were evicted
    pub fn prune_expired(&self) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let live = !self.is_expired(entry);
            if !live {
                evicted += 1;
            }
            live
        });
        evicted
    }

    /// Number of entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Periodically prune expired entries in the background
    ///
    /// The task holds a weak reference and stops once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.prune_expired();
                if evicted > 0 {
                    trace!(evicted, remaining = cache.len(), "Pruned expired cache entries");
                }
            }
        })
    }
}
