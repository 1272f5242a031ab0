//! Bounded, time-expiring response store.
//!
//! # Eviction
//! - Time: an entry past its TTL is no longer fresh. It stays readable as a
//!   stale value for the stale grace period, then is removed
//! - Capacity: past `max_entries`, the least-recently-used entry goes,
//!   whatever its remaining TTL
//!
//! # Invalidation
//! Entries may be stored under dependency tags. A secondary index from tag
//! to keys makes `invalidate_tag` exact: it removes the keys stored under
//! that tag and nothing else.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::key::CacheTag;

/// Result of a lookup that distinguishes expired entries from absent ones.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    /// The entry is past its TTL but inside the stale grace period. It is
    /// kept, so every read during an outage can use it as last-known-good.
    Expired(V),
    Miss,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    last_used: u64,
    tags: Vec<CacheTag>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }

    fn is_past_grace(&self, now: Instant, grace: Duration) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl.saturating_add(grace)
    }
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Recency stamp → key, oldest first.
    recency: BTreeMap<u64, String>,
    /// Tag → keys stored under it.
    index: HashMap<CacheTag, HashSet<String>>,
    clock: u64,
    max_entries: usize,
    stale_grace: Duration,
}

impl<V> CacheInner<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: &str) {
        let stamp = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.last_used);
            entry.last_used = stamp;
            self.recency.insert(stamp, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_used);
        for tag in &entry.tags {
            if let Some(keys) = self.index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn evict_to_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.max_entries {
            let Some((_, key)) = self.recency.pop_first() else { break };
            if let Some(entry) = self.entries.remove(&key) {
                for tag in &entry.tags {
                    if let Some(keys) = self.index.get_mut(tag) {
                        keys.remove(&key);
                        if keys.is_empty() {
                            self.index.remove(tag);
                        }
                    }
                }
                tracing::trace!(key = %key, "Evicted least recently used cache entry");
                evicted += 1;
            }
        }
        evicted
    }
}

/// Thread-safe LRU cache with per-entry TTL.
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ResponseCache<V> {
    /// A cache that drops entries as soon as they expire.
    pub fn new(max_entries: usize) -> Self {
        Self::with_stale_grace(max_entries, Duration::ZERO)
    }

    /// A cache that keeps expired entries readable as stale values for
    /// `stale_grace` past their TTL.
    pub fn with_stale_grace(max_entries: usize, stale_grace: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                index: HashMap::new(),
                clock: 0,
                max_entries: max_entries.max(1),
                stale_grace,
            }),
        }
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.lookup(key) {
            Lookup::Hit(v) => Some(v),
            Lookup::Expired(_) | Lookup::Miss => None,
        }
    }

    pub fn lookup(&self, key: &str) -> Lookup<V> {
        let now = Instant::now();
        let mut inner = self.lock();

        let grace = inner.stale_grace;
        match inner.entries.get(key) {
            None => return Lookup::Miss,
            Some(entry) if entry.is_past_grace(now, grace) => {
                inner.remove(key);
                return Lookup::Miss;
            }
            Some(entry) if entry.is_expired(now) => return Lookup::Expired(entry.value.clone()),
            Some(_) => {}
        }

        inner.touch(key);
        match inner.entries.get(key) {
            Some(entry) => Lookup::Hit(entry.value.clone()),
            None => Lookup::Miss,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.set_tagged(key, value, ttl, Vec::new());
    }

    /// Store `value` and index it under `tags`. Replaces any previous entry
    /// for the key (last writer wins).
    pub fn set_tagged(&self, key: impl Into<String>, value: V, ttl: Duration, tags: Vec<CacheTag>) {
        let key = key.into();
        let mut inner = self.lock();

        inner.remove(&key);
        let stamp = inner.tick();
        for tag in &tags {
            inner.index.entry(tag.clone()).or_default().insert(key.clone());
        }
        inner.recency.insert(stamp, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
                last_used: stamp,
                tags,
            },
        );
        inner.evict_to_capacity();
    }

    /// Remove every entry whose key matches `predicate`.
    pub fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner.entries.keys().filter(|k| predicate(k)).cloned().collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    /// Remove exactly the entries stored under `tag`.
    pub fn invalidate_tag(&self, tag: &CacheTag) -> usize {
        let mut inner = self.lock();
        let keys = inner.index.remove(tag).unwrap_or_default();
        let mut removed = 0;
        for key in &keys {
            if inner.remove(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove all entries past their TTL and stale grace period.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let grace = inner.stale_grace;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_past_grace(now, grace))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.index.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().max_entries
    }

    /// Change the capacity, evicting LRU entries if it shrinks.
    pub fn set_capacity(&self, max_entries: usize) -> usize {
        let mut inner = self.lock();
        inner.max_entries = max_entries.max(1);
        inner.evict_to_capacity()
    }

    pub fn stale_grace(&self) -> Duration {
        self.lock().stale_grace
    }

    pub fn set_stale_grace(&self, stale_grace: Duration) {
        self.lock().stale_grace = stale_grace;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().expect("response cache mutex poisoned")
    }
}
