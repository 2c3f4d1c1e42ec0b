//! # Feature aggregation and the coordinate cache
//!
//! `merge` combines partial vectors first-wins in source priority order.
//! The cache maps a rounded coordinate to an immutable `Arc<CacheEntry>`;
//! entries are swapped wholesale under a short write lock, so a reader sees
//! either the old entry or the new one. Stale entries are dropped lazily on
//! lookup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::coordinate::{CoordKey, Coordinate};
use crate::features::{FeatureValue, FeatureVector, PartialFeatureVector, Source};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CoordKey,
    pub vector: FeatureVector,
    pub degraded_sources: Vec<Source>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_sources.is_empty()
    }
}

pub struct FeatureCache {
    entries: RwLock<HashMap<CoordKey, Arc<CacheEntry>>>,
    ttl: Duration,
    degraded_ttl: Duration,
}

impl FeatureCache {
    /// Both TTLs must be positive; config validation rejects zero.
    pub fn new(ttl: Duration, degraded_ttl: Duration) -> Self {
        let floor = Duration::from_millis(1);
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: ttl.max(floor),
            degraded_ttl: degraded_ttl.max(floor),
        }
    }

    pub fn ttl_for(&self, degraded: bool) -> Duration {
        if degraded {
            self.degraded_ttl
        } else {
            self.ttl
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CoordKey, Arc<CacheEntry>>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CoordKey, Arc<CacheEntry>>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Fresh entry for `key`, evicting it if it has gone stale.
    pub fn get(&self, key: &CoordKey) -> Option<Arc<CacheEntry>> {
        let now = Instant::now();
        let stale = {
            let guard = self.read();
            let entry = guard.get(key)?;
            if entry.is_fresh_at(now) {
                return Some(Arc::clone(entry));
            }
            Arc::clone(entry)
        };

        let mut guard = self.write();
        // Only evict the entry we saw; a writer may have replaced it meanwhile.
        if guard.get(key).is_some_and(|cur| Arc::ptr_eq(cur, &stale)) {
            guard.remove(key);
            debug!(target: "advisor::cache", key = %key, "evicted stale entry");
        }
        None
    }

    /// Insert unless a fresh entry is already present; returns the entry now cached.
    pub fn put_if_absent_or_stale(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let now = Instant::now();
        let mut guard = self.write();
        if let Some(cur) = guard.get(&entry.key) {
            if cur.is_fresh_at(now) {
                return Arc::clone(cur);
            }
        }
        let entry = Arc::new(entry);
        guard.insert(entry.key, Arc::clone(&entry));
        entry
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First successful source wins per feature, in [`Source::ALL`] order.
pub fn merge(results: &[PartialFeatureVector]) -> FeatureVector {
    let mut ordered: Vec<&PartialFeatureVector> = results.iter().collect();
    ordered.sort_by_key(|p| p.source);

    let mut vector = FeatureVector::empty();
    for partial in ordered {
        for (name, value) in partial.iter() {
            if vector.get(name) == FeatureValue::Missing {
                vector.set(name, value);
            }
        }
    }
    vector
}

/// What a cache miss produces before merging.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub results: Vec<PartialFeatureVector>,
    pub degraded_sources: Vec<Source>,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub vector: FeatureVector,
    pub degraded_sources: Vec<Source>,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Resolved {
    fn from_entry(entry: &CacheEntry, from_cache: bool) -> Self {
        Self {
            vector: entry.vector.clone(),
            degraded_sources: entry.degraded_sources.clone(),
            from_cache,
            fetched_at: entry.fetched_at_utc,
        }
    }
}

pub struct Aggregator {
    cache: FeatureCache,
}

impl Aggregator {
    pub fn new(cache: FeatureCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    /// Fresh cached vector for `key`, counted as a hit or a miss.
    pub fn lookup(&self, key: &CoordKey) -> Option<Resolved> {
        match self.cache.get(key) {
            Some(entry) => {
                counter!("advisor_cache_lookups_total", "result" => "hit").increment(1);
                debug!(target: "advisor::cache", key = %key, "cache hit");
                Some(Resolved::from_entry(&entry, true))
            }
            None => {
                counter!("advisor_cache_lookups_total", "result" => "miss").increment(1);
                None
            }
        }
    }

    /// Merge a finished fetch batch and cache it. A fresh entry stored by a
    /// concurrent writer wins over this one.
    pub fn store(&self, key: CoordKey, fetched: Fetched) -> Resolved {
        let mut degraded = fetched.degraded_sources;
        degraded.sort();
        degraded.dedup();

        let entry = CacheEntry {
            key,
            vector: merge(&fetched.results),
            ttl: self.cache.ttl_for(!degraded.is_empty()),
            degraded_sources: degraded,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        };
        let stored = self.cache.put_if_absent_or_stale(entry);
        debug!(
            target: "advisor::cache",
            key = %key,
            ttl_secs = stored.ttl.as_secs(),
            degraded = stored.is_degraded(),
            "cache entry stored"
        );
        Resolved::from_entry(&stored, false)
    }

    /// Cached vector for `coordinate`, or run `fetch`, merge and cache the result.
    pub async fn resolve<F, Fut, E>(&self, coordinate: Coordinate, fetch: F) -> Result<Resolved, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched, E>>,
    {
        let key = coordinate.key();
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let fetched = fetch().await?;
        Ok(self.store(key, fetched))
    }
}
