//! In-process TTL cache with an injected clock.
//!
//! `get_or_compute` does not coalesce: two callers missing the same key at
//! the same time both run their compute function and the last insert wins.
//! The map is bounded; a full cache drops expired entries first, then the
//! entry closest to expiry.

pub mod keys;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

pub use keys::CacheKey;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = expiry(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `now + ttl`, saturating at the far future.
fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Bounded key → value store with per-entry expiry.
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            default_ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Unexpired value for `key`. An expired entry is removed on read.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            // Release the shard guard before removing
            drop(entry);
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl);
        let key = key.into();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.make_room(now);
        }
        self.entries.insert(key, Entry { value, expires_at });
    }

    fn make_room(&self, now: DateTime<Utc>) {
        let mut evicted = self.drop_expired(now);

        while self.entries.len() >= self.max_entries {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|e| e.value().expires_at)
                .map(|e| e.key().clone())
            else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            log::debug!("Cache full, evicted {evicted} entries");
        }
    }

    fn drop_expired(&self, now: DateTime<Utc>) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, e| {
            let live = e.expires_at > now;
            if !live {
                dropped += 1;
            }
            live
        });
        dropped
    }

    /// Cached value for `key`, or the result of `compute` stored under the
    /// default TTL. A failing compute stores nothing.
    pub fn get_or_compute<E>(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        self.get_or_compute_with_ttl(key, self.default_ttl, compute)
    }

    pub fn get_or_compute_with_ttl<E>(
        &self,
        key: &str,
        ttl: Duration,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        // No shard guard is held while computing
        let value = compute()?;
        self.insert_with_ttl(key, value.clone(), ttl);
        Ok(value)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let purged = self.drop_expired(self.clock.now());
        if purged > 0 {
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.len())
            .field("default_ttl", &self.default_ttl)
            .field("max_entries", &self.max_entries)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}
