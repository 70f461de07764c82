//! Two-tier weather cache.
//!
//! The volatile tier is an in-process map; the persistent tier is any
//! [`PersistentStore`] (SQLite in production). Both tiers share one freshness
//! rule: an entry is usable while `now - stored_at < max_age`. Stale entries
//! are never deleted, only ignored.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::{
    error::CacheError,
    model::{CacheEntry, WeatherSnapshot},
};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Default freshness window for both tiers, in minutes.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 30;

pub fn default_max_age() -> chrono::Duration {
    chrono::Duration::minutes(DEFAULT_MAX_AGE_MINUTES)
}

/// One row of the persistent tier, exactly as stored.
///
/// `data` is the JSON-encoded snapshot and `timestamp` is text, so a row can be
/// unreadable; see [`PersistedRecord::into_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub location: String,
    pub data: String,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("unreadable timestamp {0:?}")]
    Timestamp(String),

    #[error("unreadable snapshot: {0}")]
    Data(#[from] serde_json::Error),
}

impl PersistedRecord {
    pub fn from_entry(entry: &CacheEntry) -> Result<Self, serde_json::Error> {
        Ok(Self {
            location: entry.location_key.clone(),
            data: entry.snapshot.to_json()?,
            timestamp: entry.stored_at.to_rfc3339(),
        })
    }

    pub fn into_entry(self) -> Result<CacheEntry, RecordError> {
        let stored_at =
            parse_timestamp(&self.timestamp).ok_or_else(|| RecordError::Timestamp(self.timestamp))?;
        let snapshot = WeatherSnapshot::from_json(&self.data)?;

        Ok(CacheEntry { location_key: self.location, snapshot, stored_at })
    }
}

/// Parses a stored timestamp. Accepts RFC 3339 and naive
/// `YYYY-MM-DD HH:MM:SS[.fff]` text, the latter read as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Backing store for the persistent tier.
///
/// `upsert` must be atomic: a concurrent `get` sees either the old row or the
/// new one.
pub trait PersistentStore: Send + Sync + Debug {
    fn get(&self, location: &str) -> Result<Option<PersistedRecord>, CacheError>;
    fn upsert(&self, record: &PersistedRecord) -> Result<(), CacheError>;
}

/// Volatile + persistent cache keyed by location key.
///
/// Operations on the same key are serialized by a per-key lock so that a
/// `store` and a repopulating `lookup` can never interleave. Different keys
/// only share the volatile map's lock, which is never held across I/O.
#[derive(Debug)]
pub struct TieredCache {
    volatile: RwLock<HashMap<String, CacheEntry>>,
    persistent: Box<dyn PersistentStore>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TieredCache {
    pub fn new(persistent: Box<dyn PersistentStore>) -> Self {
        Self { volatile: RwLock::new(HashMap::new()), persistent, key_locks: Mutex::new(HashMap::new()) }
    }

    /// Cache backed by an in-memory SQLite database.
    pub fn in_memory() -> Result<Self, CacheError> {
        Ok(Self::new(Box::new(SqliteStore::in_memory()?)))
    }

    /// Returns a fresh entry for `key`, consulting the volatile tier first.
    ///
    /// A fresh persistent hit is copied into the volatile tier before it is
    /// returned. Persistent-tier failures and unreadable rows count as misses.
    pub fn lookup(&self, key: &str, max_age: chrono::Duration) -> Option<CacheEntry> {
        self.with_key_lock(key, || self.lookup_locked(key, max_age))
    }

    fn lookup_locked(&self, key: &str, max_age: chrono::Duration) -> Option<CacheEntry> {
        let now = Utc::now();

        if let Some(entry) = self.volatile.read().get(key) {
            if entry.is_fresh(now, max_age) {
                tracing::info!(location = key, "Using in-memory cache");
                return Some(entry.clone());
            }
        }

        let record = match self.persistent.get(key) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(location = key, error = %err, "Persistent cache read failed");
                return None;
            }
        };

        let entry = match record.into_entry() {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(location = key, error = %err, "Ignoring corrupt persistent cache row");
                return None;
            }
        };

        if !entry.is_fresh(now, max_age) {
            tracing::debug!(location = key, stored_at = %entry.stored_at, "Persistent cache entry is stale");
            return None;
        }

        tracing::info!(location = key, "Using persistent cache");
        self.volatile.write().insert(key.to_string(), entry.clone());
        Some(entry)
    }

    /// Upserts `snapshot` under `key` in both tiers, stamped with the current time.
    ///
    /// A persistent write failure is logged and the volatile tier is still
    /// updated; the cache only ever saves provider calls.
    pub fn store(&self, key: &str, snapshot: WeatherSnapshot) {
        let entry = CacheEntry::new(key, snapshot);

        self.with_key_lock(key, || {
            match PersistedRecord::from_entry(&entry) {
                Ok(record) => {
                    if let Err(err) = self.persistent.upsert(&record) {
                        tracing::warn!(location = key, error = %err, "Persistent cache write failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(location = key, error = %err, "Could not serialize snapshot for persistent cache");
                }
            }

            self.volatile.write().insert(key.to_string(), entry);
        });
    }

    /// Drops every volatile entry, leaving the persistent tier untouched.
    pub fn clear_volatile(&self) {
        self.volatile.write().clear();
    }

    /// Runs `f` while holding the lock for `key`.
    ///
    /// The lock's map slot is dropped again once no other caller holds or
    /// waits on it, so the map only ever contains keys in use.
    fn with_key_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.key_locks.lock().entry(key.to_string()).or_default().clone();

        let out = {
            let _guard = lock.lock();
            f()
        };

        let mut locks = self.key_locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::snapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a real store and counts how often each tier method is hit.
    #[derive(Debug, Clone, Default)]
    struct Counters {
        gets: Arc<AtomicUsize>,
        upserts: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct CountingStore {
        inner: SqliteStore,
        counters: Counters,
    }

    impl PersistentStore for CountingStore {
        fn get(&self, location: &str) -> Result<Option<PersistedRecord>, CacheError> {
            self.counters.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(location)
        }

        fn upsert(&self, record: &PersistedRecord) -> Result<(), CacheError> {
            self.counters.upserts.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert(record)
        }
    }

    fn counting_cache() -> (TieredCache, Counters) {
        let counters = Counters::default();
        let store = CountingStore { inner: SqliteStore::in_memory().unwrap(), counters: counters.clone() };
        (TieredCache::new(Box::new(store)), counters)
    }

    #[test]
    fn store_then_lookup_returns_snapshot() {
        let cache = TieredCache::in_memory().unwrap();
        let snap = snapshot("New York", 20.0);

        cache.store("10001", snap.clone());

        let entry = cache.lookup("10001", default_max_age()).expect("fresh entry");
        assert_eq!(entry.snapshot, snap);
        assert_eq!(entry.location_key, "10001");
    }

    #[test]
    fn zero_max_age_is_always_stale() {
        let cache = TieredCache::in_memory().unwrap();
        cache.store("10001", snapshot("New York", 20.0));

        assert!(cache.lookup("10001", chrono::Duration::zero()).is_none());
    }

    #[test]
    fn unknown_key_misses() {
        let cache = TieredCache::in_memory().unwrap();
        assert!(cache.lookup("paris", default_max_age()).is_none());
    }

    #[test]
    fn storing_twice_keeps_one_entry_with_newer_timestamp() {
        let cache = TieredCache::in_memory().unwrap();
        let snap = snapshot("London", 14.0);

        cache.store("london", snap.clone());
        let first = cache.lookup("london", default_max_age()).unwrap();
        cache.store("london", snap.clone());
        let second = cache.lookup("london", default_max_age()).unwrap();

        assert_eq!(second.snapshot, snap);
        assert!(second.stored_at >= first.stored_at);
        assert_eq!(cache.volatile.read().len(), 1);
    }

    #[test]
    fn store_replaces_previous_snapshot() {
        let cache = TieredCache::in_memory().unwrap();
        cache.store("london", snapshot("London", 14.0));
        cache.store("london", snapshot("London", 18.0));

        cache.clear_volatile();
        let entry = cache.lookup("london", default_max_age()).unwrap();
        assert_eq!(entry.snapshot.current.temperature_c, 18.0);
    }

    #[test]
    fn volatile_hit_skips_persistent_tier() {
        let (cache, counters) = counting_cache();
        cache.store("delhi", snapshot("Delhi", 35.0));

        assert!(cache.lookup("delhi", default_max_age()).is_some());
        assert_eq!(counters.gets.load(Ordering::SeqCst), 0);
        assert_eq!(counters.upserts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persistent_hit_repopulates_volatile_tier() {
        let (cache, counters) = counting_cache();
        let snap = snapshot("Delhi", 35.0);
        cache.store("delhi", snap.clone());
        cache.clear_volatile();

        let first = cache.lookup("delhi", default_max_age()).expect("persistent hit");
        assert_eq!(first.snapshot, snap);
        assert_eq!(counters.gets.load(Ordering::SeqCst), 1);

        let second = cache.lookup("delhi", default_max_age()).expect("volatile hit");
        assert_eq!(second.snapshot, snap);
        assert_eq!(counters.gets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_persistent_row_is_a_miss() {
        let (cache, _) = counting_cache();
        let old = Utc::now() - chrono::Duration::hours(2);
        let record = PersistedRecord {
            location: "oslo".into(),
            data: snapshot("Oslo", 3.0).to_json().unwrap(),
            timestamp: old.format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        cache.persistent.upsert(&record).unwrap();

        assert!(cache.lookup("oslo", default_max_age()).is_none());
        assert!(cache.volatile.read().get("oslo").is_none());
    }

    #[test]
    fn naive_text_timestamp_is_accepted() {
        let (cache, _) = counting_cache();
        let recent = Utc::now() - chrono::Duration::minutes(5);
        let record = PersistedRecord {
            location: "oslo".into(),
            data: snapshot("Oslo", 3.0).to_json().unwrap(),
            timestamp: recent.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        };
        cache.persistent.upsert(&record).unwrap();

        assert!(cache.lookup("oslo", default_max_age()).is_some());
    }

    #[test]
    fn corrupt_rows_are_treated_as_stale() {
        let (cache, _) = counting_cache();
        cache
            .persistent
            .upsert(&PersistedRecord {
                location: "bad-ts".into(),
                data: snapshot("X", 1.0).to_json().unwrap(),
                timestamp: "yesterday-ish".into(),
            })
            .unwrap();
        cache
            .persistent
            .upsert(&PersistedRecord {
                location: "bad-data".into(),
                data: "{not json".into(),
                timestamp: Utc::now().to_rfc3339(),
            })
            .unwrap();

        assert!(cache.lookup("bad-ts", default_max_age()).is_none());
        assert!(cache.lookup("bad-data", default_max_age()).is_none());
    }

    #[test]
    fn concurrent_stores_leave_tiers_consistent() {
        let cache = Arc::new(TieredCache::in_memory().unwrap());

        let handles: Vec<_> = (0..8_i32)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        cache.store("shared", snapshot("Shared", f64::from(i)));
                        cache.store(&format!("own-{i}"), snapshot("Own", f64::from(i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let volatile = cache.lookup("shared", default_max_age()).unwrap();
        let persisted = cache.persistent.get("shared").unwrap().unwrap().into_entry().unwrap();
        assert_eq!(volatile.snapshot, persisted.snapshot);
        assert_eq!(volatile.stored_at, persisted.stored_at);

        for i in 0..8_i32 {
            let own = cache.lookup(&format!("own-{i}"), default_max_age()).unwrap();
            assert_eq!(own.snapshot.current.temperature_c, f64::from(i));
        }
        assert!(cache.key_locks.lock().is_empty());
    }

    #[test]
    fn key_locks_are_released_after_use() {
        let cache = TieredCache::in_memory().unwrap();

        for i in 0..1_000 {
            assert!(cache.lookup(&format!("nowhere-{i}"), default_max_age()).is_none());
        }
        cache.store("paris", snapshot("Paris", 21.0));
        assert!(cache.lookup("paris", default_max_age()).is_some());

        assert!(cache.key_locks.lock().is_empty());
    }

    #[test]
    fn parse_timestamp_formats() {
        assert!(parse_timestamp("2025-06-01T12:00:00+02:00").is_some());
        assert!(parse_timestamp("2025-06-01 12:00:00").is_some());
        assert!(parse_timestamp("2025-06-01 12:00:00.123456").is_some());
        assert!(parse_timestamp("2025-06-01T12:00:00.5").is_some());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("06/01/2025").is_none());
    }
}
