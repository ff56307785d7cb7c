use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            timestamp: now,
            expiry: ttl.map(|ttl| now + ttl),
        }
    }

    /// An entry without expiry never goes stale
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry > now,
            None => true,
        }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_minutes()
    }
}

/// Write counter of one key, as seen by a reader before it goes to the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    writes: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry<serde_json::Value>>,
    last_access: HashMap<String, DateTime<Utc>>,
    /// Bumped by every insert or remove of a key
    writes: HashMap<String, u64>,
    /// Bumped by `clear`
    epoch: u64,
}

impl CacheState {
    fn generation(&self, key: &str) -> Generation {
        Generation {
            epoch: self.epoch,
            writes: self.writes.get(key).copied().unwrap_or(0),
        }
    }

    fn bump(&mut self, key: &str) {
        *self.writes.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// In-memory document cache shared by every caller of one store.
///
/// Expired entries are dropped lazily, when a lookup finds them.
///
/// A reader that missed the cache refills it with [`TtlCache::fill`], which
/// only succeeds if no write to the key happened since the reader took its
/// [`TtlCache::generation`]. A slow read therefore never puts a document
/// back that a later write replaced.
#[derive(Debug, Default)]
pub struct TtlCache {
    state: Mutex<CacheState>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached document if present and unexpired.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<serde_json::Value> {
        let mut state = self.state();
        let valid = state.entries.get(key).map(|entry| entry.is_valid(now))?;
        if !valid {
            state.entries.remove(key);
            return None;
        }
        state.last_access.insert(key.to_string(), now);
        state.entries.get(key).map(|entry| entry.data.clone())
    }

    pub fn insert(
        &self,
        key: &str,
        data: serde_json::Value,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) {
        let mut state = self.state();
        state.bump(key);
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(data, now, ttl));
        state.last_access.insert(key.to_string(), now);
    }

    pub fn generation(&self, key: &str) -> Generation {
        self.state().generation(key)
    }

    /// Cache a document read from the medium, without expiry, unless the key
    /// was written, removed or cleared after `seen` was taken.
    pub fn fill(
        &self,
        key: &str,
        data: serde_json::Value,
        now: DateTime<Utc>,
        seen: Generation,
    ) -> bool {
        let mut state = self.state();
        if state.generation(key) != seen {
            return false;
        }
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(data, now, None));
        state.last_access.insert(key.to_string(), now);
        true
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.state();
        state.bump(key);
        state.entries.remove(key);
        state.last_access.remove(key);
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.last_access.clear();
        state.writes.clear();
        state.epoch += 1;
    }

    /// Number of entries held, including expired ones not yet looked up
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_access(&self) -> HashMap<String, DateTime<Utc>> {
        self.state().last_access.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_expiry_is_always_valid() {
        let now = Utc::now();
        let entry = CacheEntry::new(1, now, None);
        assert!(entry.is_valid(now + Duration::days(365)));
    }

    #[test]
    fn test_entry_expires_at_deadline() {
        let now = Utc::now();
        let entry = CacheEntry::new(1, now, Some(Duration::minutes(5)));
        assert!(entry.is_valid(now + Duration::minutes(4)));
        // expiry must be strictly in the future
        assert!(!entry.is_valid(now + Duration::minutes(5)));
        assert_eq!(entry.age_minutes(now + Duration::minutes(3)), 3);
    }

    #[test]
    fn test_expired_entry_dropped_on_lookup() {
        let now = Utc::now();
        let cache = TtlCache::new();
        cache.insert("k", json!([1, 2]), now, Some(Duration::minutes(1)));
        assert_eq!(cache.get("k", now), Some(json!([1, 2])));
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.get("k", now + Duration::minutes(2)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_access_tracks_hits() {
        let now = Utc::now();
        let cache = TtlCache::new();
        cache.insert("k", json!(1), now, None);

        let later = now + Duration::seconds(30);
        cache.get("k", later);
        assert_eq!(cache.last_access().get("k"), Some(&later));

        cache.remove("k");
        assert!(cache.last_access().is_empty());
    }

    #[test]
    fn test_fill_refused_after_intervening_write() {
        let now = Utc::now();
        let cache = TtlCache::new();

        let seen = cache.generation("k");
        cache.insert("k", json!([1, 2]), now, None);
        assert!(!cache.fill("k", json!([1]), now, seen));
        assert_eq!(cache.get("k", now), Some(json!([1, 2])));

        let seen = cache.generation("k");
        cache.remove("k");
        assert!(!cache.fill("k", json!([1, 2]), now, seen));
        assert!(cache.is_empty());

        let seen = cache.generation("k");
        cache.clear();
        assert!(!cache.fill("k", json!([1, 2]), now, seen));

        let seen = cache.generation("k");
        assert!(cache.fill("k", json!([3]), now, seen));
        assert_eq!(cache.get("k", now), Some(json!([3])));
    }

    #[test]
    fn test_expiry_on_lookup_is_not_a_write() {
        let now = Utc::now();
        let cache = TtlCache::new();
        cache.insert("k", json!(1), now, Some(Duration::minutes(1)));

        let seen = cache.generation("k");
        assert_eq!(cache.get("k", now + Duration::minutes(2)), None);
        assert!(cache.fill("k", json!(1), now, seen));
    }
}
