use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, warn};

use super::cache::TtlCache;
use super::clock::{Clock, SystemClock};
use super::medium::{MemoryMedium, PersistentMedium};
use crate::error::{Result, StoreError};

/// Result of a read-modify-write closure passed to [`KeyValueStore::modify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<R> {
    /// Persist the modified document, then return the value
    Write(R),
    /// Leave storage untouched
    Keep(R),
}

/// Exclusive hold on a set of keys. Mutations of those keys by other
/// callers queue up (FIFO) until this is dropped.
///
/// While a `KeyLocks` is alive, its owner must not call the locking
/// operations (`set`, `modify`, `remove`, `clear_all`, ...) at all.
pub struct KeyLocks {
    keys: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
    /// Shared hold on the store; `clear_all` takes it exclusively
    _gate: OwnedRwLockReadGuard<()>,
}

impl KeyLocks {
    pub fn covers(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// Key-value store with an in-memory TTL cache over a persistent medium.
///
/// Reads never fail: storage or parse errors are logged and the caller gets
/// `None`/the default. Writes propagate every error.
pub struct KeyValueStore {
    medium: Arc<dyn PersistentMedium>,
    cache: TtlCache,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    gate: Arc<RwLock<()>>,
}

impl KeyValueStore {
    pub fn new(medium: Arc<dyn PersistentMedium>) -> Self {
        Self {
            medium,
            cache: TtlCache::new(),
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMedium::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ===== Serialization =====

    /// Encode a value into a `(key, document)` pair for [`Self::commit`].
    pub fn encode<T: Serialize + ?Sized>(
        key: &str,
        value: &T,
    ) -> Result<(String, serde_json::Value)> {
        let document =
            serde_json::to_value(value).map_err(|e| StoreError::serialization(key, e))?;
        Ok((key.to_string(), document))
    }

    // ===== Reads =====

    /// Strict read: cache first, then the medium (repopulating the cache
    /// without expiry). Unlike [`Self::get`], failures are returned.
    pub async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(document) = self.cache.get(key, self.clock.now()) {
            debug!(key = %key, "Cache hit");
            return serde_json::from_value(document)
                .map(Some)
                .map_err(|e| StoreError::serialization(key, e));
        }

        debug!(key = %key, "Cache miss");
        let seen = self.cache.generation(key);
        let Some(raw) = self.medium.get(key).await? else {
            return Ok(None);
        };
        let document: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| StoreError::serialization(key, e))?;
        if !self.cache.fill(key, document.clone(), self.clock.now(), seen) {
            debug!(key = %key, "Key written during read, not caching");
        }
        serde_json::from_value(document)
            .map(Some)
            .map_err(|e| StoreError::serialization(key, e))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.fetch(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Read failed, falling back to default");
                None
            }
        }
    }

    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).await.unwrap_or(default)
    }

    // ===== Writes =====

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, None).await
    }

    /// Persist `value`; the cache entry expires after `ttl` when given.
    pub async fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entry = Self::encode(key, value)?;
        let locks = self.lock_keys(&[key]).await;
        self.commit(&locks, vec![entry], ttl).await
    }

    /// Write several keys as one unit. Either every key is written or the
    /// medium is put back to its previous contents.
    pub async fn set_many(&self, entries: Vec<(String, serde_json::Value)>) -> Result<()> {
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        let locks = self.lock_keys(&keys).await;
        self.commit(&locks, entries, None).await
    }

    /// Serialized read-modify-write of one document.
    ///
    /// Concurrent `modify` calls on the same key run one after another, so
    /// none of them can overwrite another's update.
    pub async fn modify<T, R, F>(&self, key: &str, ttl: Option<Duration>, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<Change<R>>,
    {
        let locks = self.lock_keys(&[key]).await;
        let mut document: T = self.fetch(key).await?.unwrap_or_default();
        match f(&mut document)? {
            Change::Keep(result) => Ok(result),
            Change::Write(result) => {
                let entry = Self::encode(key, &document)?;
                self.commit(&locks, vec![entry], ttl).await?;
                Ok(result)
            }
        }
    }

    /// Write documents for keys the caller already holds.
    pub async fn commit(
        &self,
        locks: &KeyLocks,
        entries: Vec<(String, serde_json::Value)>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entries = entries
            .into_iter()
            .map(|(key, document)| (key, document, ttl))
            .collect();
        self.commit_each(locks, entries).await
    }

    /// [`Self::commit`] with a cache TTL per document.
    pub async fn commit_each(
        &self,
        locks: &KeyLocks,
        entries: Vec<(String, serde_json::Value, Option<Duration>)>,
    ) -> Result<()> {
        if let Some((key, _, _)) = entries.iter().find(|(k, _, _)| !locks.covers(k)) {
            return Err(StoreError::validation(format!(
                "write to {} without holding its lock",
                StoreError::quote(key)
            )));
        }

        if let [(key, document, _)] = entries.as_slice() {
            self.medium.set(key, document.to_string()).await?;
        } else {
            self.write_batch(&entries).await?;
        }

        let now = self.clock.now();
        for (key, document, ttl) in entries {
            debug!(key = %key, ttl_minutes = ?ttl.map(|t| t.num_minutes()), "Stored document");
            self.cache.insert(&key, document, now, ttl);
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        entries: &[(String, serde_json::Value, Option<Duration>)],
    ) -> Result<()> {
        // Capture what is there now so a failed batch can be undone
        let previous = join_all(entries.iter().map(|(key, _, _)| self.medium.get(key))).await;
        let mut snapshot = Vec::with_capacity(previous.len());
        for ((key, _, _), raw) in entries.iter().zip(previous) {
            snapshot.push((key.clone(), raw?));
        }

        let raw: Vec<(String, String)> = entries
            .iter()
            .map(|(key, document, _)| (key.clone(), document.to_string()))
            .collect();

        if let Err(e) = self.medium.set_many(raw).await {
            warn!(error = %e, keys = entries.len(), "Batch write failed, rolling back");
            for (key, old) in snapshot {
                let undo = match old {
                    Some(raw) => self.medium.set(&key, raw).await,
                    None => self.medium.remove(&key).await,
                };
                if let Err(undo_err) = undo {
                    warn!(key = %key, error = %undo_err, "Rollback of key failed");
                }
                self.cache.remove(&key);
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.remove_many(&[key]).await
    }

    pub async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let _locks = self.lock_keys(keys).await;
        for key in keys {
            // Drop the cache entry after the medium call, even if it failed:
            // the next read then reflects whatever the medium still holds
            let removed = self.medium.remove(key).await;
            self.cache.remove(key);
            removed?;
        }
        Ok(())
    }

    /// Wipe the whole persistent namespace and the cache.
    ///
    /// Waits for every in-flight mutation to finish and holds new ones off
    /// until the wipe is done.
    pub async fn clear_all(&self) -> Result<()> {
        let _exclusive = self.gate.write().await;
        let cleared = self.medium.clear().await;
        self.cache.clear();
        cleared?;
        debug!("Cleared store");
        Ok(())
    }

    // ===== Locking =====

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the mutation locks of `keys`, always in sorted order.
    pub async fn lock_keys(&self, keys: &[&str]) -> KeyLocks {
        let mut sorted: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        sorted.sort();
        sorted.dedup();

        let gate = self.gate.clone().read_owned().await;
        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            guards.push(self.key_lock(key).lock_owned().await);
        }
        KeyLocks {
            keys: sorted,
            _guards: guards,
            _gate: gate,
        }
    }

    // ===== Diagnostics =====

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub async fn key_count(&self) -> usize {
        match self.medium.list_keys().await {
            Ok(keys) => keys.len(),
            Err(e) => {
                warn!(error = %e, "Could not list storage keys");
                0
            }
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.medium.list_keys().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not list storage keys");
            Vec::new()
        })
    }

    pub fn last_access_by_key(&self) -> HashMap<String, DateTime<Utc>> {
        self.cache.last_access()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::storage::clock::ManualClock;

    /// Memory medium that refuses writes to selected keys, and can fail or
    /// stall reads.
    #[derive(Default)]
    pub(crate) struct FlakyMedium {
        pub inner: MemoryMedium,
        pub failing_keys: Mutex<HashSet<String>>,
        pub fail_reads: AtomicBool,
        /// Reads take their copy, then stall this many milliseconds
        pub read_delay_ms: AtomicU64,
    }

    impl FlakyMedium {
        pub fn fail_key(&self, key: &str) {
            self.failing_keys.lock().unwrap().insert(key.to_string());
        }

        fn check(&self, key: &str) -> io::Result<()> {
            if self.failing_keys.lock().unwrap().contains(key) {
                Err(io::Error::new(io::ErrorKind::Other, format!("write to {} refused", key)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl PersistentMedium for FlakyMedium {
        async fn get(&self, key: &str) -> io::Result<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "read refused"));
            }
            let value = self.inner.get(key).await;
            let delay = self.read_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            value
        }

        async fn set(&self, key: &str, value: String) -> io::Result<()> {
            self.check(key)?;
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> io::Result<()> {
            self.check(key)?;
            self.inner.remove(key).await
        }

        async fn clear(&self) -> io::Result<()> {
            self.inner.clear().await
        }

        async fn list_keys(&self) -> io::Result<Vec<String>> {
            self.inner.list_keys().await
        }
    }

    fn store_with_clock() -> (KeyValueStore, Arc<MemoryMedium>, Arc<ManualClock>) {
        let medium = Arc::new(MemoryMedium::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = KeyValueStore::new(medium.clone()).with_clock(clock.clone());
        (store, medium, clock)
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let store = KeyValueStore::in_memory();
        store.set("numbers", &vec![1, 2, 3]).await.unwrap();

        let loaded: Option<Vec<i32>> = store.get("numbers").await;
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_get_missing_returns_default() {
        let store = KeyValueStore::in_memory();
        assert_eq!(store.get::<String>("nothing").await, None);
        assert_eq!(store.get_or("nothing", 7).await, 7);
    }

    #[tokio::test]
    async fn test_cache_serves_until_ttl_then_refetches() {
        let (store, medium, clock) = store_with_clock();
        store
            .set_with_ttl("greeting", "cached", Some(Duration::minutes(10)))
            .await
            .unwrap();

        // Change the medium behind the store's back
        medium.set("greeting", "\"fresh\"".to_string()).await.unwrap();

        clock.advance(Duration::minutes(9));
        assert_eq!(store.get::<String>("greeting").await.as_deref(), Some("cached"));

        clock.advance(Duration::minutes(2));
        assert_eq!(store.get::<String>("greeting").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_expired_entry_removed_from_medium_yields_default() {
        let (store, medium, clock) = store_with_clock();
        store
            .set_with_ttl("temp", &1, Some(Duration::minutes(1)))
            .await
            .unwrap();
        medium.remove("temp").await.unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(store.get_or("temp", 0).await, 0);
    }

    #[tokio::test]
    async fn test_miss_repopulates_cache_without_expiry() {
        let (store, medium, clock) = store_with_clock();
        medium.set("settings", "{\"a\":1}".to_string()).await.unwrap();
        assert_eq!(store.cache_size(), 0);

        let value: Option<serde_json::Value> = store.get("settings").await;
        assert_eq!(value, Some(json!({"a": 1})));
        assert_eq!(store.cache_size(), 1);

        medium.set("settings", "{\"a\":2}".to_string()).await.unwrap();
        clock.advance(Duration::days(30));
        let value: Option<serde_json::Value> = store.get("settings").await;
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_corrupt_document_degrades_to_default() {
        let (store, medium, _) = store_with_clock();
        medium.set("appointments", "{not json".to_string()).await.unwrap();

        let loaded: Vec<String> = store.get_or("appointments", Vec::new()).await;
        assert!(loaded.is_empty());
        assert!(store.fetch::<Vec<String>>("appointments").await.is_err());
    }

    #[tokio::test]
    async fn test_read_failure_degrades_but_fetch_reports() {
        let medium = Arc::new(FlakyMedium::default());
        let store = KeyValueStore::new(medium.clone());
        medium
            .fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);

        assert_eq!(store.get_or("token", "none".to_string()).await, "none");
        let err = store.fetch::<String>("token").await.unwrap_err();
        assert!(err.is_persistence());
    }

    #[tokio::test]
    async fn test_write_failure_propagates_and_leaves_cache_alone() {
        let medium = Arc::new(FlakyMedium::default());
        let store = KeyValueStore::new(medium.clone());
        medium.fail_key("token");

        let err = store.set("token", "abc").await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.cache_size(), 0);
        assert_eq!(store.get::<String>("token").await, None);
    }

    #[tokio::test]
    async fn test_remove_and_clear_all() {
        let store = KeyValueStore::in_memory();
        store.set("a", &1).await.unwrap();
        store.set("b", &2).await.unwrap();
        assert_eq!(store.key_count().await, 2);

        store.remove("a").await.unwrap();
        assert_eq!(store.get::<i32>("a").await, None);
        assert_eq!(store.cache_size(), 1);

        store.clear_all().await.unwrap();
        assert_eq!(store.key_count().await, 0);
        assert_eq!(store.cache_size(), 0);
        assert_eq!(store.get::<i32>("b").await, None);
    }

    #[tokio::test]
    async fn test_last_access_reflects_reads_and_writes() {
        let (store, _, clock) = store_with_clock();
        store.set("a", &1).await.unwrap();
        let written = clock.now();

        clock.advance(Duration::minutes(3));
        store.get::<i32>("a").await;

        let access = store.last_access_by_key();
        assert_eq!(access.get("a"), Some(&(written + Duration::minutes(3))));
    }

    #[tokio::test]
    async fn test_concurrent_modify_loses_no_update() {
        let store = Arc::new(KeyValueStore::in_memory());

        let tasks = (0..40).map(|i| {
            let store = store.clone();
            async move {
                store
                    .modify("list", None, |list: &mut Vec<i32>| {
                        list.push(i);
                        Ok(Change::Write(()))
                    })
                    .await
            }
        });
        for result in join_all(tasks).await {
            result.unwrap();
        }

        let mut list: Vec<i32> = store.get_or("list", Vec::new()).await;
        list.sort();
        assert_eq!(list, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_modify_keep_skips_write() {
        let (store, medium, _) = store_with_clock();
        let seen = store
            .modify("list", None, |list: &mut Vec<i32>| Ok(Change::Keep(list.len())))
            .await
            .unwrap();

        assert_eq!(seen, 0);
        assert_eq!(medium.get("list").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_many_rolls_back_on_failure() {
        let medium = Arc::new(FlakyMedium::default());
        let store = KeyValueStore::new(medium.clone());
        store.set("a", &1).await.unwrap();
        store.set("c", &3).await.unwrap();
        medium.fail_key("c");

        let entries = vec![
            KeyValueStore::encode("a", &10).unwrap(),
            KeyValueStore::encode("b", &20).unwrap(),
            KeyValueStore::encode("c", &30).unwrap(),
        ];
        assert!(store.set_many(entries).await.is_err());

        assert_eq!(store.get::<i32>("a").await, Some(1));
        assert_eq!(store.get::<i32>("b").await, None);
        assert_eq!(store.get::<i32>("c").await, Some(3));
        assert_eq!(medium.inner.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_slow_read_does_not_cache_replaced_document() {
        let medium = Arc::new(FlakyMedium::default());
        let store = KeyValueStore::new(medium.clone());
        medium.inner.set("list", "[1]".to_string()).await.unwrap();
        medium.read_delay_ms.store(50, Ordering::SeqCst);

        // The read copies [1], then the write commits while it is stalled
        let replacement = vec![1, 2];
        let (_, written) = tokio::join!(
            store.get::<Vec<i32>>("list"),
            store.set("list", &replacement)
        );
        written.unwrap();
        medium.read_delay_ms.store(0, Ordering::SeqCst);

        store
            .modify("list", None, |list: &mut Vec<i32>| {
                list.push(3);
                Ok(Change::Write(()))
            })
            .await
            .unwrap();

        let raw = medium.inner.get("list").await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Vec<i32>>(&raw).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.get::<Vec<i32>>("list").await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_slow_read_does_not_cache_removed_document() {
        let medium = Arc::new(FlakyMedium::default());
        let store = KeyValueStore::new(medium.clone());
        medium.inner.set("token", "\"old\"".to_string()).await.unwrap();
        medium.read_delay_ms.store(50, Ordering::SeqCst);

        let (_, removed) = tokio::join!(store.get::<String>("token"), store.remove("token"));
        removed.unwrap();
        medium.read_delay_ms.store(0, Ordering::SeqCst);

        assert_eq!(store.get::<String>("token").await, None);
        assert_eq!(store.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_clear_all_waits_for_inflight_modify() {
        let medium = Arc::new(FlakyMedium::default());
        let store = KeyValueStore::new(medium.clone());
        medium.inner.set("list", "[1]".to_string()).await.unwrap();
        medium.read_delay_ms.store(50, Ordering::SeqCst);

        // modify holds its lock while the read stalls; the wipe must come after it
        let (modified, cleared) = tokio::join!(
            store.modify("list", None, |list: &mut Vec<i32>| {
                list.push(2);
                Ok(Change::Write(()))
            }),
            store.clear_all()
        );
        modified.unwrap();
        cleared.unwrap();
        medium.read_delay_ms.store(0, Ordering::SeqCst);

        assert_eq!(store.key_count().await, 0);
        assert_eq!(store.cache_size(), 0);
        assert_eq!(store.get::<Vec<i32>>("list").await, None);
    }

    #[tokio::test]
    async fn test_commit_requires_held_lock() {
        let store = KeyValueStore::in_memory();
        let locks = store.lock_keys(&["a"]).await;

        let entry = KeyValueStore::encode("b", &1).unwrap();
        let err = store.commit(&locks, vec![entry], None).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
