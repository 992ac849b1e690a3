//! Durable key-value store contract and an in-memory implementation.
//!
//! The core consumes the store through [`KeyValueStore`] only. Records are
//! opaque string bodies with an optional absolute expiry; expired records are
//! invisible to reads. Store failures are surfaced as [`StoreError`] and the
//! callers in this crate decide how to degrade: they never retry a store call.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::{RateWindowCounter, UtcDateTime};

/// A single stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub body: String,
    /// Expiry hint honored by the store.
    pub expires_at: Option<UtcDateTime>,
}

impl StoreEntry {
    pub fn new(key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: UtcDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_live(&self, now: UtcDateTime) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Store-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected write: {0}")]
    WriteRejected(String),

    #[error("store does not support conditional increments")]
    Unsupported,
}

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The counter was below the ceiling and now holds this value.
    Incremented(u32),
    /// The counter already reached the ceiling; nothing was written.
    AtCeiling(u32),
}

/// Narrow key-value contract consumed by the core.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>>;

    /// Keys without a live record are simply absent from the returned map.
    fn batch_get<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>>;

    fn put<'a>(
        &'a self,
        entry: StoreEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn batch_put<'a>(
        &'a self,
        entries: Vec<StoreEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Atomically increments the counter stored at `key` unless it already
    /// holds `ceiling` or more. Stores without a conditional write primitive
    /// keep the default, which reports [`StoreError::Unsupported`].
    fn increment_below<'a>(
        &'a self,
        key: &'a str,
        ceiling: u32,
        expires_at: Option<UtcDateTime>,
    ) -> Pin<Box<dyn Future<Output = Result<IncrementOutcome, StoreError>> + Send + 'a>> {
        let _ = (key, ceiling, expires_at);
        Box::pin(async { Err(StoreError::Unsupported) })
    }

    /// Physically removes expired records and returns how many were dropped.
    fn purge_expired<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>> {
        Box::pin(async { Ok(0) })
    }
}

/// Thread-safe in-memory store, used for tests and single-process runs.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<tokio::sync::RwLock<HashMap<String, StoreEntry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    /// Create an empty store whose expiry checks use `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of records held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.clock.now();
            let map = self.inner.read().await;
            Ok(map.get(key).filter(|entry| entry.is_live(now)).cloned())
        })
    }

    fn batch_get<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let now = self.clock.now();
            let map = self.inner.read().await;
            Ok(keys
                .iter()
                .filter_map(|key| {
                    map.get(key)
                        .filter(|entry| entry.is_live(now))
                        .map(|entry| (key.clone(), entry.clone()))
                })
                .collect())
        })
    }

    fn put<'a>(
        &'a self,
        entry: StoreEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            map.insert(entry.key.clone(), entry);
            Ok(())
        })
    }

    fn batch_put<'a>(
        &'a self,
        entries: Vec<StoreEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            for entry in entries {
                map.insert(entry.key.clone(), entry);
            }
            Ok(())
        })
    }

    fn increment_below<'a>(
        &'a self,
        key: &'a str,
        ceiling: u32,
        expires_at: Option<UtcDateTime>,
    ) -> Pin<Box<dyn Future<Output = Result<IncrementOutcome, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut map = self.inner.write().await;
            let current = map
                .get(key)
                .filter(|entry| entry.is_live(now))
                .and_then(|entry| RateWindowCounter::parse_count(&entry.body))
                .unwrap_or(0);

            if current >= ceiling {
                return Ok(IncrementOutcome::AtCeiling(current));
            }

            let next = current + 1;
            map.insert(
                key.to_owned(),
                StoreEntry {
                    key: key.to_owned(),
                    body: next.to_string(),
                    expires_at,
                },
            );
            Ok(IncrementOutcome::Incremented(next))
        })
    }

    fn purge_expired<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut map = self.inner.write().await;
            let before = map.len();
            map.retain(|_, entry| entry.is_live(now));
            Ok(before - map.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid"),
        ));
        (MemoryStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn put_and_get_round_trip_with_overwrite() {
        let (store, _) = store_with_clock();

        assert!(store.get("k1").await.expect("get").is_none());

        store.put(StoreEntry::new("k1", "v1")).await.expect("put");
        assert_eq!(
            store.get("k1").await.expect("get").map(|e| e.body),
            Some(String::from("v1"))
        );

        store.put(StoreEntry::new("k1", "v2")).await.expect("put");
        assert_eq!(
            store.get("k1").await.expect("get").map(|e| e.body),
            Some(String::from("v2"))
        );
    }

    #[tokio::test]
    async fn expired_records_are_invisible_and_purgeable() {
        let (store, clock) = store_with_clock();
        let expires_at = clock.now().saturating_add(Duration::from_secs(60));
        store
            .put(StoreEntry::new("k1", "v1").expiring_at(expires_at))
            .await
            .expect("put");

        clock.advance(Duration::from_secs(59));
        assert!(store.get("k1").await.expect("get").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k1").await.expect("get").is_none());
        assert_eq!(store.len().await, 1);

        assert_eq!(store.purge_expired().await.expect("purge"), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn batch_get_omits_missing_keys() {
        let (store, _) = store_with_clock();
        store
            .batch_put(vec![StoreEntry::new("a", "1"), StoreEntry::new("b", "2")])
            .await
            .expect("batch put");

        let keys = vec![String::from("a"), String::from("b"), String::from("c")];
        let found = store.batch_get(&keys).await.expect("batch get");
        assert_eq!(found.len(), 2);
        assert!(!found.contains_key("c"));
    }

    #[tokio::test]
    async fn increment_below_stops_at_ceiling() {
        let (store, _) = store_with_clock();

        assert_eq!(
            store.increment_below("c", 2, None).await.expect("inc"),
            IncrementOutcome::Incremented(1)
        );
        assert_eq!(
            store.increment_below("c", 2, None).await.expect("inc"),
            IncrementOutcome::Incremented(2)
        );
        assert_eq!(
            store.increment_below("c", 2, None).await.expect("inc"),
            IncrementOutcome::AtCeiling(2)
        );
        assert_eq!(
            store.get("c").await.expect("get").map(|e| e.body),
            Some(String::from("2"))
        );
    }
}
