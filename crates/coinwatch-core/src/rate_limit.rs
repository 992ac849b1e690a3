//! Per-credential fixed-window request counting.
//!
//! Counters live in the key-value store under
//! `APIKEY#<id>#RATELIMIT#<YYYYMMDDHHMM>` and expire one cleanup horizon
//! after their window starts. When the store offers a conditional increment
//! it is used; otherwise the limiter falls back to read-then-write, which can
//! undercount under concurrent requests for one credential.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::credentials::mask_token;
use crate::store::{IncrementOutcome, KeyValueStore, StoreEntry, StoreError};
use crate::{RateWindowCounter, UtcDateTime};

pub const DEFAULT_LIMIT_PER_WINDOW: u32 = 100;
pub const WINDOW: Duration = Duration::from_secs(60);
pub const CLEANUP_HORIZON: Duration = Duration::from_secs(3600);
pub const RETRY_AFTER: Duration = Duration::from_secs(60);

/// Rejection carrying the retry-after hint.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded; retry after {}s", .retry_after.as_secs())]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

/// Admission-time rate check. Implementations count the call when they
/// admit it and never count a rejected call.
pub trait RateLimiter: Send + Sync {
    fn check_and_increment<'a>(
        &'a self,
        credential_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RateLimitExceeded>> + Send + 'a>>;
}

/// Store-backed fixed-window limiter.
#[derive(Clone)]
pub struct FixedWindowRateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    limit: u32,
}

impl FixedWindowRateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            limit: DEFAULT_LIMIT_PER_WINDOW,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Empty counter for the window containing `now`.
    fn window_for(&self, credential_id: &str, now: UtcDateTime) -> RateWindowCounter {
        let start = now.window_start(WINDOW).unwrap_or(now);
        RateWindowCounter {
            credential_id: credential_id.to_owned(),
            window_key: start.minute_key(),
            count: 0,
            expires_at: start.saturating_add(CLEANUP_HORIZON),
        }
    }

    fn rejection(&self, credential_id: &str, count: u32) -> RateLimitExceeded {
        debug!(credential = %mask_token(credential_id), count, limit = self.limit, "rate limit reached");
        RateLimitExceeded {
            retry_after: RETRY_AFTER,
        }
    }

    /// Returns the count observed before this call. A failed read counts
    /// as an empty window so the write is still attempted.
    async fn read_then_write(&self, mut counter: RateWindowCounter, key: &str) -> Result<u32, StoreError> {
        let prior = match self.store.get(key).await {
            Ok(entry) => entry
                .and_then(|entry| RateWindowCounter::parse_count(&entry.body))
                .unwrap_or(0),
            Err(error) => {
                warn!(credential = %mask_token(&counter.credential_id), %error, "rate counter read failed; assuming empty window");
                0
            }
        };

        if prior >= self.limit {
            return Ok(prior);
        }

        counter.count = prior + 1;
        self.store
            .put(StoreEntry::new(key, counter.encode_count()).expiring_at(counter.expires_at))
            .await?;
        Ok(prior)
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_and_increment<'a>(
        &'a self,
        credential_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RateLimitExceeded>> + Send + 'a>> {
        Box::pin(async move {
            let counter = self.window_for(credential_id, self.clock.now());
            let key = RateWindowCounter::store_key(credential_id, &counter.window_key);

            match self
                .store
                .increment_below(&key, self.limit, Some(counter.expires_at))
                .await
            {
                Ok(IncrementOutcome::Incremented(_)) => return Ok(()),
                Ok(IncrementOutcome::AtCeiling(count)) => {
                    return Err(self.rejection(credential_id, count))
                }
                Err(StoreError::Unsupported) => {}
                Err(error) => {
                    warn!(credential = %mask_token(credential_id), %error, "rate counter update failed; admitting request");
                    return Ok(());
                }
            }

            match self.read_then_write(counter, &key).await {
                Ok(prior) if prior >= self.limit => Err(self.rejection(credential_id, prior)),
                Ok(_) => Ok(()),
                Err(error) => {
                    warn!(credential = %mask_token(credential_id), %error, "rate counter update failed; admitting request");
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    /// Store without a conditional increment, forcing read-then-write.
    struct PlainStore(MemoryStore);

    impl KeyValueStore for PlainStore {
        fn get<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>>
        {
            self.0.get(key)
        }

        fn batch_get<'a>(
            &'a self,
            keys: &'a [String],
        ) -> Pin<
            Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>,
        > {
            self.0.batch_get(keys)
        }

        fn put<'a>(
            &'a self,
            entry: StoreEntry,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
            self.0.put(entry)
        }

        fn batch_put<'a>(
            &'a self,
            entries: Vec<StoreEntry>,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
            self.0.batch_put(entries)
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            UtcDateTime::parse("2024-03-05T10:15:42Z").expect("valid"),
        ))
    }

    #[test]
    fn window_key_and_expiry_follow_minute_buckets() {
        let clock = clock();
        let limiter = FixedWindowRateLimiter::new(Arc::new(MemoryStore::new(clock.clone())), clock.clone());

        let counter = limiter.window_for("abc", clock.now());
        assert_eq!(counter.window_key, "202403051015");
        assert_eq!(
            RateWindowCounter::store_key(&counter.credential_id, &counter.window_key),
            "APIKEY#abc#RATELIMIT#202403051015"
        );
        assert_eq!(counter.expires_at.format_rfc3339(), "2024-03-05T11:15:00Z");
    }

    #[tokio::test]
    async fn read_then_write_fallback_honors_ceiling() {
        let clock = clock();
        let inner = MemoryStore::new(clock.clone());
        let limiter =
            FixedWindowRateLimiter::new(Arc::new(PlainStore(inner.clone())), clock.clone()).with_limit(2);

        assert!(limiter.check_and_increment("abc").await.is_ok());
        assert!(limiter.check_and_increment("abc").await.is_ok());
        let rejected = limiter.check_and_increment("abc").await.expect_err("third call rejected");
        assert_eq!(rejected.retry_after, RETRY_AFTER);

        let stored = inner
            .get("APIKEY#abc#RATELIMIT#202403051015")
            .await
            .expect("get")
            .expect("counter exists");
        assert_eq!(stored.body, "2");
    }

    #[tokio::test]
    async fn next_window_starts_a_new_counter() {
        let clock = clock();
        let limiter = FixedWindowRateLimiter::new(Arc::new(MemoryStore::new(clock.clone())), clock.clone())
            .with_limit(1);

        assert!(limiter.check_and_increment("abc").await.is_ok());
        assert!(limiter.check_and_increment("abc").await.is_err());

        clock.advance(Duration::from_secs(18));
        assert!(limiter.check_and_increment("abc").await.is_ok());
    }

    #[tokio::test]
    async fn credentials_are_counted_independently() {
        let clock = clock();
        let limiter = FixedWindowRateLimiter::new(Arc::new(MemoryStore::new(clock.clone())), clock.clone())
            .with_limit(1);

        assert!(limiter.check_and_increment("first").await.is_ok());
        assert!(limiter.check_and_increment("second").await.is_ok());
        assert!(limiter.check_and_increment("first").await.is_err());
    }
}
