//! Store connectivity and price age report.
//!
//! Unlike the resolution path, which treats an unreadable store as a cache
//! miss, the health check surfaces store failures. The service is unhealthy
//! when the store cannot be read or when the newest stored price is older
//! than the staleness limit. An empty store is healthy.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::store::KeyValueStore;
use crate::{PriceRecord, Symbol, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    pub store: CheckStatus,
    /// Newest `observed_at` across the checked symbols.
    pub last_price_update: Option<UtcDateTime>,
    /// Whole seconds since `last_price_update`.
    pub cache_age: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: HealthChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Reads the stored prices for `symbols` in one batch and reports store
/// reachability and the age of the newest record.
pub async fn check_health(
    store: &dyn KeyValueStore,
    symbols: &[Symbol],
    now: UtcDateTime,
    stale_after: Duration,
) -> HealthReport {
    let keys: Vec<String> = symbols.iter().map(PriceRecord::store_key).collect();
    let entries = match store.batch_get(&keys).await {
        Ok(entries) => entries,
        Err(error) => {
            warn!(%error, "health check could not read the store");
            return HealthReport {
                status: HealthStatus::Unhealthy,
                checks: HealthChecks {
                    store: CheckStatus::Error,
                    last_price_update: None,
                    cache_age: None,
                },
                error: Some(format!("store check failed: {error}")),
            };
        }
    };

    let newest = entries
        .values()
        .filter_map(|entry| match serde_json::from_str::<PriceRecord>(&entry.body) {
            Ok(record) => Some(record.observed_at),
            Err(error) => {
                debug!(key = %entry.key, %error, "skipping undecodable price record");
                None
            }
        })
        .max();

    let Some(newest) = newest else {
        return HealthReport {
            status: HealthStatus::Healthy,
            checks: HealthChecks {
                store: CheckStatus::Ok,
                last_price_update: None,
                cache_age: None,
            },
            error: None,
        };
    };

    let cache_age = now.duration_since(newest).whole_seconds();
    let limit = i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX);
    let (status, error) = if cache_age > limit {
        warn!(cache_age, limit, "stored prices are stale");
        (
            HealthStatus::Unhealthy,
            Some(format!("price data is stale: newest record is {cache_age}s old")),
        )
    } else {
        (HealthStatus::Healthy, None)
    };

    HealthReport {
        status,
        checks: HealthChecks {
            store: CheckStatus::Ok,
            last_price_update: Some(newest),
            cache_age: Some(cache_age),
        },
        error,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, StoreEntry};

    const FIFTEEN_MINUTES: Duration = Duration::from_secs(900);

    fn at(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("valid")
    }

    fn symbols() -> Vec<Symbol> {
        ["BTC", "ETH", "ADA"]
            .into_iter()
            .map(|value| Symbol::parse(value).expect("valid"))
            .collect()
    }

    async fn store_with(observed: &[(&str, &str)]) -> MemoryStore {
        let store = MemoryStore::new(Arc::new(ManualClock::new(at("2024-06-01T12:00:00Z"))));
        for (symbol, observed_at) in observed {
            let record = PriceRecord::new(
                Symbol::parse(symbol).expect("valid"),
                *symbol,
                1.0,
                0.0,
                1,
                at(observed_at),
            )
            .expect("valid record");
            store
                .put(StoreEntry::new(
                    PriceRecord::store_key(&record.symbol),
                    serde_json::to_string(&record).expect("serializes"),
                ))
                .await
                .expect("put");
        }
        store
    }

    #[tokio::test]
    async fn newest_record_drives_cache_age() {
        let store = store_with(&[
            ("BTC", "2024-06-01T11:50:00Z"),
            ("ETH", "2024-06-01T11:57:00Z"),
            ("ADA", "2024-06-01T11:53:00Z"),
        ])
        .await;

        let report = check_health(&store, &symbols(), at("2024-06-01T12:00:00Z"), FIFTEEN_MINUTES).await;

        assert!(report.is_healthy());
        assert_eq!(report.checks.store, CheckStatus::Ok);
        assert_eq!(report.checks.last_price_update, Some(at("2024-06-01T11:57:00Z")));
        assert_eq!(report.checks.cache_age, Some(180));
        assert_eq!(report.error, None);

        let json = serde_json::to_value(&report).expect("serializes");
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"]["store"], "ok");
        assert_eq!(json["checks"]["lastPriceUpdate"], "2024-06-01T11:57:00Z");
        assert_eq!(json["checks"]["cacheAge"], 180);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn old_prices_are_reported_as_stale() {
        let store = store_with(&[("BTC", "2024-06-01T11:40:00Z")]).await;

        let report = check_health(&store, &symbols(), at("2024-06-01T12:00:00Z"), FIFTEEN_MINUTES).await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.checks.store, CheckStatus::Ok);
        assert_eq!(report.checks.cache_age, Some(1200));
        assert!(report.error.as_deref().is_some_and(|e| e.contains("stale")));
    }

    #[tokio::test]
    async fn age_at_the_limit_is_still_healthy() {
        let store = store_with(&[("BTC", "2024-06-01T11:45:00Z")]).await;

        let report = check_health(&store, &symbols(), at("2024-06-01T12:00:00Z"), FIFTEEN_MINUTES).await;

        assert!(report.is_healthy());
        assert_eq!(report.checks.cache_age, Some(900));
    }

    #[tokio::test]
    async fn empty_store_is_healthy_without_age() {
        let store = store_with(&[]).await;

        let report = check_health(&store, &symbols(), at("2024-06-01T12:00:00Z"), FIFTEEN_MINUTES).await;

        assert!(report.is_healthy());
        assert_eq!(report.checks.store, CheckStatus::Ok);
        assert_eq!(report.checks.last_price_update, None);
        assert_eq!(report.checks.cache_age, None);
    }
}
