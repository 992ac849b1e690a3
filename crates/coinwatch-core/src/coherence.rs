//! Freshness classification and refresh-then-fallback price resolution.
//!
//! A cached record is *fresh* while `now - observed_at < threshold`
//! (strictly), *stale* once it reaches the threshold, and *missing* when the
//! store has no live record or the read failed. Resolution serves fresh
//! records directly, sends every stale or missing symbol to the fetcher in a
//! single batch, writes successful results back to the store on a
//! best-effort basis, and falls back to stale records when the fetch fails.
//! An error only reaches the caller when nothing at all could be served.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::health::{check_health, HealthReport};
use crate::store::{KeyValueStore, StoreEntry, StoreError};
use crate::upstream::{PriceFetcher, UpstreamError};
use crate::{AssetCatalog, PriceRecord, Symbol, UtcDateTime};

/// Freshness class of one symbol's cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Fresh,
    Stale,
    Missing,
}

/// Where a resolved record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Served from the store within the freshness threshold.
    Fresh,
    /// Fetched from upstream during this resolution.
    Refreshed,
    /// Served from the store past its threshold because upstream failed or
    /// omitted the symbol.
    StaleFallback,
}

/// Cache status report for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub classification: Classification,
    pub observed_at: Option<UtcDateTime>,
    pub age_seconds: Option<i64>,
}

impl CacheStatus {
    pub fn needs_refresh(&self) -> bool {
        self.classification != Classification::Fresh
    }
}

/// Full outcome of a resolution, including per-symbol provenance.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub prices: BTreeMap<Symbol, PriceRecord>,
    pub sources: BTreeMap<Symbol, PriceSource>,
    /// Upstream failure that was absorbed by serving cached data.
    pub upstream_error: Option<UpstreamError>,
}

impl Resolution {
    fn serve(&mut self, record: PriceRecord, source: PriceSource) {
        self.sources.insert(record.symbol.clone(), source);
        self.prices.insert(record.symbol.clone(), record);
    }

    pub fn is_degraded(&self) -> bool {
        self.sources
            .values()
            .any(|source| *source == PriceSource::StaleFallback)
    }
}

/// Returned only when zero symbols could be served from any source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ResolveError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Upstream(error) => error.code(),
        }
    }

    pub const fn status(&self) -> u16 {
        match self {
            Self::Upstream(error) => error.status(),
        }
    }
}

/// `true` iff the record observed at `observed_at` is strictly younger than
/// `threshold` at `now`.
pub fn is_fresh(observed_at: UtcDateTime, now: UtcDateTime, threshold: Duration) -> bool {
    let age = now.duration_since(observed_at).whole_nanoseconds();
    let limit = i128::try_from(threshold.as_nanos()).unwrap_or(i128::MAX);
    age < limit
}

/// Decides per symbol between cached and upstream data.
#[derive(Clone)]
pub struct CacheCoherenceManager {
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn PriceFetcher>,
    clock: Arc<dyn Clock>,
    write_ttl: Duration,
}

impl CacheCoherenceManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn PriceFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            write_ttl: Duration::from_secs(3600),
        }
    }

    /// Expiry horizon attached to records written back after a refresh.
    pub fn with_write_ttl(mut self, write_ttl: Duration) -> Self {
        self.write_ttl = write_ttl;
        self
    }

    /// Per-symbol classification. Read-only; store failures read as missing.
    pub async fn classify(
        &self,
        symbols: &[Symbol],
        threshold: Duration,
    ) -> BTreeMap<Symbol, Classification> {
        self.status(symbols, threshold)
            .await
            .into_iter()
            .map(|(symbol, status)| (symbol, status.classification))
            .collect()
    }

    /// Per-symbol classification with the observed timestamp and age.
    pub async fn status(
        &self,
        symbols: &[Symbol],
        threshold: Duration,
    ) -> BTreeMap<Symbol, CacheStatus> {
        let unique = dedup(symbols);
        if unique.is_empty() {
            return BTreeMap::new();
        }

        let now = self.clock.now();
        let cached = self.read_cached(&unique).await;

        unique
            .into_iter()
            .map(|symbol| {
                let status = match cached.get(&symbol) {
                    Some(record) => CacheStatus {
                        classification: if is_fresh(record.observed_at, now, threshold) {
                            Classification::Fresh
                        } else {
                            Classification::Stale
                        },
                        observed_at: Some(record.observed_at),
                        age_seconds: Some(now.duration_since(record.observed_at).whole_seconds()),
                    },
                    None => CacheStatus {
                        classification: Classification::Missing,
                        observed_at: None,
                        age_seconds: None,
                    },
                };
                (symbol, status)
            })
            .collect()
    }

    pub async fn resolve(
        &self,
        symbols: &[Symbol],
        threshold: Duration,
    ) -> Result<BTreeMap<Symbol, PriceRecord>, ResolveError> {
        self.resolve_with_provenance(symbols, threshold)
            .await
            .map(|resolution| resolution.prices)
    }

    pub async fn resolve_with_provenance(
        &self,
        symbols: &[Symbol],
        threshold: Duration,
    ) -> Result<Resolution, ResolveError> {
        let unique = dedup(symbols);
        let mut resolution = Resolution::default();
        if unique.is_empty() {
            return Ok(resolution);
        }

        let now = self.clock.now();
        let mut cached = self.read_cached(&unique).await;
        let mut refresh = Vec::new();

        for symbol in unique {
            match cached.remove(&symbol) {
                Some(record) if is_fresh(record.observed_at, now, threshold) => {
                    resolution.serve(record, PriceSource::Fresh);
                }
                Some(record) => {
                    cached.insert(symbol.clone(), record);
                    refresh.push(symbol);
                }
                None => refresh.push(symbol),
            }
        }

        debug!(
            fresh = resolution.prices.len(),
            refresh = refresh.len(),
            "classified requested symbols"
        );

        if refresh.is_empty() {
            return Ok(resolution);
        }

        match self.fetcher.fetch(&refresh).await {
            Ok(records) => {
                let wanted: BTreeSet<&Symbol> = refresh.iter().collect();
                let fetched: Vec<PriceRecord> = records
                    .into_iter()
                    .filter(|record| wanted.contains(&record.symbol))
                    .collect();

                let expires_at = self.clock.now().saturating_add(self.write_ttl);
                if let Err(error) = write_through(self.store.as_ref(), &fetched, expires_at).await {
                    warn!(%error, records = fetched.len(), "failed to write refreshed prices");
                }

                for record in fetched {
                    resolution.serve(record, PriceSource::Refreshed);
                }

                for symbol in &refresh {
                    if resolution.prices.contains_key(symbol) {
                        continue;
                    }
                    if let Some(stale) = cached.remove(symbol) {
                        debug!(%symbol, "upstream omitted symbol; serving stale copy");
                        resolution.serve(stale, PriceSource::StaleFallback);
                    }
                }
            }
            Err(error) => {
                warn!(%error, "upstream refresh failed; falling back to stored prices");

                for record in self.read_cached(&refresh).await.into_values() {
                    resolution.serve(record, PriceSource::StaleFallback);
                }

                if resolution.prices.is_empty() {
                    return Err(ResolveError::Upstream(error));
                }
                resolution.upstream_error = Some(error);
            }
        }

        Ok(resolution)
    }

    /// Store reachability and age of the newest stored catalog price.
    /// Store failures are reported, not absorbed.
    pub async fn health(&self, stale_after: Duration) -> HealthReport {
        check_health(
            self.store.as_ref(),
            &AssetCatalog.symbols(),
            self.clock.now(),
            stale_after,
        )
        .await
    }

    /// Batched read; failures and undecodable records degrade to missing.
    async fn read_cached(&self, symbols: &[Symbol]) -> BTreeMap<Symbol, PriceRecord> {
        let keys: Vec<String> = symbols.iter().map(PriceRecord::store_key).collect();
        let entries = match self.store.batch_get(&keys).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, symbols = symbols.len(), "price read failed; treating as cache miss");
                return BTreeMap::new();
            }
        };

        let mut records = BTreeMap::new();
        for (symbol, key) in symbols.iter().zip(&keys) {
            let Some(entry) = entries.get(key) else {
                continue;
            };
            match serde_json::from_str::<PriceRecord>(&entry.body) {
                Ok(record) => {
                    records.insert(symbol.clone(), record);
                }
                Err(error) => warn!(%symbol, %error, "undecodable price record; treating as missing"),
            }
        }
        records
    }
}

/// Persists records in one batch with a shared expiry.
pub(crate) async fn write_through(
    store: &dyn KeyValueStore,
    records: &[PriceRecord],
    expires_at: UtcDateTime,
) -> Result<(), StoreError> {
    if records.is_empty() {
        return Ok(());
    }

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let body = serde_json::to_string(record)
            .map_err(|e| StoreError::WriteRejected(format!("failed to encode price record: {e}")))?;
        entries.push(StoreEntry::new(PriceRecord::store_key(&record.symbol), body).expiring_at(expires_at));
    }

    store.batch_put(entries).await
}

fn dedup(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut seen = BTreeSet::new();
    symbols
        .iter()
        .filter(|symbol| seen.insert((*symbol).clone()))
        .cloned()
        .collect()
}
