//! Periodic refresh job: pull the catalog from upstream and persist it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::coherence::write_through;
use crate::store::{KeyValueStore, StoreError};
use crate::upstream::{PriceFetcher, UpstreamError};
use crate::{AssetCatalog, Symbol};

/// Summary of one refresh run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub requested: usize,
    pub refreshed: Vec<Symbol>,
    /// Requested symbols the upstream response did not cover.
    pub missing: Vec<Symbol>,
    pub persisted: usize,
    pub purged: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("failed to persist refreshed prices: {0}")]
    Store(#[from] StoreError),
}

impl RefreshError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Upstream(error) => error.code(),
            Self::Store(_) => "DATABASE_ERROR",
        }
    }

    pub const fn status(&self) -> u16 {
        match self {
            Self::Upstream(error) => error.status(),
            Self::Store(_) => 500,
        }
    }
}

pub struct PriceRefresher {
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn PriceFetcher>,
    clock: Arc<dyn Clock>,
    write_ttl: Duration,
    default_symbols: Vec<Symbol>,
    catalog: AssetCatalog,
}

impl PriceRefresher {
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
            default_symbols: Vec::new(),
            catalog: AssetCatalog,
        }
    }

    pub fn with_write_ttl(mut self, write_ttl: Duration) -> Self {
        self.write_ttl = write_ttl;
        self
    }

    /// Symbols refreshed when a run names none. Empty keeps the catalog.
    pub fn with_default_symbols(mut self, symbols: Vec<Symbol>) -> Self {
        self.default_symbols = symbols;
        self
    }

    /// Refreshes `symbols`, falling back to the configured defaults and then
    /// the whole catalog when `symbols` is empty.
    pub async fn refresh(&self, symbols: &[Symbol]) -> Result<RefreshReport, RefreshError> {
        let requested: Vec<Symbol> = match (symbols.is_empty(), self.default_symbols.is_empty()) {
            (false, _) => sorted_unique(symbols),
            (true, false) => sorted_unique(&self.default_symbols),
            (true, true) => self.catalog.symbols(),
        };

        info!(symbols = requested.len(), "starting price refresh");
        let records = self.fetcher.fetch(&requested).await?;

        let expires_at = self.clock.now().saturating_add(self.write_ttl);
        write_through(self.store.as_ref(), &records, expires_at).await?;

        let refreshed: BTreeSet<Symbol> = records.iter().map(|r| r.symbol.clone()).collect();
        let missing: Vec<Symbol> = requested
            .iter()
            .filter(|symbol| !refreshed.contains(*symbol))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(missing = missing.len(), "upstream omitted requested symbols");
        }

        let purged = match self.store.purge_expired().await {
            Ok(purged) => purged,
            Err(error) => {
                warn!(%error, "failed to purge expired records");
                0
            }
        };

        let report = RefreshReport {
            requested: requested.len(),
            persisted: records.len(),
            refreshed: refreshed.into_iter().collect(),
            missing,
            purged,
        };
        info!(
            refreshed = report.refreshed.len(),
            missing = report.missing.len(),
            purged = report.purged,
            "price refresh complete"
        );
        Ok(report)
    }
}

fn sorted_unique(symbols: &[Symbol]) -> Vec<Symbol> {
    symbols
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
