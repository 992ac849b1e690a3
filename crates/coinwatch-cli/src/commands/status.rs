use coinwatch_core::{AssetCatalog, CacheCoherenceManager, CacheStatus};
use serde::Serialize;

use crate::cli::SymbolsArgs;
use crate::error::CliError;

use super::{parse_symbols, Services};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub symbol: String,
    #[serde(flatten)]
    pub status: CacheStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub threshold_seconds: u64,
    pub data: Vec<StatusEntry>,
}

pub async fn run(args: &SymbolsArgs, services: &Services) -> Result<StatusResponse, CliError> {
    let symbols = if args.symbols.is_empty() {
        AssetCatalog.symbols()
    } else {
        parse_symbols(&args.symbols)?
    };

    // Status never refreshes, so the fetcher is never reached.
    let manager = CacheCoherenceManager::new(
        services.store.clone(),
        services.fetcher(),
        services.clock.clone(),
    );
    let threshold = services.config.freshness_threshold;

    let data = manager
        .status(&symbols, threshold)
        .await
        .into_iter()
        .map(|(symbol, status)| StatusEntry {
            symbol: symbol.to_string(),
            status,
        })
        .collect();

    Ok(StatusResponse {
        threshold_seconds: threshold.as_secs(),
        data,
    })
}
