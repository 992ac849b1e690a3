use std::env;
use std::sync::Arc;

use coinwatch_core::{
    AdmissionController, CacheCoherenceManager, CredentialDirectory, FixedWindowRateLimiter,
};
use tracing::{info, warn};

use crate::cli::QuoteArgs;
use crate::error::CliError;
use crate::output::{QuoteEntry, QuoteResponse};

use super::{parse_symbols, Services};

pub async fn run(args: &QuoteArgs, services: &Services) -> Result<QuoteResponse, CliError> {
    // Malformed or unsupported symbols are rejected before any budget is
    // spent on the request.
    let symbols = parse_symbols(&args.symbols)?;

    let token = args
        .api_key
        .clone()
        .or_else(|| env::var("COINWATCH_API_KEY").ok());

    let admission = AdmissionController::new(
        Arc::new(CredentialDirectory::new(
            services.store.clone(),
            services.clock.clone(),
        )),
        Arc::new(
            FixedWindowRateLimiter::new(services.store.clone(), services.clock.clone())
                .with_limit(services.config.rate_limit_per_window),
        ),
    );
    admission.admit(token.as_deref()).await?;

    let manager = CacheCoherenceManager::new(
        services.store.clone(),
        services.fetcher(),
        services.clock.clone(),
    )
    .with_write_ttl(services.config.cache_write_ttl);

    let resolution = manager
        .resolve_with_provenance(&symbols, services.config.freshness_threshold)
        .await?;
    if let Some(error) = &resolution.upstream_error {
        warn!(%error, served = resolution.prices.len(), "serving cached prices after upstream failure");
    }

    let mut data = Vec::with_capacity(resolution.prices.len());
    for symbol in &symbols {
        if data.iter().any(|entry: &QuoteEntry| entry.symbol == symbol.as_str()) {
            continue;
        }
        let (Some(record), Some(source)) = (
            resolution.prices.get(symbol),
            resolution.sources.get(symbol),
        ) else {
            continue;
        };
        data.push(QuoteEntry::from_record(record, *source));
    }

    info!(requested = symbols.len(), served = data.len(), "quote served");
    Ok(QuoteResponse {
        data,
        timestamp: services.clock.now().format_rfc3339(),
    })
}
