use coinwatch_core::{PriceRefresher, RefreshReport};

use crate::cli::SymbolsArgs;
use crate::error::CliError;

use super::{parse_symbols, Services};

pub async fn run(args: &SymbolsArgs, services: &Services) -> Result<RefreshReport, CliError> {
    let symbols = parse_symbols(&args.symbols)?;

    let refresher = PriceRefresher::new(
        services.store.clone(),
        services.fetcher(),
        services.clock.clone(),
    )
    .with_write_ttl(services.config.cache_write_ttl)
    .with_default_symbols(services.config.refresh_symbols.clone());

    Ok(refresher.refresh(&symbols).await?)
}
