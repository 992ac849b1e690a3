mod health;
mod keys;
mod quote;
mod refresh;
mod status;

use std::process::ExitCode;
use std::sync::Arc;

use coinwatch_core::{
    AssetCatalog, Clock, CoinGeckoFetcher, KeyValueStore, PriceFetcher, ReqwestHttpClient,
    ServiceConfig, Symbol, ValidationError,
};
use coinwatch_store::{DuckDbStore, StoreConfig};
use tracing::debug;

use crate::cli::{Cli, Command, KeysCommand};
use crate::error::{CliError, EXIT_UNHEALTHY};
use crate::output;

/// Shared collaborators for one command invocation.
pub struct Services {
    pub config: ServiceConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    pub fn open(cli: &Cli, config: ServiceConfig, clock: Arc<dyn Clock>) -> Result<Self, CliError> {
        config.validate()?;

        let store_config = match &cli.db_path {
            Some(path) => StoreConfig::at_path(path),
            None => StoreConfig::default(),
        };
        let store = DuckDbStore::open(store_config)?.with_clock(clock.clone());
        debug!(path = %store.db_path().display(), "opened store");

        Ok(Self {
            config,
            store: Arc::new(store),
            clock,
        })
    }

    pub fn fetcher(&self) -> Arc<dyn PriceFetcher> {
        Arc::new(
            CoinGeckoFetcher::new(Arc::new(ReqwestHttpClient::new()), self.clock.clone())
                .with_base_url(self.config.upstream_url.as_str())
                .with_api_key(self.config.upstream_api_key.clone())
                .with_retry_policy(self.config.retry_policy()),
        )
    }
}

pub async fn run(cli: &Cli, clock: Arc<dyn Clock>) -> Result<ExitCode, CliError> {
    let services = Services::open(cli, ServiceConfig::from_env(), clock)?;

    match &cli.command {
        Command::Quote(args) => {
            let response = quote::run(args, &services).await?;
            output::render(&response, cli.pretty)?;
        }
        Command::Status(args) => {
            let data = status::run(args, &services).await?;
            output::render(&data, cli.pretty)?;
        }
        Command::Refresh(args) => {
            let report = refresh::run(args, &services).await?;
            output::render(&report, cli.pretty)?;
        }
        Command::Health => {
            let response = health::run(&services).await?;
            output::render(&response, cli.pretty)?;
            if !response.report.is_healthy() {
                return Ok(ExitCode::from(EXIT_UNHEALTHY));
            }
        }
        Command::Keys(args) => {
            let data = match &args.command {
                KeysCommand::Create(create) => keys::create(create, &services).await?,
                KeysCommand::Disable(disable) => keys::disable(disable, &services).await?,
            };
            output::render(&data, cli.pretty)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Parses raw symbols and rejects anything outside the supported catalog.
fn parse_symbols(raw: &[String]) -> Result<Vec<Symbol>, ValidationError> {
    let catalog = AssetCatalog;
    raw.iter()
        .map(|value| {
            let symbol = Symbol::parse(value)?;
            catalog.require_supported(&symbol)?;
            Ok(symbol)
        })
        .collect()
}
