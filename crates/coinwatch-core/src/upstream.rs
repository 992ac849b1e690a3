//! Upstream price provider client with bounded retries.
//!
//! Each attempt is one HTTP call with a fixed timeout. Transport errors,
//! non-2xx statuses and unusable bodies all count as failed attempts; the
//! fetcher pauses according to the [`RetryPolicy`] between attempts (never
//! before the first, never after the last) and gives up with an
//! [`UpstreamError`] once the attempts are exhausted.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::http_client::{HttpClient, HttpRequest};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::{AssetCatalog, PriceRecord, Symbol, UtcDateTime};

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.coingecko.com/api/v3";

/// Why a single attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream response malformed: {0}")]
    Malformed(String),
}

impl UpstreamFailure {
    /// Timeouts, connection problems and error statuses are transient;
    /// malformed bodies are not, although both consume one attempt.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

/// Terminal failure after every attempt was consumed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("upstream price fetch failed after {attempts} attempts: {last_failure}")]
pub struct UpstreamError {
    pub attempts: u32,
    pub last_failure: UpstreamFailure,
    /// The symbols originally requested, for caller-side fallback.
    pub symbols: Vec<Symbol>,
}

impl UpstreamError {
    pub const fn code(&self) -> &'static str {
        "EXTERNAL_API_ERROR"
    }

    pub const fn status(&self) -> u16 {
        502
    }
}

/// Fetches current prices for a batch of symbols.
pub trait PriceFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRecord>, UpstreamError>> + Send + 'a>>;
}

/// CoinGecko `simple/price` client.
#[derive(Clone)]
pub struct CoinGeckoFetcher {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    catalog: AssetCatalog,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl CoinGeckoFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http_client,
            clock,
            sleeper: Arc::new(TokioSleeper),
            catalog: AssetCatalog,
            base_url: String::from(DEFAULT_UPSTREAM_URL),
            api_key: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn build_request(&self, symbols: &[Symbol]) -> HttpRequest {
        let ids = symbols
            .iter()
            .map(|symbol| urlencoding::encode(&self.catalog.provider_id(symbol)).into_owned())
            .collect::<Vec<_>>()
            .join(",");

        let url = format!(
            "{}/simple/price?ids={ids}&vs_currencies=usd&include_market_cap=true&include_24hr_change=true",
            self.base_url
        );

        let mut request = HttpRequest::get(url).with_timeout(self.retry.attempt_timeout);
        if let Some(api_key) = &self.api_key {
            request = request.with_header("x-cg-api-key", api_key);
        }
        request
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        symbols: &[Symbol],
    ) -> Result<Vec<PriceRecord>, UpstreamFailure> {
        let response = self
            .http_client
            .execute(request.clone())
            .await
            .map_err(|error| {
                if error.timed_out() {
                    UpstreamFailure::Timeout(error.message().to_owned())
                } else {
                    UpstreamFailure::Transport(error.message().to_owned())
                }
            })?;

        if !response.is_success() {
            return Err(UpstreamFailure::Status(response.status));
        }

        parse_simple_price(&response.body, symbols, self.catalog, self.clock.now())
    }
}

impl PriceFetcher for CoinGeckoFetcher {
    fn fetch<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRecord>, UpstreamError>> + Send + 'a>> {
        Box::pin(async move {
            let mut seen = BTreeSet::new();
            let unique: Vec<Symbol> = symbols
                .iter()
                .filter(|symbol| seen.insert((*symbol).clone()))
                .cloned()
                .collect();
            if unique.is_empty() {
                return Ok(Vec::new());
            }

            let request = self.build_request(&unique);
            let total = self.retry.total_attempts();
            let mut attempt = 1;

            loop {
                info!(attempt, total, symbols = unique.len(), "fetching prices from upstream");

                let failure = match self.attempt(&request, &unique).await {
                    Ok(records) => {
                        info!(attempt, fetched = records.len(), "upstream fetch succeeded");
                        return Ok(records);
                    }
                    Err(failure) => failure,
                };

                warn!(
                    attempt,
                    total,
                    transient = failure.is_transient(),
                    error = %failure,
                    "upstream attempt failed"
                );

                if attempt >= total {
                    error!(attempts = total, error = %failure, "upstream retries exhausted");
                    return Err(UpstreamError {
                        attempts: total,
                        last_failure: failure,
                        symbols: symbols.to_vec(),
                    });
                }

                let delay = self.retry.delay_for_retry(attempt - 1);
                debug!(delay_ms = delay.as_millis() as u64, "waiting before retry");
                self.sleeper.sleep(delay).await;
                attempt += 1;
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct SimplePriceQuote {
    usd: Option<f64>,
    usd_market_cap: Option<f64>,
    usd_24h_change: Option<f64>,
}

/// Parses a `simple/price` body. Symbols missing from the body, or lacking a
/// price, are dropped; a body yielding no usable record is malformed.
fn parse_simple_price(
    body: &str,
    symbols: &[Symbol],
    catalog: AssetCatalog,
    observed_at: UtcDateTime,
) -> Result<Vec<PriceRecord>, UpstreamFailure> {
    let quotes: BTreeMap<String, SimplePriceQuote> = serde_json::from_str(body)
        .map_err(|e| UpstreamFailure::Malformed(format!("failed to parse price body: {e}")))?;

    let mut records = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let provider_id = catalog.provider_id(symbol);
        let Some(quote) = quotes.get(&provider_id) else {
            warn!(%symbol, provider_id = %provider_id, "symbol absent from upstream response");
            continue;
        };
        let Some(price) = quote.usd else {
            warn!(%symbol, "upstream quote has no price");
            continue;
        };

        match PriceRecord::new(
            symbol.clone(),
            catalog.display_name(symbol),
            price,
            quote.usd_24h_change.unwrap_or(0.0),
            quote.usd_market_cap.map_or(0, |cap| cap as i64),
            observed_at,
        ) {
            Ok(record) => records.push(record),
            Err(error) => warn!(%symbol, %error, "discarding invalid upstream quote"),
        }
    }

    if records.is_empty() {
        return Err(UpstreamFailure::Malformed(String::from(
            "no valid price data found in response",
        )));
    }

    Ok(records)
}
