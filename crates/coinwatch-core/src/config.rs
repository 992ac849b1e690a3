use std::env;
use std::time::Duration;

use crate::retry::{Backoff, RetryPolicy};
use crate::upstream::DEFAULT_UPSTREAM_URL;
use crate::{Symbol, ValidationError};

/// Service knobs derived from `COINWATCH_*` environment variables.
///
/// Values are trimmed; empty or unparsable values fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub freshness_threshold: Duration,
    pub rate_limit_per_window: u32,
    /// Expiry horizon for price records written after a refresh.
    pub cache_write_ttl: Duration,
    pub upstream_max_retries: u32,
    pub upstream_timeout: Duration,
    pub upstream_backoff: Vec<Duration>,
    pub upstream_url: String,
    pub upstream_api_key: Option<String>,
    /// Symbols the refresh job covers by default; empty means the catalog.
    pub refresh_symbols: Vec<Symbol>,
    /// Age past which the newest stored price marks the service unhealthy.
    pub health_stale_after: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            freshness_threshold: Duration::from_secs(5 * 60),
            rate_limit_per_window: 100,
            cache_write_ttl: Duration::from_secs(3600),
            upstream_max_retries: 3,
            upstream_timeout: Duration::from_secs(5),
            upstream_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            upstream_url: String::from(DEFAULT_UPSTREAM_URL),
            upstream_api_key: None,
            refresh_symbols: Vec::new(),
            health_stale_after: Duration::from_secs(15 * 60),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let rate_limit_per_window = vars
            .parse("COINWATCH_RATE_LIMIT_PER_WINDOW")
            .or_else(|| vars.parse("RATE_LIMIT_PER_MINUTE"))
            .unwrap_or(defaults.rate_limit_per_window);

        Self {
            freshness_threshold: vars
                .parse::<u64>("COINWATCH_FRESHNESS_THRESHOLD_MINUTES")
                .map_or(defaults.freshness_threshold, |minutes| {
                    Duration::from_secs(minutes.saturating_mul(60))
                }),
            rate_limit_per_window,
            cache_write_ttl: vars
                .parse("COINWATCH_CACHE_WRITE_TTL_SECONDS")
                .map_or(defaults.cache_write_ttl, Duration::from_secs),
            upstream_max_retries: vars
                .parse("COINWATCH_UPSTREAM_MAX_RETRIES")
                .unwrap_or(defaults.upstream_max_retries),
            upstream_timeout: vars
                .parse("COINWATCH_UPSTREAM_TIMEOUT_SECONDS")
                .map_or(defaults.upstream_timeout, Duration::from_secs),
            upstream_backoff: vars
                .string("COINWATCH_UPSTREAM_BACKOFF_SECONDS")
                .and_then(|raw| parse_backoff(&raw))
                .unwrap_or(defaults.upstream_backoff),
            upstream_url: vars
                .string("COINWATCH_UPSTREAM_URL")
                .unwrap_or(defaults.upstream_url),
            upstream_api_key: vars.string("COINWATCH_UPSTREAM_API_KEY"),
            refresh_symbols: vars
                .string("COINWATCH_SUPPORTED_SYMBOLS")
                .or_else(|| vars.string("SUPPORTED_SYMBOLS"))
                .and_then(|raw| parse_symbol_list(&raw))
                .unwrap_or(defaults.refresh_symbols),
            health_stale_after: vars
                .parse("COINWATCH_HEALTH_STALE_AFTER_SECONDS")
                .map_or(defaults.health_stale_after, Duration::from_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rate_limit_per_window == 0 {
            return Err(ValidationError::ZeroConfigValue {
                field: "rate_limit_per_window",
            });
        }
        if self.upstream_timeout.is_zero() {
            return Err(ValidationError::ZeroConfigValue {
                field: "upstream_timeout",
            });
        }
        if self.health_stale_after.is_zero() {
            return Err(ValidationError::ZeroConfigValue {
                field: "health_stale_after",
            });
        }
        if self.upstream_max_retries > 0 && self.upstream_backoff.is_empty() {
            return Err(ValidationError::EmptyBackoffSchedule);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.upstream_max_retries,
            backoff: Backoff::Schedule(self.upstream_backoff.clone()),
            attempt_timeout: self.upstream_timeout,
        }
    }
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.string(name).and_then(|value| value.parse().ok())
    }
}

/// `"1, 2,4"` -> `[1s, 2s, 4s]`. Any bad step invalidates the whole list.
fn parse_backoff(raw: &str) -> Option<Vec<Duration>> {
    raw.split(',')
        .map(|step| step.trim().parse::<u64>().ok().map(Duration::from_secs))
        .collect()
}

/// `"BTC, eth ,"` -> `[BTC, ETH]`. An invalid symbol invalidates the list.
fn parse_symbol_list(raw: &str) -> Option<Vec<Symbol>> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| Symbol::parse(value).ok())
        .collect()
}
