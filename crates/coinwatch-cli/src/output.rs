//! JSON response and error bodies.

use coinwatch_core::{PriceRecord, PriceSource, UtcDateTime};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::CliError;

/// One priced asset in a quote response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteEntry {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change24h: f64,
    pub market_cap: i64,
    pub last_updated: String,
    pub source: PriceSource,
}

impl QuoteEntry {
    pub fn from_record(record: &PriceRecord, source: PriceSource) -> Self {
        Self {
            symbol: record.symbol.to_string(),
            name: record.display_name.clone(),
            price: round_to(record.price, 2),
            change24h: round_to(record.change_24h, 1),
            market_cap: record.market_cap,
            last_updated: record.observed_at.format_rfc3339(),
            source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub data: Vec<QuoteEntry>,
    pub timestamp: String,
}

/// Error body printed on failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub timestamp: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn from_error(error: &CliError, now: UtcDateTime) -> Self {
        let details = match error {
            CliError::Resolve(coinwatch_core::ResolveError::Upstream(upstream)) => {
                Some(serde_json::json!({
                    "attempts": upstream.attempts,
                    "symbols": upstream.symbols,
                }))
            }
            _ => None,
        };

        Self {
            error: error.to_string(),
            code: error.code(),
            timestamp: now.format_rfc3339(),
            request_id: Uuid::new_v4().to_string(),
            retry_after: error.retry_after().map(|after| after.as_secs()),
            details,
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{payload}");
    Ok(())
}

pub fn render_error(error: &CliError, now: UtcDateTime, pretty: bool) {
    let body = ErrorBody::from_error(error, now);
    if let Err(render_error) = render(&body, pretty) {
        eprintln!("error: {error} ({render_error})");
    }
}
