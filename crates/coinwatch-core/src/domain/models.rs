use serde::{Deserialize, Serialize};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Upstream price observation for one asset.
///
/// `observed_at` is the instant the upstream value was obtained. Reading a
/// record back from the store never changes it; a refresh produces a new
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    pub symbol: Symbol,
    pub display_name: String,
    pub price: f64,
    pub change_24h: f64,
    pub market_cap: i64,
    pub observed_at: UtcDateTime,
}

impl PriceRecord {
    pub fn new(
        symbol: Symbol,
        display_name: impl Into<String>,
        price: f64,
        change_24h: f64,
        market_cap: i64,
        observed_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_finite("price", price)?;
        validate_finite("change_24h", change_24h)?;

        Ok(Self {
            symbol,
            display_name: display_name.into(),
            price,
            change_24h,
            market_cap,
            observed_at,
        })
    }

    pub fn store_key(symbol: &Symbol) -> String {
        format!("PRICE#{symbol}")
    }
}

/// API credential provisioned out of band. Disabling is a soft revoke; the
/// record is never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub label: String,
    pub created_at: UtcDateTime,
    pub enabled: bool,
}

impl Credential {
    pub fn store_key(id: &str) -> String {
        format!("APIKEY#{id}")
    }
}

/// Request counter for one credential within one fixed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindowCounter {
    pub credential_id: String,
    pub window_key: String,
    pub count: u32,
    pub expires_at: UtcDateTime,
}

impl RateWindowCounter {
    pub fn store_key(credential_id: &str, window_key: &str) -> String {
        format!("APIKEY#{credential_id}#RATELIMIT#{window_key}")
    }

    /// Counter bodies are persisted as the bare decimal count.
    pub fn parse_count(body: &str) -> Option<u32> {
        body.trim().parse().ok()
    }

    pub fn encode_count(&self) -> String {
        self.count.to_string()
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> UtcDateTime {
        UtcDateTime::parse("2024-01-01T12:00:00Z").expect("valid")
    }

    #[test]
    fn price_record_serializes_in_camel_case() {
        let record = PriceRecord::new(
            Symbol::parse("BTC").expect("valid"),
            "Bitcoin",
            45_000.5,
            2.5,
            850_000_000_000,
            ts(),
        )
        .expect("valid record");

        let json = serde_json::to_value(&record).expect("serializes");
        assert_eq!(json["displayName"], "Bitcoin");
        assert_eq!(json["change24h"], 2.5);
        assert_eq!(json["marketCap"], 850_000_000_000_i64);
        assert_eq!(json["observedAt"], "2024-01-01T12:00:00Z");

        let back: PriceRecord = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, record);
    }

    #[test]
    fn price_record_rejects_non_finite_price() {
        let err = PriceRecord::new(
            Symbol::parse("BTC").expect("valid"),
            "Bitcoin",
            f64::NAN,
            0.0,
            0,
            ts(),
        )
        .expect_err("must fail");
        assert_eq!(err, ValidationError::NonFiniteValue { field: "price" });
    }

    #[test]
    fn store_keys_follow_layout() {
        let symbol = Symbol::parse("eth").expect("valid");
        assert_eq!(PriceRecord::store_key(&symbol), "PRICE#ETH");
        assert_eq!(Credential::store_key("abc"), "APIKEY#abc");
        assert_eq!(
            RateWindowCounter::store_key("abc", "202401011200"),
            "APIKEY#abc#RATELIMIT#202401011200"
        );
    }

    #[test]
    fn counter_count_parses_trimmed_decimal() {
        assert_eq!(RateWindowCounter::parse_count(" 42\n"), Some(42));
        assert_eq!(RateWindowCounter::parse_count("forty"), None);
    }
}
