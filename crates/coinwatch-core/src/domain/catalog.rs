use crate::{Symbol, ValidationError};

/// (symbol, provider id, display name)
const SUPPORTED_ASSETS: &[(&str, &str, &str)] = &[
    ("BTC", "bitcoin", "Bitcoin"),
    ("ETH", "ethereum", "Ethereum"),
    ("ADA", "cardano", "Cardano"),
    ("BNB", "binancecoin", "Binance Coin"),
    ("XRP", "ripple", "XRP"),
    ("SOL", "solana", "Solana"),
    ("DOT", "polkadot", "Polkadot"),
    ("DOGE", "dogecoin", "Dogecoin"),
    ("AVAX", "avalanche-2", "Avalanche"),
    ("MATIC", "matic-network", "Polygon"),
    ("LINK", "chainlink", "Chainlink"),
    ("UNI", "uniswap", "Uniswap"),
    ("LTC", "litecoin", "Litecoin"),
    ("ATOM", "cosmos", "Cosmos"),
    ("XLM", "stellar", "Stellar"),
    ("ALGO", "algorand", "Algorand"),
    ("VET", "vechain", "VeChain"),
    ("ICP", "internet-computer", "Internet Computer"),
    ("FIL", "filecoin", "Filecoin"),
    ("TRX", "tron", "TRON"),
];

/// Catalog of supported assets and their provider identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetCatalog;

impl AssetCatalog {
    fn entry(symbol: &Symbol) -> Option<&'static (&'static str, &'static str, &'static str)> {
        SUPPORTED_ASSETS
            .iter()
            .find(|(ticker, _, _)| *ticker == symbol.as_str())
    }

    pub fn is_supported(self, symbol: &Symbol) -> bool {
        Self::entry(symbol).is_some()
    }

    /// Rejects symbols outside the catalog.
    pub fn require_supported(self, symbol: &Symbol) -> Result<(), ValidationError> {
        if self.is_supported(symbol) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedSymbol {
                symbol: symbol.to_string(),
            })
        }
    }

    /// Provider identifier; unknown symbols fall back to their lowercase form.
    pub fn provider_id(self, symbol: &Symbol) -> String {
        match Self::entry(symbol) {
            Some((_, provider_id, _)) => (*provider_id).to_owned(),
            None => symbol.as_str().to_ascii_lowercase(),
        }
    }

    /// Display name; unknown symbols fall back to the ticker itself.
    pub fn display_name(self, symbol: &Symbol) -> String {
        match Self::entry(symbol) {
            Some((_, _, name)) => (*name).to_owned(),
            None => symbol.as_str().to_owned(),
        }
    }

    pub fn symbols(self) -> Vec<Symbol> {
        SUPPORTED_ASSETS
            .iter()
            .filter_map(|(ticker, _, _)| Symbol::parse(ticker).ok())
            .collect()
    }
}
