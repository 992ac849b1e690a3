//! CLI argument definitions for coinwatch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote` | Authenticated price lookup with cache fallback |
//! | `status` | Cache freshness per symbol |
//! | `refresh` | Run the periodic refresh job once |
//! | `health` | Store reachability and price age; exits 6 when unhealthy |
//! | `keys create` | Provision a credential |
//! | `keys disable` | Soft-revoke a credential |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--db-path` | `$COINWATCH_HOME/coinwatch.duckdb` | DuckDB store location |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! coinwatch keys create --label dashboard
//! coinwatch quote BTC ETH --api-key <TOKEN>
//! coinwatch refresh
//! coinwatch status BTC --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Cached, rate-limited cryptocurrency price lookups.
#[derive(Debug, Parser)]
#[command(name = "coinwatch", author, version, about = "Cached, rate-limited cryptocurrency price lookups")]
pub struct Cli {
    /// Path to the DuckDB store. Defaults to `$COINWATCH_DB_PATH`, then
    /// `$COINWATCH_HOME/coinwatch.duckdb` (home: `~/.coinwatch`).
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look up prices for one or more symbols.
    Quote(QuoteArgs),
    /// Show cache freshness for symbols (whole catalog when none given).
    Status(SymbolsArgs),
    /// Refresh prices from upstream (configured list or whole catalog when
    /// none given).
    Refresh(SymbolsArgs),
    /// Check store reachability and the age of the newest stored price.
    Health,
    /// Manage API credentials.
    Keys(KeysArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// Symbols to look up, e.g. BTC ETH.
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// API key; falls back to `COINWATCH_API_KEY`.
    #[arg(long)]
    pub api_key: Option<String>,
}

#[derive(Debug, Args)]
pub struct SymbolsArgs {
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommand,
}

#[derive(Debug, Subcommand)]
pub enum KeysCommand {
    /// Provision a new enabled credential.
    Create(CreateKeyArgs),
    /// Disable an existing credential.
    Disable(DisableKeyArgs),
}

#[derive(Debug, Args)]
pub struct CreateKeyArgs {
    /// Human-readable label.
    #[arg(long)]
    pub label: String,
}

#[derive(Debug, Args)]
pub struct DisableKeyArgs {
    /// Credential id (its token).
    pub id: String,
}
