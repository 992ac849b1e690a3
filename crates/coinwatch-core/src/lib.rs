//! # Coinwatch Core
//!
//! Request admission and cache coherence for authenticated, rate-limited
//! cryptocurrency price lookups.
//!
//! ## Overview
//!
//! Every protected request passes through the [`AdmissionController`]
//! (credential lookup, enabled check, fixed-window rate limit) and then the
//! [`CacheCoherenceManager`], which serves fresh records from the
//! [`KeyValueStore`], refreshes stale or missing ones through a
//! [`PriceFetcher`] in a single batch, and falls back to stale data when the
//! upstream provider is unavailable.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admission`] | Admission controller and its error taxonomy |
//! | [`clock`] | Injectable time source |
//! | [`coherence`] | Freshness classification and resolution |
//! | [`config`] | Environment-driven service configuration |
//! | [`credentials`] | Credential lookup, provisioning and token masking |
//! | [`domain`] | Domain models (PriceRecord, Credential, Symbol, ...) |
//! | [`health`] | Store reachability and price age report |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`rate_limit`] | Per-credential fixed-window limiter |
//! | [`refresh`] | Periodic catalog refresh job |
//! | [`retry`] | Retry policy and sleepers |
//! | [`store`] | Key-value store contract and in-memory store |
//! | [`upstream`] | Upstream price fetcher with bounded retries |
//!
//! ## Control flow
//!
//! ```text
//! admit(token) ──▶ CredentialSource ──▶ RateLimiter
//!      │
//!      ▼
//! resolve(symbols, threshold)
//!      ├── fresh ──────────────▶ KeyValueStore
//!      └── stale / missing ────▶ PriceFetcher ──▶ write-through
//!                                     │ failure
//!                                     ▼
//!                               stale fallback
//! ```

pub mod admission;
pub mod clock;
pub mod coherence;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod rate_limit;
pub mod refresh;
pub mod retry;
pub mod store;
pub mod upstream;

pub use admission::{AdmissionController, AdmissionError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coherence::{
    CacheCoherenceManager, CacheStatus, Classification, PriceSource, Resolution, ResolveError,
};
pub use config::ServiceConfig;
pub use credentials::{mask_token, CredentialDirectory, CredentialSource};
pub use domain::{AssetCatalog, Credential, PriceRecord, RateWindowCounter, Symbol, UtcDateTime};
pub use error::{CoreError, ValidationError};
pub use health::{check_health, CheckStatus, HealthChecks, HealthReport, HealthStatus};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitExceeded, RateLimiter};
pub use refresh::{PriceRefresher, RefreshError, RefreshReport};
pub use retry::{Backoff, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use store::{IncrementOutcome, KeyValueStore, MemoryStore, StoreEntry, StoreError};
pub use upstream::{CoinGeckoFetcher, PriceFetcher, UpstreamError, UpstreamFailure};
