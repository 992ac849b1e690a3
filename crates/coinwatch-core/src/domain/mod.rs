//! # Domain Models
//!
//! Canonical domain types for coinwatch price lookups.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PriceRecord`] | Upstream price observation for one asset |
//! | [`Credential`] | API credential, soft-revocable |
//! | [`RateWindowCounter`] | Per-credential request count within one fixed window |
//! | [`AssetCatalog`] | Supported assets with provider ids and display names |
//! | [`Symbol`] | Validated asset symbol |
//! | [`UtcDateTime`] | UTC timestamp |

mod catalog;
mod models;
mod symbol;
mod timestamp;

pub use catalog::AssetCatalog;
pub use models::{Credential, PriceRecord, RateWindowCounter};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
