use coinwatch_core::{CacheCoherenceManager, HealthReport};
use serde::Serialize;

use crate::error::CliError;

use super::Services;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub timestamp: String,
}

pub async fn run(services: &Services) -> Result<HealthResponse, CliError> {
    // Health only reads the store; the fetcher is never reached.
    let manager = CacheCoherenceManager::new(
        services.store.clone(),
        services.fetcher(),
        services.clock.clone(),
    );

    let report = manager.health(services.config.health_stale_after).await;
    Ok(HealthResponse {
        report,
        timestamp: services.clock.now().format_rfc3339(),
    })
}
