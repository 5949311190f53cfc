// Acropolis core - weather monitoring rule evaluation
//
// Fetches forecast data for each monitoring rule from an EDR weather service,
// reduces it to a single value, compares it with the rule's threshold and
// records triggers for the alerting side.

use std::sync::Arc;
use tracing::{debug, info};

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod providers;
pub mod retry;
pub mod storage;
pub mod weather;

pub use cache::{CacheError, CacheKey, FileCache, MemoryCache, ResponseCache};
pub use config::MonitorConfig;
pub use dispatch::{dispatch_pending, AlertDispatcher, DispatchSummary, LogDispatcher};
pub use error::{ErrorKind, MonitoringError};
pub use evaluation::{evaluate, reduce};
pub use model::*;
pub use orchestrator::{
    FailureKind, MonitoringRunner, RuleOutcome, RuleReport, RunOptions, RunReport,
};
pub use providers::{MetricDataProvider, ProviderRegistry};
pub use retry::{retry_async, RetryConfig};
pub use storage::{MemoryStore, MonitoringStore, PendingAlert, RuleFilter};
#[cfg(feature = "persistence")]
pub use storage::SqliteStore;
pub use weather::{EdrWeatherClient, GeoPoint, QueryType, SeriesRequest, SeriesSource};

/// Build the weather client described by `config`, with the file cache
/// attached unless caching is disabled.
pub fn weather_client_from_config(config: &MonitorConfig) -> anyhow::Result<EdrWeatherClient> {
    let client = EdrWeatherClient::new(
        &config.weather.base_url,
        &config.weather.resource_name,
        config.request_timeout(),
    )?;

    if !config.cache.enabled {
        debug!("Response cache disabled");
        return Ok(client);
    }

    let cache_dir = config.cache_dir();
    info!("Using response cache at {}", cache_dir.display());
    Ok(client.with_cache(Arc::new(FileCache::new(cache_dir))))
}
