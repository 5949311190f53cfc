// TOML configuration for the monitoring service

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;
use crate::retry::RetryConfig;

pub const WEATHER_URL_ENV: &str = "ACROPOLIS_WEATHER_URL";

/// Service configuration, usually read from `<config_dir>/acropolis/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub parameters: ParameterSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Namespace for cached responses of this service
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Remote parameter names for each metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSection {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_temperature")]
    pub temperature: String,
    #[serde(default = "default_relative_humidity")]
    pub relative_humidity: String,
    #[serde(default = "default_wind_u")]
    pub wind_u: String,
    #[serde(default = "default_wind_v")]
    pub wind_v: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub active_only: bool,
}

fn default_base_url() -> String {
    "https://climathon.iblsoft.com/data/icon-de/edr".to_string()
}

fn default_resource_name() -> String {
    "icon-de".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_collection() -> String {
    "height-above-ground".to_string()
}

fn default_temperature() -> String {
    "temperature".to_string()
}

fn default_relative_humidity() -> String {
    "relative-humidity".to_string()
}

fn default_wind_u() -> String {
    "u-component-of-wind".to_string()
}

fn default_wind_v() -> String {
    "v-component-of-wind".to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            resource_name: default_resource_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ParameterSection {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            temperature: default_temperature(),
            relative_humidity: default_relative_humidity(),
            wind_u: default_wind_u(),
            wind_v: default_wind_v(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            timeout_secs: None,
            active_only: true,
        }
    }
}

impl MonitorConfig {
    /// Serialize to TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Deserialize from TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse config")
    }

    /// Load configuration from an explicit file, or the default location when
    /// `path` is `None`. A missing default file yields the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read config file {:?}", path))?;
                Self::from_toml_str(&content)?
            }
            None => match paths::get_config_path() {
                Some(default_path) if default_path.exists() => {
                    let content = tokio::fs::read_to_string(&default_path)
                        .await
                        .with_context(|| format!("Failed to read config file {:?}", default_path))?;
                    Self::from_toml_str(&content)?
                }
                _ => Self::default(),
            },
        };

        Ok(config.with_env_overrides())
    }

    /// Save configuration to file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = self.to_toml_string()?;
        tokio::fs::write(path, toml_string).await?;
        Ok(())
    }

    /// Environment variables win over file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(WEATHER_URL_ENV) {
            self.weather.base_url = url;
        }
        if let Ok(path) = std::env::var(paths::DATABASE_PATH_ENV) {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var(paths::CACHE_DIR_ENV) {
            self.cache.directory = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(paths::get_database_path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .directory
            .clone()
            .unwrap_or_else(paths::get_cache_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.weather.timeout_secs)
    }

    /// Retry policy for one rule. Backoff factors below 1.0 or non-finite
    /// ones fall back to a constant delay.
    pub fn retry(&self) -> RetryConfig {
        let factor = self.run.backoff_factor;
        RetryConfig {
            max_attempts: self.run.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.run.initial_backoff_ms),
            backoff_factor: if factor.is_finite() && factor >= 1.0 { factor } else { 1.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MonitorConfig::default();

        assert_eq!(config.weather.resource_name, "icon-de");
        assert_eq!(config.weather.timeout_secs, 30);
        assert_eq!(config.parameters.collection, "height-above-ground");
        assert_eq!(config.parameters.relative_humidity, "relative-humidity");
        assert!(config.cache.enabled);
        assert_eq!(config.run.concurrency, 4);
        assert_eq!(config.run.max_attempts, 1);
        assert!(config.run.active_only);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
[weather]
base_url = "http://localhost:9000/edr"
timeout_secs = 5

[parameters]
relative_humidity = "relative-humidity_2m"

[cache]
enabled = false

[run]
concurrency = 8
max_attempts = 3
timeout_secs = 600
"#;

        let config = MonitorConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.weather.base_url, "http://localhost:9000/edr");
        assert_eq!(config.weather.resource_name, "icon-de");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.parameters.relative_humidity, "relative-humidity_2m");
        assert_eq!(config.parameters.temperature, "temperature");
        assert!(!config.cache.enabled);
        assert_eq!(config.run.concurrency, 8);
        assert_eq!(config.run.timeout_secs, Some(600));
        assert_eq!(config.retry().max_attempts, 3);
    }

    #[test]
    fn test_retry_never_drops_below_one_attempt() {
        let mut config = MonitorConfig::default();
        config.run.max_attempts = 0;
        assert_eq!(config.retry().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_negative_backoff_factor_does_not_break_retries() {
        let config = MonitorConfig::from_toml_str(
            "[run]\nmax_attempts = 2\ninitial_backoff_ms = 1\nbackoff_factor = -1.0",
        )
        .unwrap();
        let retry = config.retry();
        assert_eq!(retry.backoff_factor, 1.0);

        let result = crate::retry::retry_async(&retry, |_: &String| true, || async {
            Err::<(), _>("boom".to_string())
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(MonitorConfig::from_toml_str("[run]\nconcurrency = \"many\"").is_err());
    }

    #[tokio::test]
    async fn test_config_file_operations() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = MonitorConfig::default();
        config.run.concurrency = 2;
        config.save(&config_path).await.unwrap();
        assert!(config_path.exists());

        let loaded = MonitorConfig::load(Some(&config_path)).await.unwrap();
        assert_eq!(loaded.run.concurrency, 2);
        assert_eq!(loaded.weather.base_url, config.weather.base_url);
    }
}
