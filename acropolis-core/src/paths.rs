use std::env;
use std::path::PathBuf;

pub const DATABASE_PATH_ENV: &str = "ACROPOLIS_DATABASE_PATH";
pub const CACHE_DIR_ENV: &str = "ACROPOLIS_CACHE_DIR";

/// Get the global Acropolis data directory (~/.acropolis/data)
fn get_global_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".acropolis")
        .join("data")
}

/// Get the monitoring database path
///
/// Priority:
/// 1. ACROPOLIS_DATABASE_PATH env var (absolute path override)
/// 2. Global: ~/.acropolis/data/acropolis.db
pub fn get_database_path() -> PathBuf {
    if let Ok(db_path) = env::var(DATABASE_PATH_ENV) {
        return PathBuf::from(db_path);
    }

    get_global_data_dir().join("acropolis.db")
}

/// Get the directory holding cached weather responses
///
/// Priority:
/// 1. ACROPOLIS_CACHE_DIR env var
/// 2. Global: ~/.acropolis/data/weather_cache
pub fn get_cache_dir() -> PathBuf {
    if let Ok(cache_dir) = env::var(CACHE_DIR_ENV) {
        return PathBuf::from(cache_dir);
    }

    get_global_data_dir().join("weather_cache")
}

/// Default location of the TOML configuration file
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("acropolis").join("config.toml"))
}
