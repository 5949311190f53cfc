// SQLite pool and schema management

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, error, info};

const REQUIRED_TABLES: [&str; 4] = [
    "monitoring_rules",
    "alert_definitions",
    "monitoring_runs",
    "alert_triggers",
];

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pragmas applied to every pooled connection.
fn connect_options(database_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Open a pool over `database_path`, creating the file if needed.
pub async fn create_pool<P: AsRef<Path>>(database_path: P) -> Result<SqlitePool> {
    let database_path = database_path.as_ref();
    debug!(path = %database_path.display(), "Opening SQLite pool");

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(connect_options(database_path))
        .await
        .with_context(|| format!("Failed to open database {}", database_path.display()))
}

/// Split a migration script into executable statements.
///
/// Whole-line and trailing `--` comments are dropped; statements end at a
/// line terminated by `;`.
fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        let code = match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        };
        let trimmed = code.trim();
        if trimmed.is_empty() {
            continue;
        }

        current.push_str(trimmed);
        current.push(' ');

        if trimmed.ends_with(';') {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    statements
}

/// Apply the bundled schema. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    info!("Creating database schema");

    let schema_sql = include_str!("../../migrations/001_initial_schema.sql");

    for statement in split_statements(schema_sql) {
        debug!("Executing: {}", &statement[..statement.len().min(80)]);
        sqlx::query(&statement)
            .execute(pool)
            .await
            .with_context(|| {
                format!(
                    "Failed to execute schema statement: {}",
                    &statement[..statement.len().min(200)]
                )
            })?;
    }

    info!("Database schema created");
    Ok(())
}

/// Whether every table the monitoring pass needs exists.
pub async fn verify_schema(pool: &SqlitePool) -> Result<bool> {
    debug!("Verifying database schema");

    let tables: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(pool)
            .await
            .context("Failed to query table existence")?;

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|required| !tables.iter().any(|(name,)| name == required))
        .collect();

    if missing.is_empty() {
        debug!("All required tables exist");
        Ok(true)
    } else {
        error!("Missing required tables: {:?}", missing);
        Ok(false)
    }
}

/// Open the database, apply the schema and check it.
pub async fn initialize_database<P: AsRef<Path>>(database_path: P) -> Result<SqlitePool> {
    if let Some(parent) = database_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let pool = create_pool(&database_path).await?;
    create_schema(&pool).await?;

    if !verify_schema(&pool).await? {
        anyhow::bail!("Database schema verification failed");
    }

    info!("Database initialized at: {:?}", database_path.as_ref());
    Ok(pool)
}
