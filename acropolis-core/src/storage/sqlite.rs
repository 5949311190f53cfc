// SQLite-backed MonitoringStore

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{FromRow, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::database::initialize_database;
use super::{MonitoringStore, PendingAlert, RuleFilter};
use crate::model::{
    AlertDefinition, AlertTrigger, AlertType, AreaDefinition, EvaluationMode, LogicalOperator,
    MetricType, MonitoringRule, MonitoringRun, TimeWindowDefinition,
};

const RULE_COLUMNS: &str = "id, title, metric, logical_operator, evaluation_mode, threshold, \
                            area_definition, time_window, active";

const TRIGGER_COLUMNS: &str = "id, triggered_at, notified_at, reference_value, actual_value, \
                               monitoring_rule_id, monitoring_run_id";

fn decode_error<E>(e: E) -> sqlx::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e,
    )))
}

// Alert definitions live in their own table and are attached afterwards
impl FromRow<'_, SqliteRow> for MonitoringRule {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let metric: String = row.try_get("metric")?;
        let operator: String = row.try_get("logical_operator")?;
        let mode: String = row.try_get("evaluation_mode")?;
        let area: String = row.try_get("area_definition")?;
        let window: String = row.try_get("time_window")?;

        let area_definition: AreaDefinition = serde_json::from_str(&area).map_err(decode_error)?;
        let time_window: TimeWindowDefinition =
            serde_json::from_str(&window).map_err(decode_error)?;

        Ok(MonitoringRule {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            metric: metric.parse::<MetricType>().map_err(decode_error)?,
            logical_operator: operator.parse::<LogicalOperator>().map_err(decode_error)?,
            evaluation_mode: mode.parse::<EvaluationMode>().map_err(decode_error)?,
            threshold: row.try_get("threshold")?,
            area_definition,
            time_window,
            active: row.try_get("active")?,
            alert_definitions: Vec::new(),
        })
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (and if necessary create) the database at `path`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pool = initialize_database(path).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store a rule and its alert definitions.
    ///
    /// Rules are owned by the rule-management side; this exists for imports
    /// and fixtures.
    pub async fn insert_rule(&self, rule: &MonitoringRule) -> Result<()> {
        let area = serde_json::to_string(&rule.area_definition)?;
        let window = serde_json::to_string(&rule.time_window)?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO monitoring_rules (
                id, title, metric, logical_operator, evaluation_mode, threshold,
                area_definition, time_window, active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id)
        .bind(&rule.title)
        .bind(rule.metric.as_str())
        .bind(rule.logical_operator.symbol())
        .bind(rule.evaluation_mode.to_string())
        .bind(rule.threshold)
        .bind(area)
        .bind(window)
        .bind(rule.active)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert rule {}", rule.id))?;

        for definition in &rule.alert_definitions {
            sqlx::query(
                "INSERT INTO alert_definitions (
                    monitoring_rule_id, alert_type, contact_info, message_template
                ) VALUES (?, ?, ?, ?)",
            )
            .bind(&rule.id)
            .bind(definition.alert_type.to_string())
            .bind(&definition.contact_info)
            .bind(&definition.message_template)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert alert definition for rule {}", rule.id))?;
        }

        tx.commit().await.context("Failed to commit rule")?;
        debug!(rule_id = %rule.id, "Inserted monitoring rule");
        Ok(())
    }

    async fn alert_definitions(&self) -> Result<HashMap<String, Vec<AlertDefinition>>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT monitoring_rule_id, alert_type, contact_info, message_template
             FROM alert_definitions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load alert definitions")?;

        let mut by_rule: HashMap<String, Vec<AlertDefinition>> = HashMap::new();
        for (rule_id, alert_type, contact_info, message_template) in rows {
            let alert_type = match alert_type.parse::<AlertType>() {
                Ok(alert_type) => alert_type,
                Err(e) => {
                    warn!(rule_id = %rule_id, "Skipping alert definition: {}", e);
                    continue;
                }
            };
            by_rule.entry(rule_id).or_default().push(AlertDefinition {
                alert_type,
                contact_info,
                message_template,
            });
        }
        Ok(by_rule)
    }
}

#[async_trait]
impl MonitoringStore for SqliteStore {
    async fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<MonitoringRule>> {
        let mut sql = format!("SELECT {} FROM monitoring_rules WHERE 1 = 1", RULE_COLUMNS);
        if filter.active_only {
            sql.push_str(" AND active = 1");
        }
        if filter.metric.is_some() {
            sql.push_str(" AND metric = ?");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut query = sqlx::query(&sql);
        if let Some(metric) = filter.metric {
            query = query.bind(metric.as_str());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to load monitoring rules")?;

        let mut definitions = self.alert_definitions().await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            match MonitoringRule::from_row(row) {
                Ok(mut rule) => {
                    rule.alert_definitions = definitions.remove(&rule.id).unwrap_or_default();
                    rules.push(rule);
                }
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(rule_id = %id, "Skipping undecodable rule: {}", e);
                }
            }
        }

        debug!(count = rules.len(), ?filter, "Loaded monitoring rules");
        Ok(rules)
    }

    async fn create_run(&self, run: &MonitoringRun) -> Result<()> {
        sqlx::query("INSERT INTO monitoring_runs (id, started_at, finished_at) VALUES (?, ?, ?)")
            .bind(&run.id)
            .bind(run.started_at)
            .bind(run.finished_at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create monitoring run {}", run.id))?;

        info!(run_id = %run.id, "Monitoring run started");
        Ok(())
    }

    async fn finish_run(&self, run: &MonitoringRun) -> Result<()> {
        let result = sqlx::query("UPDATE monitoring_runs SET finished_at = ? WHERE id = ?")
            .bind(run.finished_at)
            .bind(&run.id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to finish monitoring run {}", run.id))?;

        if result.rows_affected() == 0 {
            bail!("Monitoring run {} not found", run.id);
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<MonitoringRun>> {
        sqlx::query_as::<_, MonitoringRun>(
            "SELECT id, started_at, finished_at FROM monitoring_runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load monitoring run {}", run_id))
    }

    async fn insert_trigger(&self, trigger: &AlertTrigger) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        if let Some(run_id) = &trigger.monitoring_run_id {
            let finished_at: Option<Option<DateTime<Utc>>> =
                sqlx::query_scalar("SELECT finished_at FROM monitoring_runs WHERE id = ?")
                    .bind(run_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to look up monitoring run")?;

            match finished_at {
                None => bail!("Monitoring run {} not found", run_id),
                Some(Some(_)) => bail!("Monitoring run {} has already finished", run_id),
                Some(None) => {}
            }
        }

        sqlx::query(&format!(
            "INSERT INTO alert_triggers ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            TRIGGER_COLUMNS
        ))
        .bind(&trigger.id)
        .bind(trigger.triggered_at)
        .bind(trigger.notified_at)
        .bind(trigger.reference_value)
        .bind(trigger.actual_value)
        .bind(&trigger.monitoring_rule_id)
        .bind(&trigger.monitoring_run_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert alert trigger {}", trigger.id))?;

        tx.commit().await.context("Failed to commit alert trigger")?;
        Ok(())
    }

    async fn list_triggers(&self, run_id: &str) -> Result<Vec<AlertTrigger>> {
        sqlx::query_as::<_, AlertTrigger>(&format!(
            "SELECT {} FROM alert_triggers WHERE monitoring_run_id = ? ORDER BY triggered_at, id",
            TRIGGER_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load triggers for run {}", run_id))
    }

    async fn pending_notifications(&self) -> Result<Vec<PendingAlert>> {
        let triggers = sqlx::query_as::<_, AlertTrigger>(&format!(
            "SELECT {} FROM alert_triggers WHERE notified_at IS NULL ORDER BY triggered_at, id",
            TRIGGER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pending triggers")?;

        if triggers.is_empty() {
            return Ok(Vec::new());
        }

        let definitions = self.alert_definitions().await?;
        let titles: HashMap<String, String> =
            sqlx::query_as::<_, (String, String)>("SELECT id, title FROM monitoring_rules")
                .fetch_all(&self.pool)
                .await
                .context("Failed to load rule titles")?
                .into_iter()
                .collect();

        Ok(triggers
            .into_iter()
            .map(|trigger| PendingAlert {
                rule_title: titles
                    .get(&trigger.monitoring_rule_id)
                    .cloned()
                    .unwrap_or_default(),
                definitions: definitions
                    .get(&trigger.monitoring_rule_id)
                    .cloned()
                    .unwrap_or_default(),
                trigger,
            })
            .collect())
    }

    async fn mark_notified(&self, trigger_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE alert_triggers SET notified_at = COALESCE(notified_at, ?) WHERE id = ?",
        )
        .bind(at)
        .bind(trigger_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark trigger {} as notified", trigger_id))?;

        if result.rows_affected() == 0 {
            bail!("Alert trigger {} not found", trigger_id);
        }
        Ok(())
    }
}
