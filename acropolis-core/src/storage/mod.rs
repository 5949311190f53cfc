//! Persistence of rules, runs and triggers.
//!
//! [`MonitoringStore`] is the seam the monitoring pass writes through. The
//! SQLite implementation lives behind the `persistence` feature; an
//! in-memory store is always available for embedding and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AlertDefinition, AlertTrigger, MetricType, MonitoringRule, MonitoringRun};

pub mod memory;

#[cfg(feature = "persistence")]
pub mod database;
#[cfg(feature = "persistence")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "persistence")]
pub use sqlite::SqliteStore;

/// Which rules a monitoring pass picks up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    pub metric: Option<MetricType>,
    pub active_only: bool,
}

impl Default for RuleFilter {
    fn default() -> Self {
        Self {
            metric: None,
            active_only: true,
        }
    }
}

impl RuleFilter {
    pub fn for_metric(metric: MetricType) -> Self {
        Self {
            metric: Some(metric),
            ..Self::default()
        }
    }

    pub fn matches(&self, rule: &MonitoringRule) -> bool {
        if self.active_only && !rule.active {
            return false;
        }
        self.metric.map_or(true, |metric| rule.metric == metric)
    }
}

/// A trigger waiting for delivery together with what is needed to deliver it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAlert {
    pub trigger: AlertTrigger,
    pub rule_title: String,
    pub definitions: Vec<AlertDefinition>,
}

#[async_trait]
pub trait MonitoringStore: Send + Sync {
    /// Rules selected by `filter`, oldest first.
    async fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<MonitoringRule>>;

    async fn create_run(&self, run: &MonitoringRun) -> Result<()>;

    /// Persist the finish timestamp of an existing run.
    async fn finish_run(&self, run: &MonitoringRun) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<MonitoringRun>>;

    /// Store a trigger. Fails if the trigger's run has already finished.
    async fn insert_trigger(&self, trigger: &AlertTrigger) -> Result<()>;

    async fn list_triggers(&self, run_id: &str) -> Result<Vec<AlertTrigger>>;

    /// Triggers not yet handed to a dispatcher, oldest first.
    async fn pending_notifications(&self) -> Result<Vec<PendingAlert>>;

    async fn mark_notified(&self, trigger_id: &str, at: DateTime<Utc>) -> Result<()>;
}
