//! One monitoring pass over the eligible rules.
//!
//! A pass opens a [`MonitoringRun`], evaluates every selected rule (with
//! bounded parallelism), persists triggers as they are produced and finally
//! stamps the run as finished. Failures of a single rule are recorded in the
//! [`RunReport`] and never abort the pass; only failures of the run bracket
//! itself do.

use anyhow::{anyhow, Context};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{ErrorKind, MonitoringError, Result};
use crate::evaluation::evaluate;
use crate::model::{AlertTrigger, AreaDefinition, MonitoringRule, MonitoringRun};
use crate::providers::ProviderRegistry;
use crate::retry::{retry_async, RetryConfig};
use crate::storage::{MonitoringStore, RuleFilter};
use crate::weather::SeriesSource;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Rules evaluated at the same time; at least one.
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub filter: RuleFilter,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryConfig::default(),
            filter: RuleFilter::default(),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            concurrency: config.run.concurrency.max(1),
            retry: config.retry(),
            filter: RuleFilter {
                metric: None,
                active_only: config.run.active_only,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Configuration,
    Remote,
    Data,
    Persistence,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "configuration"),
            FailureKind::Remote => write!(f, "remote"),
            FailureKind::Data => write!(f, "data"),
            FailureKind::Persistence => write!(f, "persistence"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Triggered(AlertTrigger),
    Clear,
    NoData,
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone)]
pub struct RuleReport {
    pub rule_id: String,
    pub title: String,
    pub outcome: RuleOutcome,
}

/// What happened during a finished pass.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: MonitoringRun,
    pub rules: Vec<RuleReport>,
}

impl RunReport {
    fn count(&self, predicate: impl Fn(&RuleOutcome) -> bool) -> usize {
        self.rules.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn triggered(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::Triggered(_)))
    }

    pub fn clear(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::Clear))
    }

    pub fn no_data(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::NoData))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.rules
            .iter()
            .find(|r| r.rule_id == rule_id)
            .map(|r| &r.outcome)
    }
}

pub struct MonitoringRunner {
    store: Arc<dyn MonitoringStore>,
    source: Arc<dyn SeriesSource>,
    providers: ProviderRegistry,
}

impl MonitoringRunner {
    pub fn new(
        store: Arc<dyn MonitoringStore>,
        source: Arc<dyn SeriesSource>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            source,
            providers,
        }
    }

    /// Evaluate every rule selected by `options.filter` in a new run.
    ///
    /// Returns an error only if the rules cannot be loaded or the run record
    /// cannot be created or finalized.
    pub async fn run_pass(&self, options: &RunOptions) -> anyhow::Result<RunReport> {
        let rules = self
            .store
            .list_rules(&options.filter)
            .await
            .context("Failed to load monitoring rules")?;

        let mut run = MonitoringRun::start(Utc::now());
        self.store
            .create_run(&run)
            .await
            .context("Failed to create monitoring run")?;

        info!(run_id = %run.id, rules = rules.len(), "Starting monitoring pass");

        let retry = &options.retry;
        let mut evaluations = stream::iter(rules)
            .map(|rule| async move {
                let result = self.evaluate_rule(&rule, retry).await;
                (rule, result)
            })
            .buffer_unordered(options.concurrency.max(1));

        // Triggers are written here, by the single consumer of the stream
        let mut reports = Vec::new();
        while let Some((rule, result)) = evaluations.next().await {
            let outcome = self.record_outcome(&run, &rule, result).await;
            reports.push(RuleReport {
                rule_id: rule.id,
                title: rule.title,
                outcome,
            });
        }
        drop(evaluations);

        run.finish(Utc::now());
        self.store
            .finish_run(&run)
            .await
            .context("Failed to finish monitoring run")?;

        let report = RunReport {
            run,
            rules: reports,
        };
        info!(
            run_id = %report.run.id,
            triggered = report.triggered(),
            clear = report.clear(),
            no_data = report.no_data(),
            failed = report.failed(),
            "Monitoring pass finished"
        );
        Ok(report)
    }

    /// [`run_pass`](Self::run_pass) with a deadline.
    ///
    /// On overrun the remaining evaluations are dropped and the run stays
    /// unfinished; triggers written so far are kept.
    pub async fn run_with_timeout(
        &self,
        options: &RunOptions,
        timeout: Duration,
    ) -> anyhow::Result<RunReport> {
        match tokio::time::timeout(timeout, self.run_pass(options)).await {
            Ok(result) => result,
            Err(_) => {
                error!(?timeout, "Monitoring pass exceeded its deadline");
                Err(anyhow!("Monitoring pass exceeded deadline of {:?}", timeout))
            }
        }
    }

    async fn evaluate_rule(
        &self,
        rule: &MonitoringRule,
        retry: &RetryConfig,
    ) -> Result<Option<AlertTrigger>> {
        rule.validate().map_err(MonitoringError::InvalidRule)?;

        let area = match &rule.area_definition {
            AreaDefinition::PointRadius(area) => area,
            AreaDefinition::Specific(area) => {
                return Err(MonitoringError::UnsupportedArea(format!(
                    "specific area {} cannot be evaluated",
                    area.area_id
                )))
            }
        };
        let provider = self.providers.for_metric(rule.metric)?;
        let window = rule.time_window.interval_from(Utc::now());

        let data = retry_async(retry, MonitoringError::is_transient, || {
            provider.fetch(self.source.as_ref(), area, &window)
        })
        .await?;

        evaluate(rule, &data, Utc::now())
    }

    async fn record_outcome(
        &self,
        run: &MonitoringRun,
        rule: &MonitoringRule,
        result: Result<Option<AlertTrigger>>,
    ) -> RuleOutcome {
        match result {
            Ok(Some(trigger)) => {
                let trigger = trigger.in_run(&run.id);
                match self.store.insert_trigger(&trigger).await {
                    Ok(()) => {
                        info!(
                            run_id = %run.id,
                            rule_id = %rule.id,
                            actual = trigger.actual_value,
                            threshold = trigger.reference_value,
                            "Rule triggered"
                        );
                        RuleOutcome::Triggered(trigger)
                    }
                    Err(e) => {
                        error!(run_id = %run.id, rule_id = %rule.id, "Failed to persist trigger: {:#}", e);
                        RuleOutcome::Failed {
                            kind: FailureKind::Persistence,
                            message: format!("{:#}", e),
                        }
                    }
                }
            }
            Ok(None) => RuleOutcome::Clear,
            Err(e) => {
                let kind = match e.kind() {
                    ErrorKind::NoData => {
                        info!(run_id = %run.id, rule_id = %rule.id, "No data for rule: {}", e);
                        return RuleOutcome::NoData;
                    }
                    ErrorKind::Configuration => {
                        error!(run_id = %run.id, rule_id = %rule.id, "Rule misconfigured: {}", e);
                        FailureKind::Configuration
                    }
                    ErrorKind::Remote => {
                        warn!(run_id = %run.id, rule_id = %rule.id, "Remote failure: {}", e);
                        FailureKind::Remote
                    }
                    ErrorKind::Data => {
                        warn!(run_id = %run.id, rule_id = %rule.id, "Unusable data: {}", e);
                        FailureKind::Data
                    }
                };
                RuleOutcome::Failed {
                    kind,
                    message: e.to_string(),
                }
            }
        }
    }
}
