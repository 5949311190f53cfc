// Process-local store

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{MonitoringStore, PendingAlert, RuleFilter};
use crate::model::{AlertTrigger, MonitoringRule, MonitoringRun};

#[derive(Debug, Default)]
struct State {
    rules: Vec<MonitoringRule>,
    runs: HashMap<String, MonitoringRun>,
    triggers: Vec<AlertTrigger>,
}

/// Keeps everything in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<MonitoringRule>) -> Self {
        Self {
            state: RwLock::new(State {
                rules,
                ..State::default()
            }),
        }
    }

    pub async fn insert_rule(&self, rule: MonitoringRule) {
        self.state.write().await.rules.push(rule);
    }
}

#[async_trait]
impl MonitoringStore for MemoryStore {
    async fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<MonitoringRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .iter()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect())
    }

    async fn create_run(&self, run: &MonitoringRun) -> Result<()> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.id) {
            bail!("Monitoring run {} already exists", run.id);
        }
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn finish_run(&self, run: &MonitoringRun) -> Result<()> {
        let mut state = self.state.write().await;
        match state.runs.get_mut(&run.id) {
            Some(stored) => {
                stored.finished_at = run.finished_at;
                Ok(())
            }
            None => bail!("Monitoring run {} not found", run.id),
        }
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<MonitoringRun>> {
        Ok(self.state.read().await.runs.get(run_id).cloned())
    }

    async fn insert_trigger(&self, trigger: &AlertTrigger) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(run_id) = &trigger.monitoring_run_id {
            match state.runs.get(run_id) {
                Some(run) if run.is_finished() => {
                    bail!("Monitoring run {} has already finished", run_id)
                }
                Some(_) => {}
                None => bail!("Monitoring run {} not found", run_id),
            }
        }
        state.triggers.push(trigger.clone());
        Ok(())
    }

    async fn list_triggers(&self, run_id: &str) -> Result<Vec<AlertTrigger>> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .iter()
            .filter(|t| t.monitoring_run_id.as_deref() == Some(run_id))
            .cloned()
            .collect())
    }

    async fn pending_notifications(&self) -> Result<Vec<PendingAlert>> {
        let state = self.state.read().await;
        let mut pending: Vec<PendingAlert> = state
            .triggers
            .iter()
            .filter(|t| t.notified_at.is_none())
            .map(|trigger| {
                let rule = state.rules.iter().find(|r| r.id == trigger.monitoring_rule_id);
                PendingAlert {
                    trigger: trigger.clone(),
                    rule_title: rule.map(|r| r.title.clone()).unwrap_or_default(),
                    definitions: rule.map(|r| r.alert_definitions.clone()).unwrap_or_default(),
                }
            })
            .collect();
        pending.sort_by_key(|p| p.trigger.triggered_at);
        Ok(pending)
    }

    async fn mark_notified(&self, trigger_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        match state.triggers.iter_mut().find(|t| t.id == trigger_id) {
            Some(trigger) => {
                trigger.notified_at.get_or_insert(at);
                Ok(())
            }
            None => bail!("Alert trigger {} not found", trigger_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_rejected_after_run_finished() {
        let store = MemoryStore::new();
        let mut run = MonitoringRun::start(Utc::now());
        store.create_run(&run).await.unwrap();

        let first = AlertTrigger::new("rule-1".to_string(), 1.0, 2.0, Utc::now()).in_run(&run.id);
        store.insert_trigger(&first).await.unwrap();

        run.finish(Utc::now());
        store.finish_run(&run).await.unwrap();

        let late = AlertTrigger::new("rule-1".to_string(), 1.0, 3.0, Utc::now()).in_run(&run.id);
        assert!(store.insert_trigger(&late).await.is_err());
        assert_eq!(store.list_triggers(&run.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_notified_removes_from_pending() {
        let store = MemoryStore::new();
        let trigger = AlertTrigger::new("rule-1".to_string(), 1.0, 2.0, Utc::now());
        store.insert_trigger(&trigger).await.unwrap();
        assert_eq!(store.pending_notifications().await.unwrap().len(), 1);

        store.mark_notified(&trigger.id, Utc::now()).await.unwrap();
        assert!(store.pending_notifications().await.unwrap().is_empty());
        assert!(store.mark_notified("missing", Utc::now()).await.is_err());
    }
}
