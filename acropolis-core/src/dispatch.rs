// Hand-off of persisted triggers to notification channels

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::model::AlertType;
use crate::storage::{MonitoringStore, PendingAlert};

/// Delivers one trigger to every channel its rule defines.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &PendingAlert) -> Result<()>;
}

/// Writes alerts to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    async fn dispatch(&self, alert: &PendingAlert) -> Result<()> {
        if alert.definitions.is_empty() {
            info!(
                trigger_id = %alert.trigger.id,
                rule = %alert.rule_title,
                "Trigger has no alert definitions"
            );
        }

        for definition in &alert.definitions {
            let channel = match definition.alert_type {
                AlertType::Email => "email",
                AlertType::Sms => "sms",
            };
            info!(
                trigger_id = %alert.trigger.id,
                rule = %alert.rule_title,
                channel,
                to = %definition.contact_info,
                actual = alert.trigger.actual_value,
                threshold = alert.trigger.reference_value,
                "{}",
                definition.message_template
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Dispatch every pending trigger, then mark it notified.
///
/// A trigger is only marked after its dispatch succeeded, so a failure
/// leaves it pending for the next attempt.
pub async fn dispatch_pending(
    store: &dyn MonitoringStore,
    dispatcher: &dyn AlertDispatcher,
) -> Result<DispatchSummary> {
    let pending = store.pending_notifications().await?;
    let mut summary = DispatchSummary::default();

    for alert in &pending {
        if let Err(e) = dispatcher.dispatch(alert).await {
            warn!(trigger_id = %alert.trigger.id, "Alert dispatch failed: {:#}", e);
            summary.failed += 1;
            continue;
        }

        match store.mark_notified(&alert.trigger.id, Utc::now()).await {
            Ok(()) => summary.delivered += 1,
            Err(e) => {
                warn!(trigger_id = %alert.trigger.id, "Failed to mark trigger notified: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        "Alert dispatch finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertTrigger;
    use crate::storage::MemoryStore;
    use std::sync::Mutex;

    /// Fails for the configured trigger ids, records the rest.
    #[derive(Default)]
    struct RecordingDispatcher {
        fail_for: Vec<String>,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertDispatcher for RecordingDispatcher {
        async fn dispatch(&self, alert: &PendingAlert) -> Result<()> {
            if self.fail_for.contains(&alert.trigger.id) {
                anyhow::bail!("channel unavailable");
            }
            self.delivered.lock().unwrap().push(alert.trigger.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_dispatch_stays_pending() {
        let store = MemoryStore::new();
        let ok = AlertTrigger::new("rule-1".to_string(), 1.0, 2.0, Utc::now());
        let bad = AlertTrigger::new("rule-2".to_string(), 1.0, 3.0, Utc::now());
        store.insert_trigger(&ok).await.unwrap();
        store.insert_trigger(&bad).await.unwrap();

        let dispatcher = RecordingDispatcher {
            fail_for: vec![bad.id.clone()],
            ..Default::default()
        };
        let summary = dispatch_pending(&store, &dispatcher).await.unwrap();
        assert_eq!(summary, DispatchSummary { delivered: 1, failed: 1 });
        assert_eq!(*dispatcher.delivered.lock().unwrap(), vec![ok.id.clone()]);

        let pending = store.pending_notifications().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trigger.id, bad.id);
    }

    #[tokio::test]
    async fn test_log_dispatcher_accepts_everything() {
        let store = MemoryStore::new();
        store
            .insert_trigger(&AlertTrigger::new("rule-1".to_string(), 1.0, 2.0, Utc::now()))
            .await
            .unwrap();

        let summary = dispatch_pending(&store, &LogDispatcher).await.unwrap();
        assert_eq!(summary.delivered, 1);
        assert!(store.pending_notifications().await.unwrap().is_empty());
    }
}
