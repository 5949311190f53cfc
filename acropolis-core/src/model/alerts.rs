// Alert definitions attached to rules and the triggers produced by evaluation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "SMS")]
    Sms,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::Email => write!(f, "EMAIL"),
            AlertType::Sms => write!(f, "SMS"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(AlertType::Email),
            "SMS" => Ok(AlertType::Sms),
            _ => Err(format!("Invalid alert type: {}", s)),
        }
    }
}

/// How the owner of a rule wants to be told about a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub alert_type: AlertType,
    pub contact_info: String,
    pub message_template: String,
}

/// Recorded outcome of a rule whose condition held during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "persistence", derive(sqlx::FromRow))]
pub struct AlertTrigger {
    pub id: String,
    pub triggered_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub reference_value: f64,
    pub actual_value: f64,
    pub monitoring_rule_id: String,
    pub monitoring_run_id: Option<String>,
}

impl AlertTrigger {
    pub fn new(
        monitoring_rule_id: String,
        reference_value: f64,
        actual_value: f64,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            triggered_at,
            notified_at: None,
            reference_value,
            actual_value,
            monitoring_rule_id,
            monitoring_run_id: None,
        }
    }

    pub fn in_run(mut self, run_id: &str) -> Self {
        self.monitoring_run_id = Some(run_id.to_string());
        self
    }
}
