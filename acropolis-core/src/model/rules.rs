// Monitoring rule definitions as stored by the rule-management service

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alerts::AlertDefinition;

/// Weather quantity a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    #[serde(rename = "TEMPERATURE")]
    Temperature,
    #[serde(rename = "WIND-SPEED")]
    WindSpeed,
    #[serde(rename = "RELATIVE-HUMIDITY")]
    RelativeHumidity,
    #[serde(rename = "PRECIPITATION")]
    Precipitation,
    #[serde(rename = "PRESSURE")]
    Pressure,
    #[serde(rename = "SNOW-DEPTH")]
    SnowDepth,
    #[serde(rename = "SNOW-COVER")]
    SnowCover,
}

impl MetricType {
    pub const ALL: [MetricType; 7] = [
        MetricType::Temperature,
        MetricType::WindSpeed,
        MetricType::RelativeHumidity,
        MetricType::Precipitation,
        MetricType::Pressure,
        MetricType::SnowDepth,
        MetricType::SnowCover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Temperature => "TEMPERATURE",
            MetricType::WindSpeed => "WIND-SPEED",
            MetricType::RelativeHumidity => "RELATIVE-HUMIDITY",
            MetricType::Precipitation => "PRECIPITATION",
            MetricType::Pressure => "PRESSURE",
            MetricType::SnowDepth => "SNOW-DEPTH",
            MetricType::SnowCover => "SNOW-COVER",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('_', "-");
        MetricType::ALL
            .iter()
            .copied()
            .find(|metric| metric.as_str() == normalized)
            .ok_or_else(|| format!("Invalid metric type: {}", s))
    }
}

/// Comparison applied between the reduced metric value and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
}

impl LogicalOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            LogicalOperator::Lte => "<=",
            LogicalOperator::Lt => "<",
            LogicalOperator::Gte => ">=",
            LogicalOperator::Gt => ">",
            LogicalOperator::Eq => "=",
            LogicalOperator::Neq => "!=",
        }
    }

    /// `<` and `<=` look for the lowest value in a series.
    pub fn is_less_family(&self) -> bool {
        matches!(self, LogicalOperator::Lt | LogicalOperator::Lte)
    }

    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            LogicalOperator::Lte => value <= threshold,
            LogicalOperator::Lt => value < threshold,
            LogicalOperator::Gte => value >= threshold,
            LogicalOperator::Gt => value > threshold,
            LogicalOperator::Eq => value == threshold,
            LogicalOperator::Neq => value != threshold,
        }
    }
}

impl std::fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for LogicalOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "<=" | "LTE" => Ok(LogicalOperator::Lte),
            "<" | "LT" => Ok(LogicalOperator::Lt),
            ">=" | "GTE" => Ok(LogicalOperator::Gte),
            ">" | "GT" => Ok(LogicalOperator::Gt),
            "=" | "==" | "EQ" => Ok(LogicalOperator::Eq),
            "!=" | "NEQ" => Ok(LogicalOperator::Neq),
            _ => Err(format!("Invalid logical operator: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    #[serde(rename = "SINGLE-VALUE")]
    SingleValue,
    #[serde(rename = "AVERAGE-VALUE")]
    AverageValue,
}

impl std::fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationMode::SingleValue => write!(f, "SINGLE-VALUE"),
            EvaluationMode::AverageValue => write!(f, "AVERAGE-VALUE"),
        }
    }
}

impl std::str::FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('_', "-").as_str() {
            "SINGLE-VALUE" => Ok(EvaluationMode::SingleValue),
            "AVERAGE-VALUE" => Ok(EvaluationMode::AverageValue),
            _ => Err(format!("Invalid evaluation mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadiusUnit {
    #[serde(rename = "KM")]
    Km,
    #[default]
    #[serde(rename = "M")]
    M,
}

impl RadiusUnit {
    /// Unit name understood by the `within-units` query parameter.
    pub fn query_value(&self) -> &'static str {
        match self {
            RadiusUnit::Km => "km",
            RadiusUnit::M => "m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRadiusArea {
    pub lat: f64,
    pub long: f64,
    pub radius: f64,
    #[serde(default)]
    pub radius_unit: RadiusUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificArea {
    pub area_id: i64,
}

/// Where a rule looks. Only point-radius areas can be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AreaDefinition {
    #[serde(rename = "POINT-RADIUS-AREA")]
    PointRadius(PointRadiusArea),
    #[serde(rename = "SPECIFIC-AREA")]
    Specific(SpecificArea),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    #[serde(rename = "HOUR")]
    Hour,
    #[serde(rename = "DAY")]
    Day,
}

/// Forward-looking window starting at the moment of evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowDefinition {
    #[serde(default)]
    pub time_unit: TimeUnit,
    pub value: u32,
}

impl TimeWindowDefinition {
    pub fn hours(value: u32) -> Self {
        Self { time_unit: TimeUnit::Hour, value }
    }

    pub fn days(value: u32) -> Self {
        Self { time_unit: TimeUnit::Day, value }
    }

    pub fn duration(&self) -> Duration {
        match self.time_unit {
            TimeUnit::Hour => Duration::hours(i64::from(self.value)),
            TimeUnit::Day => Duration::days(i64::from(self.value)),
        }
    }

    pub fn interval_from(&self, now: DateTime<Utc>) -> TimeInterval {
        TimeInterval::new(now, now + self.duration())
    }
}

/// Closed interval `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant <= self.to
    }

    /// Whole hours covered by the interval; zero for inverted intervals.
    pub fn whole_hours(&self) -> u32 {
        let seconds = (self.to - self.from).num_seconds().max(0);
        u32::try_from(seconds / 3600).unwrap_or(u32::MAX)
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {}]", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRule {
    #[serde(default = "new_rule_id")]
    pub id: String,
    pub title: String,
    pub metric: MetricType,
    pub logical_operator: LogicalOperator,
    pub evaluation_mode: EvaluationMode,
    pub threshold: f64,
    pub area_definition: AreaDefinition,
    pub time_window: TimeWindowDefinition,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub alert_definitions: Vec<AlertDefinition>,
}

fn default_active() -> bool {
    true
}

fn new_rule_id() -> String {
    Uuid::new_v4().to_string()
}

impl MonitoringRule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: String,
        metric: MetricType,
        logical_operator: LogicalOperator,
        evaluation_mode: EvaluationMode,
        threshold: f64,
        area_definition: AreaDefinition,
        time_window: TimeWindowDefinition,
    ) -> Self {
        Self {
            id: new_rule_id(),
            title,
            metric,
            logical_operator,
            evaluation_mode,
            threshold,
            area_definition,
            time_window,
            active: true,
            alert_definitions: Vec::new(),
        }
    }

    pub fn with_alert(mut self, alert: AlertDefinition) -> Self {
        self.alert_definitions.push(alert);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.threshold.is_finite() {
            return Err(format!("Rule {} has a non-finite threshold", self.id));
        }
        if self.time_window.value == 0 {
            return Err(format!("Rule {} has an empty time window", self.id));
        }
        if let AreaDefinition::PointRadius(area) = &self.area_definition {
            if !(area.radius.is_finite() && area.radius > 0.0) {
                return Err(format!("Rule {} has an invalid radius {}", self.id, area.radius));
            }
        }
        Ok(())
    }
}
