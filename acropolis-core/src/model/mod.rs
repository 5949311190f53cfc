// Rule, trigger and run data model

pub mod alerts;
pub mod rules;
pub mod runs;

pub use alerts::{AlertDefinition, AlertTrigger, AlertType};
pub use rules::{
    AreaDefinition, EvaluationMode, LogicalOperator, MetricType, MonitoringRule,
    PointRadiusArea, RadiusUnit, SpecificArea, TimeInterval, TimeUnit, TimeWindowDefinition,
};
pub use runs::MonitoringRun;
