// Reduction of fetched arrays to a scalar and threshold comparison

use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use tracing::debug;

use crate::error::{MonitoringError, Result};
use crate::model::{AlertTrigger, EvaluationMode, LogicalOperator, MonitoringRule};

/// Reduce `data` to the single value compared against a rule's threshold.
///
/// In single-value mode the less-than family takes the minimum and every
/// other operator the maximum, so an empty array yields `+inf` or `-inf`
/// respectively. Average mode fails on an empty array. NaN samples are
/// ignored in both modes.
pub fn reduce(data: &ArrayD<f64>, mode: EvaluationMode, operator: LogicalOperator) -> Result<f64> {
    let samples = data.iter().copied().filter(|v| !v.is_nan());

    match mode {
        EvaluationMode::SingleValue if operator.is_less_family() => {
            Ok(samples.fold(f64::INFINITY, f64::min))
        }
        EvaluationMode::SingleValue => Ok(samples.fold(f64::NEG_INFINITY, f64::max)),
        EvaluationMode::AverageValue => {
            let (sum, count) = samples.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                return Err(MonitoringError::EmptyData);
            }
            Ok(sum / count as f64)
        }
    }
}

/// Evaluate `rule` against fetched data, producing a trigger when the
/// condition holds.
pub fn evaluate(
    rule: &MonitoringRule,
    data: &ArrayD<f64>,
    now: DateTime<Utc>,
) -> Result<Option<AlertTrigger>> {
    let value = reduce(data, rule.evaluation_mode, rule.logical_operator)?;

    // Sentinel from an empty reduction; never a real observation
    if !value.is_finite() {
        debug!(rule_id = %rule.id, value, "Reduced value is not finite, skipping comparison");
        return Ok(None);
    }

    let holds = rule.logical_operator.compare(value, rule.threshold);
    debug!(
        rule_id = %rule.id,
        value,
        operator = %rule.logical_operator,
        threshold = rule.threshold,
        holds,
        "Evaluated rule"
    );

    Ok(holds.then(|| AlertTrigger::new(rule.id.clone(), rule.threshold, value, now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AreaDefinition, MetricType, PointRadiusArea, RadiusUnit, TimeWindowDefinition,
    };
    use ndarray::{arr1, arr2, ArrayD, IxDyn};

    fn rule(operator: LogicalOperator, mode: EvaluationMode, threshold: f64) -> MonitoringRule {
        MonitoringRule::new(
            "Test rule".to_string(),
            MetricType::Temperature,
            operator,
            mode,
            threshold,
            AreaDefinition::PointRadius(PointRadiusArea {
                lat: 48.16,
                long: 17.12,
                radius: 2.0,
                radius_unit: RadiusUnit::Km,
            }),
            TimeWindowDefinition::hours(6),
        )
    }

    fn empty() -> ArrayD<f64> {
        ArrayD::zeros(IxDyn(&[0]))
    }

    #[test]
    fn test_single_value_max_triggers() {
        let rule = rule(LogicalOperator::Gt, EvaluationMode::SingleValue, 30.0);
        let now = Utc::now();
        let trigger = evaluate(&rule, &arr1(&[28.0, 31.5, 29.0]).into_dyn(), now)
            .unwrap()
            .unwrap();

        assert_eq!(trigger.actual_value, 31.5);
        assert_eq!(trigger.reference_value, 30.0);
        assert_eq!(trigger.triggered_at, now);
        assert_eq!(trigger.monitoring_rule_id, rule.id);
    }

    #[test]
    fn test_single_value_below_threshold_is_clear() {
        let rule = rule(LogicalOperator::Gt, EvaluationMode::SingleValue, 30.0);
        let result = evaluate(&rule, &arr1(&[28.0, 29.0]).into_dyn(), Utc::now()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_average_triggers() {
        let rule = rule(LogicalOperator::Lte, EvaluationMode::AverageValue, 10.0);
        let trigger = evaluate(&rule, &arr1(&[5.0, 7.0, 9.0]).into_dyn(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(trigger.actual_value, 7.0);
    }

    #[test]
    fn test_less_family_takes_minimum() {
        let data = arr2(&[[-3.0, 4.0], [0.0, -7.5]]).into_dyn();
        assert_eq!(
            reduce(&data, EvaluationMode::SingleValue, LogicalOperator::Lt).unwrap(),
            -7.5
        );
        assert_eq!(
            reduce(&data, EvaluationMode::SingleValue, LogicalOperator::Gte).unwrap(),
            4.0
        );
    }

    #[test]
    fn test_empty_single_value_never_triggers() {
        for operator in [
            LogicalOperator::Lt,
            LogicalOperator::Lte,
            LogicalOperator::Gt,
            LogicalOperator::Gte,
            LogicalOperator::Eq,
            LogicalOperator::Neq,
        ] {
            let rule = rule(operator, EvaluationMode::SingleValue, 1e9);
            assert!(
                evaluate(&rule, &empty(), Utc::now()).unwrap().is_none(),
                "operator {} triggered on empty data",
                operator
            );
        }
    }

    #[test]
    fn test_empty_reduction_sentinels() {
        assert_eq!(
            reduce(&empty(), EvaluationMode::SingleValue, LogicalOperator::Lte).unwrap(),
            f64::INFINITY
        );
        assert_eq!(
            reduce(&empty(), EvaluationMode::SingleValue, LogicalOperator::Gt).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_empty_average_fails() {
        let rule = rule(LogicalOperator::Gt, EvaluationMode::AverageValue, 0.0);
        assert!(matches!(
            evaluate(&rule, &empty(), Utc::now()),
            Err(MonitoringError::EmptyData)
        ));
    }

    #[test]
    fn test_missing_samples_are_ignored() {
        let data = arr1(&[f64::NAN, 2.0, 4.0, f64::NAN]).into_dyn();
        assert_eq!(
            reduce(&data, EvaluationMode::AverageValue, LogicalOperator::Gt).unwrap(),
            3.0
        );
        assert_eq!(
            reduce(&data, EvaluationMode::SingleValue, LogicalOperator::Lt).unwrap(),
            2.0
        );

        let all_missing = arr1(&[f64::NAN, f64::NAN]).into_dyn();
        assert!(matches!(
            reduce(&all_missing, EvaluationMode::AverageValue, LogicalOperator::Gt),
            Err(MonitoringError::EmptyData)
        ));
    }

    #[test]
    fn test_equality_is_exact() {
        let rule = rule(LogicalOperator::Eq, EvaluationMode::SingleValue, 0.0);
        assert!(evaluate(&rule, &arr1(&[-2.0, 0.0]).into_dyn(), Utc::now())
            .unwrap()
            .is_some());
        assert!(evaluate(&rule, &arr1(&[-2.0, 1e-12]).into_dyn(), Utc::now())
            .unwrap()
            .is_none());
    }
}
