// CoverageJSON envelope decoding and reshaping

use chrono::{DateTime, NaiveDateTime, Utc};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{MonitoringError, Result};
use crate::model::TimeInterval;

const SINGLE_COVERAGE: &str = "Coverage";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    domain: Option<Domain>,
    #[serde(default)]
    ranges: HashMap<String, NdArrayRange>,
}

#[derive(Debug, Deserialize)]
struct Domain {
    #[serde(default)]
    axes: HashMap<String, DomainAxis>,
}

#[derive(Debug, Deserialize)]
struct DomainAxis {
    #[serde(default)]
    values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct NdArrayRange {
    #[serde(default)]
    values: Vec<Option<f64>>,
    #[serde(default)]
    shape: Vec<usize>,
}

/// A decoded single-coverage response.
#[derive(Debug)]
pub struct Coverage {
    envelope: Envelope,
}

impl Coverage {
    /// Decode a raw payload, rejecting anything but the single-coverage form.
    pub fn from_value(payload: Value) -> Result<Self> {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if kind != SINGLE_COVERAGE {
            return Err(MonitoringError::UnsupportedFormat(format!(
                "Received coverage type '{}'",
                kind
            )));
        }

        let envelope: Envelope = serde_json::from_value(payload)
            .map_err(|e| MonitoringError::RemoteError(format!("Malformed coverage: {}", e)))?;
        Ok(Self { envelope })
    }

    /// Values of `parameter` reshaped so that axis 0 is time.
    ///
    /// Missing samples (`null`) become NaN.
    pub fn parameter_array(&self, parameter: &str) -> Result<ArrayD<f64>> {
        let range = self.envelope.ranges.get(parameter).ok_or_else(|| {
            MonitoringError::RemoteError(format!("Coverage has no range for '{}'", parameter))
        })?;

        if range.values.is_empty() {
            return Err(MonitoringError::RemoteError(format!(
                "Range '{}' has no values",
                parameter
            )));
        }

        let shape = if range.shape.is_empty() {
            vec![range.values.len()]
        } else {
            range.shape.clone()
        };

        let values: Vec<f64> = range
            .values
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();

        ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|e| {
            MonitoringError::RemoteError(format!(
                "Range '{}' does not fit shape {:?}: {}",
                parameter, shape, e
            ))
        })
    }

    /// Timestamps of the `t` axis, in order.
    pub fn time_axis(&self) -> Result<Vec<DateTime<Utc>>> {
        let axis = self
            .envelope
            .domain
            .as_ref()
            .and_then(|domain| domain.axes.get("t"))
            .ok_or_else(|| MonitoringError::RemoteError("Coverage has no time axis".to_string()))?;

        axis.values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .and_then(parse_timestamp)
                    .ok_or_else(|| {
                        MonitoringError::RemoteError(format!("Invalid time axis value {}", value))
                    })
            })
            .collect()
    }

    /// Keep only the timesteps inside `interval` (inclusive on both ends).
    pub fn filter_to_interval(
        &self,
        data: ArrayD<f64>,
        interval: &TimeInterval,
    ) -> Result<ArrayD<f64>> {
        let times = self.time_axis()?;
        let steps = data.shape().first().copied().unwrap_or(0);
        if times.len() != steps {
            return Err(MonitoringError::RemoteError(format!(
                "Time axis has {} values but data has {} timesteps",
                times.len(),
                steps
            )));
        }

        let selected: Vec<usize> = times
            .iter()
            .enumerate()
            .filter(|(_, t)| interval.contains(**t))
            .map(|(i, _)| i)
            .collect();

        if selected.is_empty() {
            return Err(MonitoringError::NoData(format!(
                "No data for time interval {}",
                interval
            )));
        }

        Ok(data.select(Axis(0), &selected))
    }
}

/// Accepts RFC 3339 as well as the minute-precision `2024-01-01T00:00Z` form.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    let trimmed = value.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn three_step_coverage() -> Coverage {
        Coverage::from_value(json!({
            "type": "Coverage",
            "domain": {"axes": {"t": {"values": [
                "2024-01-01T00:00Z", "2024-01-01T02:00Z", "2024-01-01T04:00Z"
            ]}}},
            "ranges": {"temperature": {
                "values": [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                "shape": [3, 2]
            }}
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-01-01T02:00Z"), Some(at(2)));
        assert_eq!(parse_timestamp("2024-01-01T02:00:00Z"), Some(at(2)));
        assert_eq!(parse_timestamp("2024-01-01T03:00:00+01:00"), Some(at(2)));
        assert_eq!(parse_timestamp("2024-01-01T02:00:00"), Some(at(2)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_rejects_coverage_collection() {
        let result = Coverage::from_value(json!({"type": "CoverageCollection", "coverages": []}));
        assert!(matches!(result, Err(MonitoringError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_reshapes_time_first() {
        let data = three_step_coverage().parameter_array("temperature").unwrap();
        assert_eq!(data.shape(), &[3, 2]);
        assert_eq!(data[[1, 0]], 3.0);
    }

    #[test]
    fn test_missing_shape_is_flat() {
        let coverage = Coverage::from_value(json!({
            "type": "Coverage",
            "ranges": {"p": {"values": [1.0, null, 3.0]}}
        }))
        .unwrap();
        let data = coverage.parameter_array("p").unwrap();
        assert_eq!(data.shape(), &[3]);
        assert!(data[[1]].is_nan());
    }

    #[test]
    fn test_empty_values_are_malformed() {
        let coverage = Coverage::from_value(json!({
            "type": "Coverage",
            "ranges": {"p": {"values": [], "shape": [0]}}
        }))
        .unwrap();
        assert!(matches!(
            coverage.parameter_array("p"),
            Err(MonitoringError::RemoteError(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_is_malformed() {
        let coverage = Coverage::from_value(json!({
            "type": "Coverage",
            "ranges": {"p": {"values": [1.0, 2.0, 3.0], "shape": [2, 2]}}
        }))
        .unwrap();
        assert!(matches!(
            coverage.parameter_array("p"),
            Err(MonitoringError::RemoteError(_))
        ));
    }

    #[test]
    fn test_missing_parameter_is_malformed() {
        let coverage = three_step_coverage();
        assert!(matches!(
            coverage.parameter_array("humidity"),
            Err(MonitoringError::RemoteError(_))
        ));
    }

    #[test]
    fn test_filter_keeps_only_matching_slice() {
        let coverage = three_step_coverage();
        let data = coverage.parameter_array("temperature").unwrap();
        let filtered = coverage
            .filter_to_interval(data, &TimeInterval::new(at(1), at(3)))
            .unwrap();

        assert_eq!(filtered.shape(), &[1, 2]);
        assert_eq!(filtered.iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_filter_is_inclusive() {
        let coverage = three_step_coverage();
        let data = coverage.parameter_array("temperature").unwrap();
        let filtered = coverage
            .filter_to_interval(data, &TimeInterval::new(at(0), at(4)))
            .unwrap();
        assert_eq!(filtered.shape(), &[3, 2]);
    }

    #[test]
    fn test_filter_outside_all_timesteps_is_no_data() {
        let coverage = three_step_coverage();
        let data = coverage.parameter_array("temperature").unwrap();
        let result = coverage.filter_to_interval(data, &TimeInterval::new(at(5), at(6)));
        assert!(matches!(result, Err(MonitoringError::NoData(_))));
    }

    #[test]
    fn test_filter_rejects_misaligned_time_axis() {
        let coverage = Coverage::from_value(json!({
            "type": "Coverage",
            "domain": {"axes": {"t": {"values": ["2024-01-01T00:00Z"]}}},
            "ranges": {"p": {"values": [1.0, 2.0], "shape": [2]}}
        }))
        .unwrap();
        let data = coverage.parameter_array("p").unwrap();
        let result = coverage.filter_to_interval(data, &TimeInterval::new(at(0), at(6)));
        assert!(matches!(result, Err(MonitoringError::RemoteError(_))));
    }
}
