//! Metric data providers.
//!
//! Each provider translates a rule's abstract metric into the remote
//! parameter(s) and collection(s) the weather service understands and
//! applies any metric-specific derivation on the way back. The set of
//! metrics is closed, so providers are an enum rather than trait objects.

use ndarray::{ArrayD, Zip};
use tracing::debug;

use crate::config::ParameterSection;
use crate::error::{MonitoringError, Result};
use crate::model::{MetricType, PointRadiusArea, TimeInterval};
use crate::weather::{GeoPoint, QueryType, SeriesRequest, SeriesSource};

const KELVIN_OFFSET: f64 = 273.15;

/// Longest accumulation window the service reports.
pub const MAX_ACCUMULATION_HOURS: u32 = 6;

/// `(parameter, collection)` per accumulation window, indexed by hours.
const PRECIPITATION_BUCKETS: [(&str, &str); 7] = [
    ("total-precipitation_gnd-surf_stat:acc/PT0S", "single-layer_2"),
    ("total-precipitation_gnd-surf_stat:acc/PT1H", "single-layer_3"),
    ("total-precipitation_gnd-surf_stat:acc/PT2H", "single-layer_4"),
    ("total-precipitation_gnd-surf_stat:acc/PT3H", "single-layer_5"),
    ("total-precipitation_gnd-surf_stat:acc/PT4H", "single-layer_6"),
    ("total-precipitation_gnd-surf_stat:acc/PT5H", "single-layer_7"),
    ("total-precipitation_gnd-surf_stat:acc/PT6H", "single-layer_8"),
];

#[derive(Debug, Clone)]
pub struct TemperatureProvider {
    pub parameter: String,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct RelativeHumidityProvider {
    pub parameter: String,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct WindSpeedProvider {
    pub u_parameter: String,
    pub v_parameter: String,
    pub collection: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrecipitationProvider;

#[derive(Debug, Clone)]
pub enum MetricDataProvider {
    Temperature(TemperatureProvider),
    RelativeHumidity(RelativeHumidityProvider),
    WindSpeed(WindSpeedProvider),
    Precipitation(PrecipitationProvider),
}

fn radius_request(
    area: &PointRadiusArea,
    parameter: &str,
    collection: &str,
    window: &TimeInterval,
) -> SeriesRequest {
    SeriesRequest::new(GeoPoint::new(area.lat, area.long), parameter, collection)
        .query_type(QueryType::Radius)
        .param("within", area.radius)
        .param("within-units", area.radius_unit.query_value())
        .interval(*window)
}

impl MetricDataProvider {
    pub async fn fetch(
        &self,
        source: &dyn SeriesSource,
        area: &PointRadiusArea,
        window: &TimeInterval,
    ) -> Result<ArrayD<f64>> {
        match self {
            MetricDataProvider::Temperature(p) => {
                let request = radius_request(area, &p.parameter, &p.collection, window);
                let kelvin = source.fetch_series(&request).await?;
                Ok(kelvin_to_celsius(kelvin))
            }
            MetricDataProvider::RelativeHumidity(p) => {
                let request = radius_request(area, &p.parameter, &p.collection, window);
                source.fetch_series(&request).await
            }
            MetricDataProvider::WindSpeed(p) => {
                let u_request = radius_request(area, &p.u_parameter, &p.collection, window);
                let v_request = radius_request(area, &p.v_parameter, &p.collection, window);
                let (u, v) = futures::try_join!(
                    source.fetch_series(&u_request),
                    source.fetch_series(&v_request)
                )?;
                wind_speed(&u, &v)
            }
            MetricDataProvider::Precipitation(_) => {
                let (parameter, collection) = precipitation_bucket(window);
                debug!(parameter, collection, "Selected precipitation accumulation bucket");
                let request = radius_request(area, parameter, collection, window);
                source.fetch_series(&request).await
            }
        }
    }
}

pub fn kelvin_to_celsius(kelvin: ArrayD<f64>) -> ArrayD<f64> {
    kelvin.mapv(|k| k - KELVIN_OFFSET)
}

/// Element-wise `sqrt(u² + v²)`; both components must share a shape.
pub fn wind_speed(u: &ArrayD<f64>, v: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    if u.shape() != v.shape() {
        return Err(MonitoringError::ShapeMismatch {
            left: u.shape().to_vec(),
            right: v.shape().to_vec(),
        });
    }
    Ok(Zip::from(u).and(v).map_collect(|&a, &b| a.hypot(b)))
}

/// Largest available accumulation window not exceeding the requested one.
///
/// Windows longer than six hours still use the six-hour bucket.
pub fn accumulation_hours(window: &TimeInterval) -> u32 {
    window.whole_hours().min(MAX_ACCUMULATION_HOURS)
}

pub fn precipitation_bucket(window: &TimeInterval) -> (&'static str, &'static str) {
    PRECIPITATION_BUCKETS[accumulation_hours(window) as usize]
}

/// Maps each metric to the provider that serves it.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    temperature: MetricDataProvider,
    relative_humidity: MetricDataProvider,
    wind_speed: MetricDataProvider,
    precipitation: MetricDataProvider,
}

impl ProviderRegistry {
    pub fn from_config(parameters: &ParameterSection) -> Self {
        Self {
            temperature: MetricDataProvider::Temperature(TemperatureProvider {
                parameter: parameters.temperature.clone(),
                collection: parameters.collection.clone(),
            }),
            relative_humidity: MetricDataProvider::RelativeHumidity(RelativeHumidityProvider {
                parameter: parameters.relative_humidity.clone(),
                collection: parameters.collection.clone(),
            }),
            wind_speed: MetricDataProvider::WindSpeed(WindSpeedProvider {
                u_parameter: parameters.wind_u.clone(),
                v_parameter: parameters.wind_v.clone(),
                collection: parameters.collection.clone(),
            }),
            precipitation: MetricDataProvider::Precipitation(PrecipitationProvider),
        }
    }

    pub fn for_metric(&self, metric: MetricType) -> Result<&MetricDataProvider> {
        match metric {
            MetricType::Temperature => Ok(&self.temperature),
            MetricType::RelativeHumidity => Ok(&self.relative_humidity),
            MetricType::WindSpeed => Ok(&self.wind_speed),
            MetricType::Precipitation => Ok(&self.precipitation),
            MetricType::Pressure | MetricType::SnowDepth | MetricType::SnowCover => {
                Err(MonitoringError::UnsupportedMetric(metric.to_string()))
            }
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::from_config(&ParameterSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RadiusUnit;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use ndarray::{arr1, arr2, IxDyn};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned arrays by parameter name and records every request.
    #[derive(Default)]
    struct StubSource {
        series: HashMap<String, ArrayD<f64>>,
        requests: Mutex<Vec<SeriesRequest>>,
    }

    impl StubSource {
        fn with(mut self, parameter: &str, data: ArrayD<f64>) -> Self {
            self.series.insert(parameter.to_string(), data);
            self
        }

        fn requests(&self) -> Vec<SeriesRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SeriesSource for StubSource {
        async fn fetch_series(&self, request: &SeriesRequest) -> Result<ArrayD<f64>> {
            self.requests.lock().unwrap().push(request.clone());
            self.series
                .get(&request.parameter)
                .cloned()
                .ok_or_else(|| MonitoringError::NoData(request.parameter.clone()))
        }
    }

    fn area() -> PointRadiusArea {
        PointRadiusArea {
            lat: 48.163394,
            long: 17.12484,
            radius: 2.0,
            radius_unit: RadiusUnit::Km,
        }
    }

    fn window(hours: i64) -> TimeInterval {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeInterval::new(from, from + Duration::hours(hours))
    }

    #[test]
    fn test_accumulation_bucket_selection() {
        for hours in 0..=6 {
            assert_eq!(accumulation_hours(&window(hours)), hours as u32);
        }
        assert_eq!(accumulation_hours(&window(7)), 6);
        assert_eq!(accumulation_hours(&window(48)), 6);

        let partial = TimeInterval::new(window(0).from, window(0).from + Duration::minutes(150));
        assert_eq!(accumulation_hours(&partial), 2);

        assert_eq!(
            precipitation_bucket(&window(24)),
            ("total-precipitation_gnd-surf_stat:acc/PT6H", "single-layer_8")
        );
        assert_eq!(
            precipitation_bucket(&window(0)),
            ("total-precipitation_gnd-surf_stat:acc/PT0S", "single-layer_2")
        );
    }

    #[test]
    fn test_wind_speed_elementwise() {
        let u = arr1(&[3.0, 0.0, -6.0]).into_dyn();
        let v = arr1(&[4.0, 2.0, 8.0]).into_dyn();
        let speed = wind_speed(&u, &v).unwrap();
        assert_eq!(speed.iter().copied().collect::<Vec<_>>(), vec![5.0, 2.0, 10.0]);
    }

    #[test]
    fn test_wind_speed_shape_mismatch() {
        let u = arr2(&[[1.0, 2.0]]).into_dyn();
        let v = arr1(&[1.0, 2.0]).into_dyn();
        match wind_speed(&u, &v) {
            Err(MonitoringError::ShapeMismatch { left, right }) => {
                assert_eq!(left, vec![1, 2]);
                assert_eq!(right, vec![2]);
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_kelvin_to_celsius() {
        let celsius = kelvin_to_celsius(arr1(&[273.15, 303.15]).into_dyn());
        assert!((celsius[[0]] - 0.0).abs() < 1e-9);
        assert!((celsius[[1]] - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_metrics() {
        let registry = ProviderRegistry::default();
        assert!(registry.for_metric(MetricType::Temperature).is_ok());
        assert!(matches!(
            registry.for_metric(MetricType::Pressure),
            Err(MonitoringError::UnsupportedMetric(_))
        ));
        assert!(matches!(
            registry.for_metric(MetricType::SnowCover),
            Err(MonitoringError::UnsupportedMetric(_))
        ));
    }

    #[tokio::test]
    async fn test_temperature_provider_converts_units() {
        let source = StubSource::default().with("temperature", arr1(&[300.15]).into_dyn());
        let registry = ProviderRegistry::default();
        let provider = registry.for_metric(MetricType::Temperature).unwrap();

        let data = provider.fetch(&source, &area(), &window(3)).await.unwrap();
        assert!((data[[0]] - 27.0).abs() < 1e-9);

        let requests = source.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].collection, "height-above-ground");
        assert_eq!(requests[0].query_params["within"], "2");
        assert_eq!(requests[0].query_params["within-units"], "km");
        assert_eq!(requests[0].time_interval, Some(window(3)));
    }

    #[tokio::test]
    async fn test_humidity_provider_uses_configured_parameter() {
        let parameters = ParameterSection {
            relative_humidity: "rh-2m".to_string(),
            ..ParameterSection::default()
        };
        let source = StubSource::default().with("rh-2m", arr1(&[55.0]).into_dyn());
        let registry = ProviderRegistry::from_config(&parameters);
        let provider = registry.for_metric(MetricType::RelativeHumidity).unwrap();

        let data = provider.fetch(&source, &area(), &window(1)).await.unwrap();
        assert_eq!(data[[0]], 55.0);
    }

    #[tokio::test]
    async fn test_wind_provider_combines_components() {
        let source = StubSource::default()
            .with("u-component-of-wind", ArrayD::from_elem(IxDyn(&[2, 2]), 3.0))
            .with("v-component-of-wind", ArrayD::from_elem(IxDyn(&[2, 2]), 4.0));
        let registry = ProviderRegistry::default();
        let provider = registry.for_metric(MetricType::WindSpeed).unwrap();

        let data = provider.fetch(&source, &area(), &window(2)).await.unwrap();
        assert_eq!(data.shape(), &[2, 2]);
        assert!(data.iter().all(|&s| (s - 5.0).abs() < 1e-9));
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_wind_provider_fails_when_a_component_fails() {
        let source = StubSource::default()
            .with("u-component-of-wind", arr1(&[3.0]).into_dyn());
        let registry = ProviderRegistry::default();
        let provider = registry.for_metric(MetricType::WindSpeed).unwrap();

        let result = provider.fetch(&source, &area(), &window(2)).await;
        assert!(matches!(result, Err(MonitoringError::NoData(_))));
    }

    #[tokio::test]
    async fn test_precipitation_provider_caps_bucket() {
        let source = StubSource::default()
            .with("total-precipitation_gnd-surf_stat:acc/PT6H", arr1(&[1.5]).into_dyn());
        let registry = ProviderRegistry::default();
        let provider = registry.for_metric(MetricType::Precipitation).unwrap();

        let data = provider.fetch(&source, &area(), &window(72)).await.unwrap();
        assert_eq!(data[[0]], 1.5);
        assert_eq!(source.requests()[0].collection, "single-layer_8");
    }
}
