use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::ArrayD;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::error::{MonitoringError, Result};
use crate::model::TimeInterval;
use crate::weather::coverage::Coverage;

const COVERAGE_FORMAT: &str = "CoverageJSON";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }

    /// WKT point, longitude first
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.long, self.lat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Radius,
    Position,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Radius => "radius",
            QueryType::Position => "position",
        }
    }
}

/// One coverage request for a single parameter.
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub location: GeoPoint,
    pub parameter: String,
    pub collection: String,
    pub query_type: QueryType,
    pub query_params: BTreeMap<String, String>,
    pub datetime: Option<DateTime<Utc>>,
    pub time_interval: Option<TimeInterval>,
}

impl SeriesRequest {
    pub fn new(location: GeoPoint, parameter: &str, collection: &str) -> Self {
        Self {
            location,
            parameter: parameter.to_string(),
            collection: collection.to_string(),
            query_type: QueryType::Radius,
            query_params: BTreeMap::new(),
            datetime: None,
            time_interval: None,
        }
    }

    pub fn query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.query_params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }

    pub fn interval(mut self, interval: TimeInterval) -> Self {
        self.time_interval = Some(interval);
        self
    }

    /// Full query string parameters. Caller extras override the defaults.
    pub fn wire_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("coords".to_string(), self.location.to_wkt());
        params.insert("parameter-name".to_string(), self.parameter.clone());
        params.insert("f".to_string(), COVERAGE_FORMAT.to_string());
        if let Some(datetime) = self.datetime {
            params.insert(
                "datetime".to_string(),
                datetime.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        params.extend(self.query_params.clone());
        params
    }
}

/// Anything able to turn a [`SeriesRequest`] into a time-first array.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<ArrayD<f64>>;
}

/// Client for an OGC EDR service returning CoverageJSON.
pub struct EdrWeatherClient {
    client: Client,
    base_url: String,
    resource_name: String,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl EdrWeatherClient {
    pub fn new(base_url: &str, resource_name: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            resource_name: resource_name.to_string(),
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List `(id, title)` of the collections the service offers.
    pub async fn list_collections(&self) -> Result<Vec<(String, String)>> {
        let no_params = BTreeMap::new();
        let key = CacheKey::new(&self.resource_name, "collections", "", &no_params);
        let url = format!("{}/collections", self.base_url);
        let payload = self
            .cached_or_fetch(&key, || self.get_json(&url, &no_params))
            .await?;

        let collections = payload
            .get("collections")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                MonitoringError::RemoteError("Collections response has no 'collections'".to_string())
            })?;

        Ok(collections
            .iter()
            .filter_map(|collection| {
                let id = collection.get("id")?.as_str()?.to_string();
                let title = collection
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some((id, title))
            })
            .collect())
    }

    async fn cached_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(cache) = &self.cache {
            match cache.get(key).await {
                Ok(Some(payload)) => {
                    debug!(resource = %self.resource_name, digest = key.digest(), "Cache hit");
                    return Ok(payload);
                }
                Ok(None) => debug!(digest = key.digest(), "Cache miss"),
                Err(e) => warn!(digest = key.digest(), "Ignoring unreadable cache entry: {}", e),
            }
        }

        let payload = fetch().await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(key, &payload).await {
                error!(digest = key.digest(), "Failed to write to cache: {}", e);
            }
        }

        Ok(payload)
    }

    async fn get_json(&self, url: &str, params: &BTreeMap<String, String>) -> Result<Value> {
        info!(url, ?params, "Requesting weather data");

        let response = self.client.get(url).query(params).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Err(MonitoringError::NoData(format!("No data for {:?}", params)));
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let excerpt: String = error_text.chars().take(200).collect();
            return Err(MonitoringError::RemoteError(format!(
                "HTTP {}: {}",
                status, excerpt
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| MonitoringError::RemoteError(format!("Failed to parse response: {}", e)))?;

        if let Some(code) = body.get("code") {
            let ok = match code {
                Value::String(s) => s == "200",
                Value::Number(n) => n.as_u64() == Some(200),
                _ => false,
            };
            if !ok {
                error!(%body, "Weather service returned an error");
                return Err(MonitoringError::RemoteError(format!(
                    "Error server response: {}",
                    body
                )));
            }
        }

        Ok(body)
    }
}

#[async_trait]
impl SeriesSource for EdrWeatherClient {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<ArrayD<f64>> {
        let params = request.wire_params();
        let key = CacheKey::new(
            &self.resource_name,
            request.query_type.as_str(),
            &request.collection,
            &params,
        );
        let url = format!(
            "{}/collections/{}/{}",
            self.base_url,
            request.collection,
            request.query_type.as_str()
        );

        let payload = self
            .cached_or_fetch(&key, || self.get_json(&url, &params))
            .await?;

        let coverage = Coverage::from_value(payload)?;
        let data = coverage.parameter_array(&request.parameter)?;

        match &request.time_interval {
            Some(interval) => coverage.filter_to_interval(data, interval),
            None => Ok(data),
        }
    }
}
