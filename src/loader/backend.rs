//! Backend seams consumed by the engine.
//!
//! Backends return `'static` boxed futures so in-flight requests can be
//! shared between callers and outlive the borrow that issued them.

use crate::error::BackendError;
use crate::models::{DateRange, MetricDescriptor, RawRecord, ShapeInstance};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Status field of a map-data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Body of a `getMapData` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapDataResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub records: Option<Vec<RawRecord>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Phrases backends use when a metric has no map query configured.
const NO_QUERY_MARKERS: &[&str] = &[
    "no map query",
    "no query configured",
    "map query not configured",
    "no_map_query",
];

impl MapDataResponse {
    pub fn success(records: Vec<RawRecord>) -> Self {
        Self {
            status: ResponseStatus::Success,
            records: Some(records),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            records: None,
            error: Some(message.into()),
        }
    }

    /// Classify the response into records or a typed error.
    pub fn into_records(self, metric_id: &str) -> Result<Vec<RawRecord>, BackendError> {
        match self.status {
            ResponseStatus::Success => Ok(self.records.unwrap_or_default()),
            ResponseStatus::Error => {
                let message = self.error.unwrap_or_else(|| "unknown error".to_string());
                let lowered = message.to_lowercase();
                if NO_QUERY_MARKERS.iter().any(|m| lowered.contains(m)) {
                    Err(BackendError::NoMapQuery(metric_id.to_string()))
                } else {
                    Err(BackendError::Backend(message))
                }
            }
        }
    }
}

/// The metrics backend.
pub trait MetricsBackend: Send + Sync {
    /// Metrics of a city that can be drawn on the map.
    fn list_map_eligible_metrics(
        &self,
        city_id: &str,
    ) -> BoxFuture<'static, Result<Vec<MetricDescriptor>, BackendError>>;

    /// Location records of one metric, optionally limited to a date range.
    fn get_map_data(
        &self,
        metric_id: &str,
        range: Option<DateRange>,
    ) -> BoxFuture<'static, Result<MapDataResponse, BackendError>>;
}

/// The city-structure backend providing static shape layers.
pub trait CityStructureBackend: Send + Sync {
    fn list_shape_instances(
        &self,
        city_id: &str,
    ) -> BoxFuture<'static, Result<Vec<ShapeInstance>, BackendError>>;
}
