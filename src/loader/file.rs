//! Fixture-directory backend for offline runs and tests.
//!
//! Layout:
//!
//! ```text
//! <dir>/catalog.json          [MetricDescriptor]
//! <dir>/shapes.json           [ShapeInstance]
//! <dir>/data/<metric>.json    MapDataResponse or a bare [RawRecord]
//! ```

use crate::error::BackendError;
use crate::models::{DateRange, MetricDescriptor, RawRecord, ShapeInstance};
use crate::temporal::extract_date;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::backend::{CityStructureBackend, MapDataResponse, MetricsBackend};

/// Reads backend responses from JSON files.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataFile {
    Response(MapDataResponse),
    Records(Vec<RawRecord>),
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_json<T>(path: PathBuf) -> BoxFuture<'static, Result<T, BackendError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        async move {
            debug!("Reading fixture {}", path.display());
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                BackendError::Transport(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content)
                .map_err(|e| BackendError::Malformed(format!("{}: {}", path.display(), e)))
        }
        .boxed()
    }
}

/// Keep only records dated inside `range`.
fn filter_by_range(records: Vec<RawRecord>, range: Option<DateRange>) -> Vec<RawRecord> {
    match range {
        None => records,
        Some(range) => records
            .into_iter()
            .filter(|r| extract_date(r).is_some_and(|d| range.contains(d)))
            .collect(),
    }
}

impl MetricsBackend for FileBackend {
    fn list_map_eligible_metrics(
        &self,
        _city_id: &str,
    ) -> BoxFuture<'static, Result<Vec<MetricDescriptor>, BackendError>> {
        let read = Self::read_json::<Vec<MetricDescriptor>>(self.root.join("catalog.json"));
        async move {
            let metrics = read.await?;
            Ok(metrics.into_iter().filter(|m| m.is_map_eligible()).collect())
        }
        .boxed()
    }

    fn get_map_data(
        &self,
        metric_id: &str,
        range: Option<DateRange>,
    ) -> BoxFuture<'static, Result<MapDataResponse, BackendError>> {
        let path = self.root.join("data").join(format!("{}.json", metric_id));
        if !path.exists() {
            let message = format!("No map query configured for metric {}", metric_id);
            return async move { Ok(MapDataResponse::error(message)) }.boxed();
        }

        let read = Self::read_json::<DataFile>(path);
        async move {
            let response = match read.await? {
                DataFile::Response(r) => r,
                DataFile::Records(records) => MapDataResponse::success(records),
            };
            let MapDataResponse {
                status,
                records,
                error,
            } = response;
            Ok(MapDataResponse {
                status,
                records: records.map(|r| filter_by_range(r, range)),
                error,
            })
        }
        .boxed()
    }
}

impl CityStructureBackend for FileBackend {
    fn list_shape_instances(
        &self,
        _city_id: &str,
    ) -> BoxFuture<'static, Result<Vec<ShapeInstance>, BackendError>> {
        let path = self.root.join("shapes.json");
        if !path.exists() {
            return async { Ok(Vec::new()) }.boxed();
        }
        Self::read_json(path)
    }
}
