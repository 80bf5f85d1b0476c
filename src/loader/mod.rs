//! Metric data loading.
//!
//! This module provides the backend seams, the HTTP and fixture backends,
//! and the deduplicating per-metric loader.

pub mod backend;
pub mod file;
pub mod http;
pub mod state;

pub use backend::{CityStructureBackend, MapDataResponse, MetricsBackend, ResponseStatus};
pub use file::FileBackend;
pub use http::HttpBackend;
pub use state::{FetchResult, LoadHandle, LoadRequest, LoadTicket, MetricDataLoader, Settled};
