//! Session reports.
//!
//! A [`SessionReport`] is a serializable snapshot of a map session: what is
//! selected, how each dataset aggregated, the legend, and how many surface
//! operations it took to get there.

mod generator;

pub use generator::{generate_json_report, generate_markdown_report, write_report};

use crate::analysis::aggregator::densest_features;
use crate::engine::{LifecycleStats, MapSession};
use crate::models::{Bounds, DateRange, LegendEntry, LoadState};
use crate::surface::OpCounts;
use crate::temporal::dates::DATES_SUMMARY_FIELD;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// How many clusters to list per metric.
const DENSEST_LISTED: usize = 5;

/// Run context shown at the top of the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub city_id: String,
    /// Backend URL or fixture directory.
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub date_range: Option<DateRange>,
    pub selected_date: Option<NaiveDate>,
    /// Timeline days played, 0 when the run did not animate.
    pub played_days: usize,
    pub duration_seconds: f64,
}

/// One dense cluster of a metric.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub coordinates: [f64; 2],
    pub count: usize,
    pub dates: Option<String>,
}

/// Per-metric outcome.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub id: String,
    pub name: String,
    pub state: LoadState,
    pub visible: bool,
    pub color: String,
    pub records: usize,
    pub features: usize,
    pub clusters: usize,
    pub dropped: usize,
    pub bounds: Option<Bounds>,
    pub densest: Vec<ClusterSummary>,
}

/// Per-shape outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ShapeSummary {
    pub id: String,
    pub label: String,
    pub category: String,
    pub color: String,
    pub enabled: bool,
    pub visible: bool,
}

/// Complete report of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub metadata: ReportMetadata,
    pub legend: Vec<LegendEntry>,
    pub metrics: Vec<MetricSummary>,
    pub shapes: Vec<ShapeSummary>,
    pub surface: OpCounts,
    pub lifecycle: LifecycleStats,
}

impl SessionReport {
    /// Snapshot `session` as it stands.
    pub fn build(session: &MapSession, surface: OpCounts, metadata: ReportMetadata) -> Self {
        let metrics = session
            .selected()
            .iter()
            .map(|id| metric_summary(session, id))
            .collect();

        let shapes = session
            .shapes()
            .iter()
            .map(|shape| {
                let id = &shape.instance.id;
                let enabled = session.is_shape_enabled(id);
                ShapeSummary {
                    id: id.clone(),
                    label: shape.instance.label.clone(),
                    category: shape.instance.category.to_string(),
                    color: session.palette_color(shape.color_index).to_string(),
                    enabled,
                    visible: enabled && !session.is_shape_hidden(id),
                }
            })
            .collect();

        Self {
            metadata,
            legend: session.legend(),
            metrics,
            shapes,
            surface,
            lifecycle: session.lifecycle_stats(),
        }
    }

    /// Total records over all loaded metrics.
    pub fn total_records(&self) -> usize {
        self.metrics.iter().map(|m| m.records).sum()
    }
}

fn metric_summary(session: &MapSession, id: &str) -> MetricSummary {
    let name = session
        .metric(id)
        .map(|m| m.name.clone())
        .unwrap_or_else(|| id.to_string());
    let color = session
        .palette_color(session.metric_color_index(id))
        .to_string();

    let mut summary = MetricSummary {
        id: id.to_string(),
        name,
        state: session.load_state(id),
        visible: !session.is_metric_hidden(id),
        color,
        records: 0,
        features: 0,
        clusters: 0,
        dropped: 0,
        bounds: None,
        densest: Vec::new(),
    };

    if let Some(dataset) = session.dataset(id) {
        let set = &dataset.features;
        summary.records = set.record_count();
        summary.features = set.features.len();
        summary.clusters = set.features.iter().filter(|f| f.is_aggregated).count();
        summary.dropped = set.dropped;
        summary.bounds = set.bounds;
        summary.densest = densest_features(set, DENSEST_LISTED)
            .into_iter()
            .map(|f| ClusterSummary {
                coordinates: f.coordinates,
                count: f.count,
                dates: f
                    .properties
                    .get(DATES_SUMMARY_FIELD)
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            })
            .collect();
    }

    summary
}
