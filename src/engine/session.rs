//! Map session: the event-driven façade the host talks to.
//!
//! A session owns the loader, the aggregated datasets, the timeline and the
//! layer lifecycle manager. Host events (select, hide, scrub, tick, toggle
//! a shape) update in-memory state; [`MapSession::refresh`] then hands the
//! desired layer list to the manager.

use crate::analysis::PointAggregator;
use crate::color::ColorAssigner;
use crate::config::{Config, RenderConfig};
use crate::models::{
    DateRange, FeatureSet, LayerEntry, LayerKind, LegendEntry, LoadState, MetricDescriptor,
    ShapeInstance,
};
use crate::loader::{FetchResult, LoadHandle, LoadTicket, MetricDataLoader, MetricsBackend, Settled};
use crate::shapes::{ResolvedShape, ShapeLayerResolver};
use crate::surface::RenderingSurface;
use crate::temporal::{AnimationCursor, FadeWindow, TimelineState};
use chrono::NaiveDate;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::lifecycle::{DesiredLayer, LayerLifecycleManager, LifecycleStats, ReconcileReport};
use super::paint::{metric_paint, shape_paint, MetricStyleInput};

/// Aggregated data of one loaded metric.
#[derive(Debug, Clone)]
pub struct MetricDataset {
    pub features: Arc<FeatureSet>,
    pub geojson: Arc<Value>,
    pub version: u64,
}

pub struct MapSession {
    loader: MetricDataLoader,
    aggregator: PointAggregator,
    colors: ColorAssigner,
    window: FadeWindow,
    render: RenderConfig,
    stale_desaturation: f64,
    catalog: HashMap<String, MetricDescriptor>,
    selected: Vec<String>,
    hidden: HashSet<String>,
    datasets: HashMap<String, MetricDataset>,
    next_version: u64,
    timeline: TimelineState,
    cursor: AnimationCursor,
    resolver: ShapeLayerResolver,
    shapes: Vec<ResolvedShape>,
    shapes_version: u64,
    enabled_shapes: HashSet<String>,
    hidden_shapes: HashSet<String>,
    manager: LayerLifecycleManager,
}

impl MapSession {
    pub fn new(config: &Config, backend: Arc<dyn MetricsBackend>) -> Self {
        let colors = ColorAssigner::new((&config.palette).into());
        Self {
            loader: MetricDataLoader::new(backend),
            aggregator: PointAggregator::new(&config.aggregation),
            resolver: ShapeLayerResolver::new(colors.clone()),
            colors,
            window: FadeWindow::from(&config.timeline),
            render: config.render.clone(),
            stale_desaturation: config.palette.stale_desaturation,
            catalog: HashMap::new(),
            selected: Vec::new(),
            hidden: HashSet::new(),
            datasets: HashMap::new(),
            next_version: 1,
            timeline: TimelineState::default(),
            cursor: AnimationCursor::default(),
            shapes: Vec::new(),
            shapes_version: 0,
            enabled_shapes: HashSet::new(),
            hidden_shapes: HashSet::new(),
            manager: LayerLifecycleManager::new(config.render.fit_padding),
        }
    }

    // ---- metrics ----

    /// Replace the known metric catalog. Ineligible metrics are ignored.
    pub fn set_catalog(&mut self, metrics: Vec<MetricDescriptor>) {
        self.catalog = metrics
            .into_iter()
            .filter(MetricDescriptor::is_map_eligible)
            .map(|m| (m.id.clone(), m))
            .collect();
    }

    pub fn metric(&self, metric_id: &str) -> Option<&MetricDescriptor> {
        self.catalog.get(metric_id)
    }

    /// Selected metric ids in selection order.
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn is_selected(&self, metric_id: &str) -> bool {
        self.selected.iter().any(|id| id == metric_id)
    }

    /// Select a metric and start loading it. Returns the load to await, if
    /// a backend call is outstanding.
    pub fn select_metric(&mut self, metric_id: &str) -> Option<LoadHandle> {
        if !self.is_selected(metric_id) {
            info!("Selected metric {}", metric_id);
            self.selected.push(metric_id.to_string());
        }
        self.hidden.remove(metric_id);
        let range = self.loader.date_range();
        self.loader.load(metric_id, range).handle()
    }

    /// Deselect a metric, forgetting its data and any outstanding load.
    pub fn deselect_metric(&mut self, metric_id: &str) {
        if !self.is_selected(metric_id) {
            return;
        }
        info!("Deselected metric {}", metric_id);
        self.selected.retain(|id| id != metric_id);
        self.hidden.remove(metric_id);
        self.datasets.remove(metric_id);
        self.loader.deselect(metric_id);
    }

    /// Hide or show a selected metric without dropping its data.
    pub fn set_metric_hidden(&mut self, metric_id: &str, hidden: bool) {
        if !self.is_selected(metric_id) {
            return;
        }
        if hidden {
            self.hidden.insert(metric_id.to_string());
        } else {
            self.hidden.remove(metric_id);
        }
    }

    pub fn is_metric_hidden(&self, metric_id: &str) -> bool {
        self.hidden.contains(metric_id)
    }

    pub fn load_state(&self, metric_id: &str) -> LoadState {
        self.loader.state(metric_id)
    }

    pub fn dataset(&self, metric_id: &str) -> Option<&MetricDataset> {
        self.datasets.get(metric_id)
    }

    /// Apply a finished load. Stale responses change nothing.
    pub fn complete_load(&mut self, ticket: &LoadTicket, result: &FetchResult) -> Settled {
        let settled = self.loader.settle(ticket, result.as_ref());
        if settled != Settled::Loaded {
            return settled;
        }

        if let Ok(records) = result.as_ref() {
            let features = self.aggregator.aggregate(&ticket.metric_id, records);
            info!(
                "Metric {}: {} records -> {} features ({} dropped)",
                ticket.metric_id,
                records.len(),
                features.features.len(),
                features.dropped
            );
            let version = self.next_version;
            self.next_version += 1;
            self.datasets.insert(
                ticket.metric_id.clone(),
                MetricDataset {
                    geojson: Arc::new(features.to_geojson()),
                    features: Arc::new(features),
                    version,
                },
            );
        }
        settled
    }

    /// Await every handle and apply the results in order.
    pub async fn complete_all(&mut self, handles: Vec<LoadHandle>) -> Vec<Settled> {
        let results = join_all(handles.into_iter().map(LoadHandle::wait)).await;
        results
            .iter()
            .map(|(ticket, result)| self.complete_load(ticket, result))
            .collect()
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.loader.date_range()
    }

    /// Change the query range. Every selected metric is reloaded; the
    /// returned handles are the new requests.
    pub fn set_date_range(&mut self, range: Option<DateRange>) -> Vec<LoadHandle> {
        if !self.loader.set_date_range(range) {
            return Vec::new();
        }
        self.datasets.clear();
        let selected = self.selected.clone();
        selected
            .iter()
            .filter_map(|id| self.loader.load(id, range).handle())
            .collect()
    }

    // ---- timeline ----

    pub fn timeline(&self) -> TimelineState {
        self.timeline
    }

    /// Commit new scrubber state. Leaving playback clears the cursor; moving
    /// the scrubber during playback moves the cursor with it.
    pub fn set_timeline(&mut self, state: TimelineState) {
        if !state.is_playing {
            self.cursor.clear();
        } else if state.selected_date != self.timeline.selected_date {
            match state.selected_date {
                Some(date) => self.cursor.advance(date),
                None => self.cursor.clear(),
            }
        }
        self.timeline = state;
    }

    /// Advance the animation to `date` and restyle.
    pub fn tick(&mut self, date: NaiveDate, surface: &mut dyn RenderingSurface) -> ReconcileReport {
        self.cursor.advance(date);
        debug!("Tick {}", date);
        self.refresh(surface)
    }

    /// Date styling currently uses.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.timeline.effective_date(&self.cursor)
    }

    // ---- shapes ----

    /// Replace the known shape instances. Enabled and hidden flags of
    /// instances that still exist are kept.
    pub fn set_shapes(&mut self, instances: Vec<ShapeInstance>) {
        self.shapes = self.resolver.resolve(&instances);
        self.shapes_version = self.next_version;
        self.next_version += 1;
        let known: HashSet<String> = instances.into_iter().map(|s| s.id).collect();
        self.enabled_shapes.retain(|id| known.contains(id));
        self.hidden_shapes.retain(|id| known.contains(id));
    }

    pub fn shapes(&self) -> &[ResolvedShape] {
        &self.shapes
    }

    /// Flip a shape layer on or off. Returns whether it is now enabled.
    pub fn toggle_shape(&mut self, shape_id: &str) -> bool {
        if !self.shapes.iter().any(|s| s.instance.id == shape_id) {
            return false;
        }
        if self.enabled_shapes.remove(shape_id) {
            self.hidden_shapes.remove(shape_id);
            false
        } else {
            self.enabled_shapes.insert(shape_id.to_string());
            true
        }
    }

    pub fn is_shape_enabled(&self, shape_id: &str) -> bool {
        self.enabled_shapes.contains(shape_id)
    }

    pub fn is_shape_hidden(&self, shape_id: &str) -> bool {
        self.hidden_shapes.contains(shape_id)
    }

    pub fn set_shape_hidden(&mut self, shape_id: &str, hidden: bool) {
        if !self.enabled_shapes.contains(shape_id) {
            return;
        }
        if hidden {
            self.hidden_shapes.insert(shape_id.to_string());
        } else {
            self.hidden_shapes.remove(shape_id);
        }
    }

    // ---- rendering ----

    /// Palette index of a metric; depends on nothing but its id.
    pub fn metric_color_index(&self, metric_id: &str) -> usize {
        self.colors.color_index_of(metric_id)
    }

    pub fn palette_color(&self, index: usize) -> &str {
        self.colors.palette().color(index)
    }

    /// Layers in draw order: enabled shapes, then loaded metrics.
    pub fn desired_layers(&self) -> Vec<DesiredLayer> {
        let palette = self.colors.palette();
        let mut layers = Vec::new();

        for shape in &self.shapes {
            let id = &shape.instance.id;
            if !self.enabled_shapes.contains(id) {
                continue;
            }
            let color = palette.color(shape.color_index);
            layers.push(DesiredLayer {
                unique_id: LayerKind::Shape.layer_id(id),
                kind: LayerKind::Shape,
                color_index: shape.color_index,
                visible: !self.hidden_shapes.contains(id),
                data: shape.data.clone(),
                data_version: self.shapes_version,
                paint: shape_paint(color, &self.render),
                bounds: shape.bounds,
            });
        }

        let date = self.effective_date();
        for metric_id in &self.selected {
            let Some(dataset) = self.datasets.get(metric_id) else {
                continue;
            };
            let color_index = self.metric_color_index(metric_id);
            let input = MetricStyleInput {
                color: palette.color(color_index),
                window: &self.window,
                date,
                is_playing: self.timeline.is_playing,
                stale_desaturation: self.stale_desaturation,
            };
            layers.push(DesiredLayer {
                unique_id: LayerKind::Metric.layer_id(metric_id),
                kind: LayerKind::Metric,
                color_index,
                visible: !self.hidden.contains(metric_id),
                data: dataset.geojson.clone(),
                data_version: dataset.version,
                paint: metric_paint(&dataset.features, input, &self.render),
                bounds: dataset.features.bounds,
            });
        }

        layers
    }

    /// Push the current state to the surface.
    pub fn refresh(&mut self, surface: &mut dyn RenderingSurface) -> ReconcileReport {
        let desired = self.desired_layers();
        self.manager.reconcile(&desired, surface)
    }

    /// One entry per selected metric and enabled shape, in draw order.
    pub fn layer_entries(&self) -> Vec<LayerEntry> {
        let shapes = self
            .shapes
            .iter()
            .filter(|s| self.enabled_shapes.contains(&s.instance.id))
            .map(|s| LayerEntry {
                unique_id: LayerKind::Shape.layer_id(&s.instance.id),
                kind: LayerKind::Shape,
                color_index: s.color_index,
                visible: !self.hidden_shapes.contains(&s.instance.id),
                source_features: None,
            });
        let metrics = self.selected.iter().map(|id| LayerEntry {
            unique_id: LayerKind::Metric.layer_id(id),
            kind: LayerKind::Metric,
            color_index: self.metric_color_index(id),
            visible: !self.hidden.contains(id),
            source_features: self.datasets.get(id).map(|d| d.features.clone()),
        });
        shapes.chain(metrics).collect()
    }

    /// Legend rows for every visible layer.
    pub fn legend(&self) -> Vec<LegendEntry> {
        let palette = self.colors.palette();
        let shapes = self
            .shapes
            .iter()
            .filter(|s| {
                self.enabled_shapes.contains(&s.instance.id)
                    && !self.hidden_shapes.contains(&s.instance.id)
            })
            .map(|s| LegendEntry {
                unique_id: LayerKind::Shape.layer_id(&s.instance.id),
                label: s.instance.label.clone(),
                kind: LayerKind::Shape,
                color: palette.color(s.color_index).to_string(),
                feature_count: 0,
            });
        let metrics = self
            .selected
            .iter()
            .filter(|id| !self.hidden.contains(*id))
            .map(|id| LegendEntry {
                unique_id: LayerKind::Metric.layer_id(id),
                label: self
                    .catalog
                    .get(id)
                    .map(|m| m.name.clone())
                    .unwrap_or_else(|| id.clone()),
                kind: LayerKind::Metric,
                color: palette.color(self.metric_color_index(id)).to_string(),
                feature_count: self
                    .datasets
                    .get(id)
                    .map(|d| d.features.features.len())
                    .unwrap_or(0),
            });
        shapes.chain(metrics).collect()
    }

    pub fn lifecycle_stats(&self) -> LifecycleStats {
        self.manager.stats()
    }
}
