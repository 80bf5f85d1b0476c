//! Layer lifecycle manager.
//!
//! Keeps the rendering surface in line with the desired layer list using
//! as few calls as possible. The manager diffs against its own record of
//! what it last applied and never reads the surface back. A surface reset
//! drops that record so the next reconcile re-creates every layer.

use crate::error::SurfaceError;
use crate::models::{Bounds, LayerKind};
use crate::surface::{Paint, RenderingSurface};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A layer the host wants on the surface, in draw order.
#[derive(Debug, Clone)]
pub struct DesiredLayer {
    pub unique_id: String,
    pub kind: LayerKind,
    pub color_index: usize,
    pub visible: bool,
    pub data: Arc<Value>,
    /// Bumped whenever `data` changes.
    pub data_version: u64,
    pub paint: Paint,
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone)]
struct AppliedLayer {
    data_version: u64,
    paint: Paint,
    visible: bool,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Successful surface calls.
    pub operations: usize,
    /// Layers whose update failed, with the error.
    pub failures: Vec<(String, SurfaceError)>,
    /// Whether the viewport was fit to the visible layers.
    pub fitted: bool,
    /// Whether the pass rebuilt layers after a surface reset.
    pub rehydrated: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cumulative counters across reconcile passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub passes: usize,
    pub operations: usize,
    pub failures: usize,
    pub fits: usize,
    pub rehydrations: usize,
}

/// Sole writer of the rendering surface.
#[derive(Debug)]
pub struct LayerLifecycleManager {
    applied: HashMap<String, AppliedLayer>,
    last_visible_set: BTreeSet<String>,
    reset_flag: Arc<AtomicBool>,
    subscribed: bool,
    fit_padding: u32,
    stats: LifecycleStats,
}

impl LayerLifecycleManager {
    pub fn new(fit_padding: u32) -> Self {
        Self {
            applied: HashMap::new(),
            last_visible_set: BTreeSet::new(),
            reset_flag: Arc::new(AtomicBool::new(false)),
            subscribed: false,
            fit_padding,
            stats: LifecycleStats::default(),
        }
    }

    /// Subscribe to resets of `surface`. Called on the first reconcile if
    /// the host has not done it earlier.
    pub fn attach(&mut self, surface: &mut dyn RenderingSurface) {
        let flag = self.reset_flag.clone();
        surface.on_reset(Box::new(move || flag.store(true, Ordering::SeqCst)));
        self.subscribed = true;
    }

    /// Whether a reset is waiting to be handled.
    pub fn reset_pending(&self) -> bool {
        self.reset_flag.load(Ordering::SeqCst)
    }

    pub fn is_applied(&self, unique_id: &str) -> bool {
        self.applied.contains_key(unique_id)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }

    /// Bring the surface in line with `desired`. Never fails; problems are
    /// logged and listed in the report.
    pub fn reconcile(&mut self, desired: &[DesiredLayer], surface: &mut dyn RenderingSurface) -> ReconcileReport {
        if !self.subscribed {
            self.attach(surface);
        }

        let mut report = ReconcileReport::default();

        if self.reset_flag.swap(false, Ordering::SeqCst) {
            info!(
                "Surface was reset; re-creating {} layers",
                desired.len()
            );
            self.applied.clear();
            report.rehydrated = true;
        }

        let wanted: HashSet<&str> = desired.iter().map(|d| d.unique_id.as_str()).collect();
        let stale: Vec<String> = self
            .applied
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            match surface.remove_layer(&id) {
                Ok(()) => {
                    debug!("Removed layer {}", id);
                    report.operations += 1;
                    self.applied.remove(&id);
                }
                Err(SurfaceError::UnknownLayer(_)) => {
                    self.applied.remove(&id);
                }
                Err(e) => {
                    error!("Failed to remove layer {}: {}", id, e);
                    report.failures.push((id, e));
                }
            }
        }

        for (index, layer) in desired.iter().enumerate() {
            let before = desired[index + 1..]
                .iter()
                .map(|d| d.unique_id.as_str())
                .find(|id| self.applied.contains_key(*id));

            let existing = self.applied.get(&layer.unique_id);
            let updating = existing.is_some();
            let result = match existing {
                None => Self::create(layer, before, surface),
                Some(applied) => Self::update(layer, applied, surface),
            };

            match result {
                Ok(ops) => {
                    report.operations += ops;
                    self.applied.insert(
                        layer.unique_id.clone(),
                        AppliedLayer {
                            data_version: layer.data_version,
                            paint: layer.paint.clone(),
                            visible: layer.visible,
                        },
                    );
                }
                Err((ops, e)) => {
                    error!("Failed to apply layer {}: {}", layer.unique_id, e);
                    report.operations += ops;
                    if updating && ops > 0 {
                        // Half-updated: data and paint may disagree on fids.
                        report.operations += self.discard(&layer.unique_id, surface);
                    }
                    report.failures.push((layer.unique_id.clone(), e));
                }
            }
        }

        let visible: BTreeSet<String> = desired
            .iter()
            .filter(|d| d.visible && self.applied.contains_key(&d.unique_id))
            .map(|d| d.unique_id.clone())
            .collect();

        if visible != self.last_visible_set {
            let bounds = desired
                .iter()
                .filter(|d| visible.contains(&d.unique_id))
                .fold(None, |acc, d| Bounds::merge(acc, d.bounds));
            let committed = match bounds {
                Some(bounds) => match surface.fit_to_bounds(&bounds, self.fit_padding) {
                    Ok(()) => {
                        report.operations += 1;
                        report.fitted = true;
                        true
                    }
                    Err(e) => {
                        error!("Failed to fit bounds: {}", e);
                        report.failures.push(("viewport".to_string(), e));
                        false
                    }
                },
                None => true,
            };
            if committed {
                self.last_visible_set = visible;
            }
        }

        self.stats.passes += 1;
        self.stats.operations += report.operations;
        self.stats.failures += report.failures.len();
        self.stats.fits += usize::from(report.fitted);
        self.stats.rehydrations += usize::from(report.rehydrated);

        debug!(
            "Reconciled {} layers with {} operations ({} failures)",
            desired.len(),
            report.operations,
            report.failures.len()
        );
        report
    }

    /// Remove a layer and forget it so the next pass re-creates it whole.
    /// Returns the number of successful calls.
    fn discard(&mut self, id: &str, surface: &mut dyn RenderingSurface) -> usize {
        self.applied.remove(id);
        match surface.remove_layer(id) {
            Ok(()) => {
                debug!("Removed partially updated layer {}", id);
                1
            }
            Err(SurfaceError::UnknownLayer(_)) => 0,
            Err(e) => {
                // A leftover layer is replaced on the next create.
                error!("Failed to remove layer {}: {}", id, e);
                0
            }
        }
    }

    /// Add a layer. A half-created layer is removed again on failure.
    fn create(
        layer: &DesiredLayer,
        before: Option<&str>,
        surface: &mut dyn RenderingSurface,
    ) -> Result<usize, (usize, SurfaceError)> {
        let id = layer.unique_id.as_str();
        match surface.add_layer(id, layer.kind, &layer.data, &layer.paint, before) {
            Ok(()) => {}
            Err(SurfaceError::DuplicateLayer(_)) => {
                // Left over from before our record was lost; replace it.
                surface.remove_layer(id).map_err(|e| (0, e))?;
                surface
                    .add_layer(id, layer.kind, &layer.data, &layer.paint, before)
                    .map_err(|e| (1, e))?;
            }
            Err(e) => return Err((0, e)),
        }
        debug!("Added {} layer {}", layer.kind, id);

        if !layer.visible {
            if let Err(e) = surface.set_visibility(id, false) {
                let ops = match surface.remove_layer(id) {
                    Ok(()) => 2,
                    Err(_) => 1,
                };
                return Err((ops, e));
            }
            return Ok(2);
        }
        Ok(1)
    }

    /// Issue only the calls for what changed since `applied`.
    fn update(
        layer: &DesiredLayer,
        applied: &AppliedLayer,
        surface: &mut dyn RenderingSurface,
    ) -> Result<usize, (usize, SurfaceError)> {
        let id = layer.unique_id.as_str();
        let mut ops = 0;

        if layer.data_version != applied.data_version {
            surface.set_layer_data(id, &layer.data).map_err(|e| (ops, e))?;
            ops += 1;
        }

        for (property, value) in &layer.paint {
            if applied.paint.get(property) != Some(value) {
                surface
                    .set_paint_property(id, property, value)
                    .map_err(|e| (ops, e))?;
                ops += 1;
            }
        }

        if layer.visible != applied.visible {
            surface
                .set_visibility(id, layer.visible)
                .map_err(|e| (ops, e))?;
            ops += 1;
        }

        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FailurePoint, RecordingSurface, SurfaceOp};
    use serde_json::json;

    fn layer(id: &str, kind: LayerKind, visible: bool, version: u64, opacity: f64) -> DesiredLayer {
        DesiredLayer {
            unique_id: id.to_string(),
            kind,
            color_index: 0,
            visible,
            data: Arc::new(json!({"type": "FeatureCollection", "features": []})),
            data_version: version,
            paint: Paint::from([
                ("circle-color".to_string(), json!("#4e79a7")),
                ("circle-opacity".to_string(), json!(opacity)),
            ]),
            bounds: Some(Bounds::from_point(-122.4, 37.7)),
        }
    }

    fn metric(id: &str) -> DesiredLayer {
        layer(id, LayerKind::Metric, true, 1, 0.8)
    }

    #[test]
    fn test_creates_then_issues_nothing() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        let desired = vec![metric("metric-a"), metric("metric-b")];

        let report = manager.reconcile(&desired, &mut surface);
        assert!(report.is_clean());
        assert!(report.fitted);
        assert_eq!(surface.op_counts().adds, 2);
        assert_eq!(surface.op_counts().fits, 1);

        surface.take_ops();
        let report = manager.reconcile(&desired, &mut surface);
        assert_eq!(report.operations, 0);
        assert!(!report.fitted);
        assert!(surface.ops().is_empty());
    }

    #[test]
    fn test_paint_change_is_only_paint_update() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a")], &mut surface);
        surface.take_ops();

        let restyled = layer("metric-a", LayerKind::Metric, true, 1, 0.5);
        let report = manager.reconcile(&[restyled], &mut surface);

        assert_eq!(report.operations, 1);
        assert_eq!(
            surface.ops(),
            [SurfaceOp::SetPaintProperty {
                id: "metric-a".to_string(),
                property: "circle-opacity".to_string(),
                value: json!(0.5),
            }]
        );
    }

    #[test]
    fn test_data_version_change_sets_data() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a")], &mut surface);
        surface.take_ops();

        manager.reconcile(&[layer("metric-a", LayerKind::Metric, true, 2, 0.8)], &mut surface);
        assert_eq!(
            surface.ops(),
            [SurfaceOp::SetLayerData {
                id: "metric-a".to_string()
            }]
        );
    }

    #[test]
    fn test_hide_show_and_remove() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a"), metric("metric-b")], &mut surface);
        surface.take_ops();

        let hidden = layer("metric-b", LayerKind::Metric, false, 1, 0.8);
        let report = manager.reconcile(&[metric("metric-a"), hidden], &mut surface);
        assert!(report.fitted);
        assert_eq!(surface.visible_layer_ids(), ["metric-a"]);
        assert!(surface.has_layer("metric-b"));

        let report = manager.reconcile(&[metric("metric-a")], &mut surface);
        assert!(!surface.has_layer("metric-b"));
        // Dropping a hidden layer leaves the visible composition unchanged.
        assert!(!report.fitted);
        assert!(!manager.is_applied("metric-b"));
    }

    #[test]
    fn test_fit_only_on_composition_change() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);

        manager.reconcile(&[metric("metric-a")], &mut surface);
        manager.reconcile(&[layer("metric-a", LayerKind::Metric, true, 2, 0.3)], &mut surface);
        manager.reconcile(&[metric("metric-a"), metric("metric-b")], &mut surface);
        manager.reconcile(&[metric("metric-a"), metric("metric-b")], &mut surface);

        assert_eq!(surface.op_counts().fits, 2);
        assert_eq!(manager.stats().fits, 2);
    }

    #[test]
    fn test_reset_rehydrates_from_memory() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        let desired = vec![
            layer("shape-d1", LayerKind::Shape, true, 1, 0.15),
            metric("metric-a"),
            layer("metric-b", LayerKind::Metric, false, 1, 0.8),
        ];
        manager.reconcile(&desired, &mut surface);

        surface.trigger_reset();
        assert!(manager.reset_pending());
        assert!(surface.layer_ids().is_empty());
        surface.take_ops();

        let report = manager.reconcile(&desired, &mut surface);
        assert!(report.rehydrated);
        assert!(!report.fitted);
        assert_eq!(surface.layer_ids(), ["shape-d1", "metric-a", "metric-b"]);
        assert_eq!(surface.visible_layer_ids(), ["shape-d1", "metric-a"]);
        assert!(!surface
            .ops()
            .iter()
            .any(|op| matches!(op, SurfaceOp::RemoveLayer { .. })));
    }

    #[test]
    fn test_shapes_inserted_below_metrics() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a")], &mut surface);

        let desired = vec![
            layer("shape-d1", LayerKind::Shape, true, 1, 0.15),
            metric("metric-a"),
        ];
        manager.reconcile(&desired, &mut surface);
        assert_eq!(surface.layer_ids(), ["shape-d1", "metric-a"]);
    }

    #[test]
    fn test_failed_create_is_rolled_back() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        surface.inject_failure(FailurePoint::Visibility("metric-b".to_string()));

        let desired = vec![metric("metric-a"), layer("metric-b", LayerKind::Metric, false, 1, 0.8)];
        let report = manager.reconcile(&desired, &mut surface);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "metric-b");
        assert!(!surface.has_layer("metric-b"));
        assert!(!manager.is_applied("metric-b"));
        assert!(manager.is_applied("metric-a"));

        surface.clear_failures();
        let report = manager.reconcile(&desired, &mut surface);
        assert!(report.is_clean());
        assert!(surface.has_layer("metric-b"));
        assert!(!surface.layer("metric-b").unwrap().visible);
    }

    #[test]
    fn test_failed_update_keeps_previous_record() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a")], &mut surface);

        surface.inject_failure(FailurePoint::Property("circle-opacity".to_string()));
        let restyled = layer("metric-a", LayerKind::Metric, true, 1, 0.2);
        let report = manager.reconcile(&[restyled.clone()], &mut surface);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            surface.layer("metric-a").unwrap().paint["circle-opacity"],
            json!(0.8)
        );

        surface.clear_failures();
        surface.take_ops();
        let report = manager.reconcile(&[restyled], &mut surface);
        assert!(report.is_clean());
        assert_eq!(report.operations, 1);
        assert_eq!(
            surface.layer("metric-a").unwrap().paint["circle-opacity"],
            json!(0.2)
        );
    }

    #[test]
    fn test_partial_update_is_discarded_and_recreated() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a")], &mut surface);

        surface.inject_failure(FailurePoint::Property("circle-opacity".to_string()));
        let reloaded = layer("metric-a", LayerKind::Metric, true, 2, 0.3);
        let report = manager.reconcile(&[reloaded.clone()], &mut surface);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "metric-a");
        // New data must never be drawn with the old opacity expression.
        assert!(!surface.has_layer("metric-a"));
        assert!(!manager.is_applied("metric-a"));

        surface.clear_failures();
        surface.take_ops();
        let report = manager.reconcile(&[reloaded], &mut surface);
        assert!(report.is_clean());
        assert_eq!(surface.op_counts().adds, 1);
        assert_eq!(
            surface.layer("metric-a").unwrap().paint["circle-opacity"],
            json!(0.3)
        );
        assert!(manager.is_applied("metric-a"));
    }

    #[test]
    fn test_failed_fit_is_retried() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        surface.inject_failure(FailurePoint::Viewport);

        let report = manager.reconcile(&[metric("metric-a")], &mut surface);
        assert!(!report.fitted);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "viewport");
        assert!(surface.last_fit().is_none());

        surface.clear_failures();
        let report = manager.reconcile(&[metric("metric-a")], &mut surface);
        assert!(report.fitted);
        assert!(surface.last_fit().is_some());

        let report = manager.reconcile(&[metric("metric-a")], &mut surface);
        assert!(!report.fitted);
    }

    #[test]
    fn test_layer_missing_from_surface_is_forgotten() {
        let mut surface = RecordingSurface::new();
        let mut manager = LayerLifecycleManager::new(40);
        manager.reconcile(&[metric("metric-a")], &mut surface);
        surface.remove_layer("metric-a").unwrap();

        let report = manager.reconcile(&[], &mut surface);
        assert!(report.is_clean());
        assert_eq!(manager.applied_count(), 0);
    }
}
