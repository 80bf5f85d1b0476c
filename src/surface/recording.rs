//! In-memory surface that records every call.
//!
//! Used by the CLI as its drawing target and by tests to assert on the
//! exact operations the engine issues.

use crate::error::SurfaceError;
use crate::models::{Bounds, LayerKind};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{Paint, RenderingSurface, ResetCallback};

/// One successful call against the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    AddLayer {
        id: String,
        kind: LayerKind,
        before: Option<String>,
    },
    SetLayerData {
        id: String,
    },
    SetPaintProperty {
        id: String,
        property: String,
        value: Value,
    },
    SetVisibility {
        id: String,
        visible: bool,
    },
    RemoveLayer {
        id: String,
    },
    FitToBounds {
        bounds: Bounds,
        padding: u32,
    },
}

impl SurfaceOp {
    /// Layer the operation touched, if any.
    pub fn layer_id(&self) -> Option<&str> {
        match self {
            SurfaceOp::AddLayer { id, .. }
            | SurfaceOp::SetLayerData { id }
            | SurfaceOp::SetPaintProperty { id, .. }
            | SurfaceOp::SetVisibility { id, .. }
            | SurfaceOp::RemoveLayer { id } => Some(id),
            SurfaceOp::FitToBounds { .. } => None,
        }
    }
}

/// Counts of recorded operations by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpCounts {
    pub adds: usize,
    pub data_updates: usize,
    pub paint_updates: usize,
    pub visibility_changes: usize,
    pub removes: usize,
    pub fits: usize,
    pub failures: usize,
}

impl OpCounts {
    pub fn total(&self) -> usize {
        self.adds
            + self.data_updates
            + self.paint_updates
            + self.visibility_changes
            + self.removes
            + self.fits
    }
}

/// A layer currently held by the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceLayer {
    pub kind: LayerKind,
    pub data: Value,
    pub paint: Paint,
    pub visible: bool,
}

/// Calls that should fail, for exercising error paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// Every call on this layer except removal.
    Layer(String),
    /// Paint updates of this property on any layer.
    Property(String),
    /// Visibility changes of this layer.
    Visibility(String),
    /// Every `fit_to_bounds` call.
    Viewport,
}

#[derive(Default)]
pub struct RecordingSurface {
    ops: Vec<SurfaceOp>,
    layers: HashMap<String, SurfaceLayer>,
    order: Vec<String>,
    callbacks: Vec<ResetCallback>,
    failures: HashSet<FailurePoint>,
    failed_calls: usize,
    last_fit: Option<Bounds>,
}

impl std::fmt::Debug for RecordingSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSurface")
            .field("layers", &self.order)
            .field("ops", &self.ops.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations recorded since creation or the last [`take_ops`](Self::take_ops).
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<SurfaceOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn layer(&self, id: &str) -> Option<&SurfaceLayer> {
        self.layers.get(id)
    }

    pub fn has_layer(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    /// Layer ids from bottom to top.
    pub fn layer_ids(&self) -> &[String] {
        &self.order
    }

    /// Ids of layers currently drawn.
    pub fn visible_layer_ids(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.layers.get(*id).is_some_and(|l| l.visible))
            .map(String::as_str)
            .collect()
    }

    pub fn last_fit(&self) -> Option<Bounds> {
        self.last_fit
    }

    pub fn inject_failure(&mut self, point: FailurePoint) {
        self.failures.insert(point);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Tally of the recorded operations plus rejected calls.
    pub fn op_counts(&self) -> OpCounts {
        let mut counts = OpCounts {
            failures: self.failed_calls,
            ..OpCounts::default()
        };
        for op in &self.ops {
            match op {
                SurfaceOp::AddLayer { .. } => counts.adds += 1,
                SurfaceOp::SetLayerData { .. } => counts.data_updates += 1,
                SurfaceOp::SetPaintProperty { .. } => counts.paint_updates += 1,
                SurfaceOp::SetVisibility { .. } => counts.visibility_changes += 1,
                SurfaceOp::RemoveLayer { .. } => counts.removes += 1,
                SurfaceOp::FitToBounds { .. } => counts.fits += 1,
            }
        }
        counts
    }

    /// Drop every layer and notify subscribers, like a style reload would.
    pub fn trigger_reset(&mut self) {
        debug!("Surface reset: dropping {} layers", self.layers.len());
        self.layers.clear();
        self.order.clear();
        for callback in self.callbacks.iter_mut() {
            callback();
        }
    }

    fn check(&mut self, point: FailurePoint) -> Result<(), SurfaceError> {
        if self.failures.contains(&point) {
            self.failed_calls += 1;
            let what = match &point {
                FailurePoint::Layer(id) | FailurePoint::Visibility(id) => id.clone(),
                FailurePoint::Property(p) => p.clone(),
                FailurePoint::Viewport => "viewport".to_string(),
            };
            return Err(SurfaceError::Other(format!("injected failure on {}", what)));
        }
        Ok(())
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut SurfaceLayer, SurfaceError> {
        if !self.layers.contains_key(id) {
            self.failed_calls += 1;
        }
        self.layers
            .get_mut(id)
            .ok_or_else(|| SurfaceError::UnknownLayer(id.to_string()))
    }
}

impl RenderingSurface for RecordingSurface {
    fn add_layer(
        &mut self,
        id: &str,
        kind: LayerKind,
        data: &Value,
        paint: &Paint,
        before: Option<&str>,
    ) -> Result<(), SurfaceError> {
        self.check(FailurePoint::Layer(id.to_string()))?;
        for property in paint.keys() {
            self.check(FailurePoint::Property(property.clone()))?;
        }
        if self.layers.contains_key(id) {
            self.failed_calls += 1;
            return Err(SurfaceError::DuplicateLayer(id.to_string()));
        }

        let position = before
            .and_then(|b| self.order.iter().position(|existing| existing == b))
            .unwrap_or(self.order.len());
        self.order.insert(position, id.to_string());
        self.layers.insert(
            id.to_string(),
            SurfaceLayer {
                kind,
                data: data.clone(),
                paint: paint.clone(),
                visible: true,
            },
        );
        self.ops.push(SurfaceOp::AddLayer {
            id: id.to_string(),
            kind,
            before: before.map(str::to_string),
        });
        Ok(())
    }

    fn set_layer_data(&mut self, id: &str, data: &Value) -> Result<(), SurfaceError> {
        self.check(FailurePoint::Layer(id.to_string()))?;
        self.layer_mut(id)?.data = data.clone();
        self.ops.push(SurfaceOp::SetLayerData { id: id.to_string() });
        Ok(())
    }

    fn set_paint_property(&mut self, id: &str, property: &str, value: &Value) -> Result<(), SurfaceError> {
        self.check(FailurePoint::Layer(id.to_string()))?;
        self.check(FailurePoint::Property(property.to_string()))?;
        self.layer_mut(id)?
            .paint
            .insert(property.to_string(), value.clone());
        self.ops.push(SurfaceOp::SetPaintProperty {
            id: id.to_string(),
            property: property.to_string(),
            value: value.clone(),
        });
        Ok(())
    }

    fn set_visibility(&mut self, id: &str, visible: bool) -> Result<(), SurfaceError> {
        self.check(FailurePoint::Layer(id.to_string()))?;
        self.check(FailurePoint::Visibility(id.to_string()))?;
        self.layer_mut(id)?.visible = visible;
        self.ops.push(SurfaceOp::SetVisibility {
            id: id.to_string(),
            visible,
        });
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), SurfaceError> {
        if self.layers.remove(id).is_none() {
            self.failed_calls += 1;
            return Err(SurfaceError::UnknownLayer(id.to_string()));
        }
        self.order.retain(|existing| existing != id);
        self.ops.push(SurfaceOp::RemoveLayer { id: id.to_string() });
        Ok(())
    }

    fn fit_to_bounds(&mut self, bounds: &Bounds, padding: u32) -> Result<(), SurfaceError> {
        self.check(FailurePoint::Viewport)?;
        self.last_fit = Some(*bounds);
        self.ops.push(SurfaceOp::FitToBounds {
            bounds: *bounds,
            padding,
        });
        Ok(())
    }

    fn on_reset(&mut self, callback: ResetCallback) {
        self.callbacks.push(callback);
    }
}
