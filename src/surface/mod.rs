//! Rendering surface adapter.
//!
//! The engine never talks to a map widget directly. Everything it draws
//! goes through [`RenderingSurface`], and only the layer lifecycle manager
//! calls it.

pub mod recording;

pub use recording::{FailurePoint, OpCounts, RecordingSurface, SurfaceLayer, SurfaceOp};

use crate::error::SurfaceError;
use crate::models::{Bounds, LayerKind};
use serde_json::Value;
use std::collections::BTreeMap;

/// Paint properties of one layer, keyed by property name.
pub type Paint = BTreeMap<String, Value>;

/// Callback fired when the surface drops all custom layers.
pub type ResetCallback = Box<dyn FnMut() + Send>;

/// Operations the engine needs from a map-drawing component.
pub trait RenderingSurface {
    /// Create a layer with its data and initial paint, drawn below `before`
    /// when given, on top otherwise. New layers are visible.
    fn add_layer(
        &mut self,
        id: &str,
        kind: LayerKind,
        data: &Value,
        paint: &Paint,
        before: Option<&str>,
    ) -> Result<(), SurfaceError>;

    /// Replace the GeoJSON backing a layer.
    fn set_layer_data(&mut self, id: &str, data: &Value) -> Result<(), SurfaceError>;

    fn set_paint_property(&mut self, id: &str, property: &str, value: &Value) -> Result<(), SurfaceError>;

    fn set_visibility(&mut self, id: &str, visible: bool) -> Result<(), SurfaceError>;

    fn remove_layer(&mut self, id: &str) -> Result<(), SurfaceError>;

    /// Move the viewport so `bounds` is in view with `padding` pixels around it.
    fn fit_to_bounds(&mut self, bounds: &Bounds, padding: u32) -> Result<(), SurfaceError>;

    /// Subscribe to surface resets (style reloads and the like).
    fn on_reset(&mut self, callback: ResetCallback);
}
