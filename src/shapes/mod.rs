//! Static polygon ("shape") layers: ordering, coloring and geometry helpers.
//!
//! Order is category first (governance, neighborhood, planning, other),
//! then structure type inside governance (district, ward, precinct, other),
//! then an explicit render-order hint, then the label. Colors follow the
//! position in the full ordered list, so toggling one layer never changes
//! another layer's color.

use crate::color::ColorAssigner;
use crate::models::{Bounds, ShapeCategory, ShapeInstance};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// A shape instance with its resolved position and color.
#[derive(Debug, Clone)]
pub struct ResolvedShape {
    pub instance: Arc<ShapeInstance>,
    /// Position in the full ordered list.
    pub position: usize,
    pub color_index: usize,
    /// GeoJSON feature collection ready for the surface.
    pub data: Arc<Value>,
    pub bounds: Option<Bounds>,
}

fn structure_rank(shape: &ShapeInstance) -> u8 {
    match shape.category {
        ShapeCategory::Governance => shape.structure_type.as_ref().map_or(3, |t| t.rank()),
        _ => 0,
    }
}

fn render_order_cmp(a: Option<i32>, b: Option<i32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Total order used for drawing and listing shape layers.
pub fn compare_shapes(a: &ShapeInstance, b: &ShapeInstance) -> Ordering {
    a.category
        .rank()
        .cmp(&b.category.rank())
        .then_with(|| structure_rank(a).cmp(&structure_rank(b)))
        .then_with(|| render_order_cmp(a.render_order, b.render_order))
        .then_with(|| a.label.to_lowercase().cmp(&b.label.to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Orders shape instances and assigns their colors.
#[derive(Debug, Clone, Default)]
pub struct ShapeLayerResolver {
    colors: ColorAssigner,
}

impl ShapeLayerResolver {
    pub fn new(colors: ColorAssigner) -> Self {
        Self { colors }
    }

    /// Resolve every known instance, enabled or not.
    pub fn resolve(&self, instances: &[ShapeInstance]) -> Vec<ResolvedShape> {
        let mut sorted: Vec<&ShapeInstance> = instances.iter().collect();
        sorted.sort_by(|a, b| compare_shapes(a, b));

        sorted
            .into_iter()
            .enumerate()
            .map(|(position, instance)| ResolvedShape {
                instance: Arc::new(instance.clone()),
                position,
                color_index: self.colors.color_index_for_slot(position),
                data: Arc::new(feature_collection(&instance.geometry, &instance.id)),
                bounds: geometry_bounds(&instance.geometry),
            })
            .collect()
    }
}

/// Wrap a geometry, feature or collection as a `FeatureCollection`.
pub fn feature_collection(geometry: &Value, shape_id: &str) -> Value {
    match geometry.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => geometry.clone(),
        Some("Feature") => json!({ "type": "FeatureCollection", "features": [geometry] }),
        Some(_) => json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": geometry,
                "properties": { "shapeId": shape_id },
            }],
        }),
        None => json!({ "type": "FeatureCollection", "features": [] }),
    }
}

/// Bounds of every coordinate pair nested anywhere in a GeoJSON value.
pub fn geometry_bounds(value: &Value) -> Option<Bounds> {
    let mut bounds = None;
    collect_bounds(value, &mut bounds);
    bounds
}

fn collect_bounds(value: &Value, bounds: &mut Option<Bounds>) {
    match value {
        Value::Array(items) => {
            if let [Value::Number(lon), Value::Number(lat), ..] = items.as_slice() {
                if let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) {
                    match bounds.as_mut() {
                        Some(b) => b.extend(lon, lat),
                        None => *bounds = Some(Bounds::from_point(lon, lat)),
                    }
                    return;
                }
            }
            for item in items {
                collect_bounds(item, bounds);
            }
        }
        Value::Object(obj) => {
            for key in ["coordinates", "geometry", "features", "geometries"] {
                if let Some(inner) = obj.get(key) {
                    collect_bounds(inner, bounds);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StructureType;

    fn shape(id: &str, label: &str, category: &str, structure: Option<&str>, order: Option<i32>) -> ShapeInstance {
        ShapeInstance {
            id: id.to_string(),
            label: label.to_string(),
            category: ShapeCategory::from(category),
            structure_type: structure.map(StructureType::from),
            render_order: order,
            geometry: json!({
                "type": "Polygon",
                "coordinates": [[[-122.5, 37.7], [-122.3, 37.7], [-122.3, 37.8], [-122.5, 37.7]]]
            }),
        }
    }

    fn ids(resolved: &[ResolvedShape]) -> Vec<&str> {
        resolved.iter().map(|r| r.instance.id.as_str()).collect()
    }

    #[test]
    fn test_ordering() {
        let instances = vec![
            shape("zoning", "Zoning", "planning", None, None),
            shape("precincts", "Precincts", "governance", Some("precinct"), None),
            shape("hoods-b", "beta hoods", "neighborhood", None, None),
            shape("districts", "Council Districts", "governance", Some("district"), None),
            shape("hoods-a", "Alpha Hoods", "neighborhood", None, None),
            shape("transit", "Transit", "transit", None, None),
            shape("wards", "Wards", "governance", Some("ward"), None),
            shape("hoods-c", "Zed Hoods", "neighborhood", None, Some(1)),
        ];

        let resolved = ShapeLayerResolver::default().resolve(&instances);
        assert_eq!(
            ids(&resolved),
            vec![
                "districts",
                "wards",
                "precincts",
                "hoods-c",
                "hoods-a",
                "hoods-b",
                "zoning",
                "transit"
            ]
        );
        for (i, r) in resolved.iter().enumerate() {
            assert_eq!(r.position, i);
            assert_eq!(r.color_index, i % 10);
        }
    }

    #[test]
    fn test_geometry_bounds_and_collection() {
        let s = shape("a", "A", "governance", None, None);
        let bounds = geometry_bounds(&s.geometry).unwrap();
        assert_eq!(bounds.min_lon, -122.5);
        assert_eq!(bounds.max_lon, -122.3);
        assert_eq!(bounds.min_lat, 37.7);
        assert_eq!(bounds.max_lat, 37.8);

        let fc = feature_collection(&s.geometry, "a");
        assert_eq!(fc["type"], "FeatureCollection");
        assert_eq!(fc["features"][0]["properties"]["shapeId"], "a");
        assert_eq!(geometry_bounds(&fc), Some(bounds));

        assert_eq!(geometry_bounds(&Value::Null), None);
        assert_eq!(feature_collection(&Value::Null, "x")["features"], json!([]));
    }
}
