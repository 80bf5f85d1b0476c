//! Data models for the map engine.
//!
//! This module contains the core data structures shared by the loader,
//! the aggregator and the layer lifecycle manager: metric descriptors,
//! raw backend records, aggregated features, layers and shape instances.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// A raw record as returned by the metrics backend.
///
/// Records are semi-structured: an attribute bag carrying a location in
/// one of several shapes and at most one recognized date field.
pub type RawRecord = Map<String, Value>;

/// Description of a metric as listed by the metrics backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    /// Backend identifier of the metric.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Grouping category shown in the metric picker.
    #[serde(default)]
    pub category: String,
    /// Whether the metric is currently published.
    #[serde(default = "default_true", alias = "isActive")]
    pub is_active: bool,
    /// Whether the backend has a map query configured for this metric.
    #[serde(default, alias = "hasMapQuery")]
    pub has_map_query: bool,
}

fn default_true() -> bool {
    true
}

impl MetricDescriptor {
    /// Returns true if this metric can be drawn on the map.
    pub fn is_map_eligible(&self) -> bool {
        self.is_active && self.has_map_query
    }
}

/// Inclusive calendar date range used as query parameter for map data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day of the range.
    pub start: NaiveDate,
    /// Last day of the range (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, swapping the ends if they are given in reverse.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Returns true if `date` falls inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Iterates every day of the range in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Number of days covered by the range.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Western longitude boundary.
    pub min_lon: f64,
    /// Southern latitude boundary.
    pub min_lat: f64,
    /// Eastern longitude boundary.
    pub max_lon: f64,
    /// Northern latitude boundary.
    pub max_lat: f64,
}

impl Bounds {
    /// A degenerate box around a single point.
    pub fn from_point(lon: f64, lat: f64) -> Self {
        Self {
            min_lon: lon,
            min_lat: lat,
            max_lon: lon,
            max_lat: lat,
        }
    }

    /// Grows the box to include a point.
    pub fn extend(&mut self, lon: f64, lat: f64) {
        self.min_lon = self.min_lon.min(lon);
        self.min_lat = self.min_lat.min(lat);
        self.max_lon = self.max_lon.max(lon);
        self.max_lat = self.max_lat.max(lat);
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Folds an optional accumulator with another box.
    pub fn merge(acc: Option<Bounds>, other: Option<Bounds>) -> Option<Bounds> {
        match (acc, other) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        }
    }
}

/// One renderable point: a single record or a merged cluster of records
/// sharing the same rounded coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFeature {
    /// Position as `[lon, lat]`, rounded to the aggregation precision.
    pub coordinates: [f64; 2],
    /// Descriptive attributes (record attributes or cluster summaries).
    pub properties: Map<String, Value>,
    /// Metric the feature was produced from.
    pub source_metric_id: String,
    /// True when more than one record was merged.
    pub is_aggregated: bool,
    /// Number of records represented.
    pub count: usize,
    /// Visual size multiplier.
    pub scale: f64,
    /// Earliest extracted date of any member record.
    pub earliest_date: Option<NaiveDate>,
}

impl AggregatedFeature {
    /// Converts the feature into a GeoJSON `Feature`, tagging it with the
    /// feature id used by data-driven paint expressions.
    pub fn to_geojson(&self, fid: usize) -> Value {
        let mut properties = self.properties.clone();
        properties.insert("fid".to_string(), json!(fid));
        properties.insert("count".to_string(), json!(self.count));
        properties.insert("scale".to_string(), json!(self.scale));
        properties.insert("isAggregated".to_string(), json!(self.is_aggregated));
        properties.insert("metricId".to_string(), json!(self.source_metric_id));

        json!({
            "type": "Feature",
            "id": fid,
            "geometry": {
                "type": "Point",
                "coordinates": [self.coordinates[0], self.coordinates[1]],
            },
            "properties": properties,
        })
    }
}

/// Kind of layer drawn on the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Point layer backed by a metric dataset.
    Metric,
    /// Static polygon layer.
    Shape,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Metric => write!(f, "metric"),
            LayerKind::Shape => write!(f, "shape"),
        }
    }
}

impl LayerKind {
    /// Prefix used when building surface layer ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            LayerKind::Metric => "metric-",
            LayerKind::Shape => "shape-",
        }
    }

    /// Builds the surface layer id for a metric or shape key.
    pub fn layer_id(&self, key: &str) -> String {
        format!("{}{}", self.id_prefix(), key)
    }
}

/// A layer the engine wants on the map.
///
/// `visible` is always `selected && !hidden`.
#[derive(Debug, Clone)]
pub struct LayerEntry {
    /// Surface layer id.
    pub unique_id: String,
    /// Metric or shape.
    pub kind: LayerKind,
    /// Index into the palette.
    pub color_index: usize,
    /// Whether the layer should currently be drawn.
    pub visible: bool,
    /// Loaded features for metric layers; `None` until data arrives.
    pub source_features: Option<Arc<FeatureSet>>,
}

/// Output of one aggregation pass over a metric dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    /// Rendering features in first-seen coordinate order.
    pub features: Vec<AggregatedFeature>,
    /// Bounds of all features, `None` when empty.
    pub bounds: Option<Bounds>,
    /// Records dropped for unusable coordinates.
    pub dropped: usize,
}

impl FeatureSet {
    /// Total number of source records represented.
    pub fn record_count(&self) -> usize {
        self.features.iter().map(|f| f.count).sum()
    }

    /// GeoJSON `FeatureCollection` for the whole set.
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .enumerate()
            .map(|(fid, f)| f.to_geojson(fid))
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }
}

/// Per-metric data loading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadState {
    /// Nothing requested, or a transient failure reset the metric.
    Idle,
    /// A request is outstanding.
    Loading,
    /// Data arrived.
    Loaded,
    /// The backend has no map query for this metric; never retried.
    AttemptedNoData,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Idle => write!(f, "idle"),
            LoadState::Loading => write!(f, "loading"),
            LoadState::Loaded => write!(f, "loaded"),
            LoadState::AttemptedNoData => write!(f, "attempted-no-data"),
        }
    }
}

/// Category of a static shape layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeCategory {
    Governance,
    Neighborhood,
    Planning,
    Other(String),
}

impl ShapeCategory {
    /// Sort rank; lower draws and lists first.
    pub fn rank(&self) -> u8 {
        match self {
            ShapeCategory::Governance => 0,
            ShapeCategory::Neighborhood => 1,
            ShapeCategory::Planning => 2,
            ShapeCategory::Other(_) => 3,
        }
    }
}

impl From<&str> for ShapeCategory {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "governance" => ShapeCategory::Governance,
            "neighborhood" | "neighbourhood" => ShapeCategory::Neighborhood,
            "planning" => ShapeCategory::Planning,
            other => ShapeCategory::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ShapeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeCategory::Governance => write!(f, "governance"),
            ShapeCategory::Neighborhood => write!(f, "neighborhood"),
            ShapeCategory::Planning => write!(f, "planning"),
            ShapeCategory::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Electoral structure type of a governance shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureType {
    District,
    Ward,
    Precinct,
    Other(String),
}

impl StructureType {
    /// Sort rank within the governance category.
    pub fn rank(&self) -> u8 {
        match self {
            StructureType::District => 0,
            StructureType::Ward => 1,
            StructureType::Precinct => 2,
            StructureType::Other(_) => 3,
        }
    }
}

impl From<&str> for StructureType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "district" | "council_district" | "council-district" => StructureType::District,
            "ward" => StructureType::Ward,
            "precinct" => StructureType::Precinct,
            other => StructureType::Other(other.to_string()),
        }
    }
}

/// A static polygon layer provided by the city-structure backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeInstance {
    /// Backend identifier.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Layer category, parsed leniently from the backend string.
    #[serde(deserialize_with = "de_category", serialize_with = "ser_display")]
    pub category: ShapeCategory,
    /// Structure type for governance layers.
    #[serde(
        default,
        alias = "structureType",
        deserialize_with = "de_structure_type",
        serialize_with = "ser_opt_display"
    )]
    pub structure_type: Option<StructureType>,
    /// Explicit render order hint.
    #[serde(default, alias = "renderOrder")]
    pub render_order: Option<i32>,
    /// GeoJSON geometry, feature or feature collection.
    #[serde(default)]
    pub geometry: Value,
}

fn de_category<'de, D>(deserializer: D) -> Result<ShapeCategory, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(ShapeCategory::from(s.as_str()))
}

fn de_structure_type<'de, D>(deserializer: D) -> Result<Option<StructureType>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.map(|s| StructureType::from(s.as_str())))
}

fn ser_display<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: fmt::Display,
{
    serializer.collect_str(value)
}

fn ser_opt_display<S>(value: &Option<StructureType>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(StructureType::District) => serializer.serialize_some("district"),
        Some(StructureType::Ward) => serializer.serialize_some("ward"),
        Some(StructureType::Precinct) => serializer.serialize_some("precinct"),
        Some(StructureType::Other(s)) => serializer.serialize_some(s),
        None => serializer.serialize_none(),
    }
}

/// One row of the map legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    /// Surface layer id.
    pub unique_id: String,
    /// Metric name or shape label.
    pub label: String,
    /// Metric or shape.
    pub kind: LayerKind,
    /// Resolved palette color.
    pub color: String,
    /// Number of rendered features (0 for shapes).
    pub feature_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_metric_descriptor_camel_case_aliases() {
        let json = r#"{"id":"m1","name":"Potholes","category":"streets","isActive":true,"hasMapQuery":true}"#;
        let metric: MetricDescriptor = serde_json::from_str(json).unwrap();
        assert!(metric.is_map_eligible());

        let inactive = MetricDescriptor {
            is_active: false,
            ..metric
        };
        assert!(!inactive.is_map_eligible());
    }

    #[test]
    fn test_date_range_normalizes_and_iterates() {
        let range = DateRange::new(date(2024, 6, 3), date(2024, 6, 1));
        assert_eq!(range.start, date(2024, 6, 1));
        assert_eq!(range.len_days(), 3);
        assert_eq!(range.days().count(), 3);
        assert!(range.contains(date(2024, 6, 2)));
        assert!(!range.contains(date(2024, 6, 4)));
    }

    #[test]
    fn test_bounds_merge() {
        let mut a = Bounds::from_point(-122.4, 37.7);
        a.extend(-122.3, 37.8);
        let b = Bounds::from_point(-121.0, 36.0);

        let merged = Bounds::merge(Some(a), Some(b)).unwrap();
        assert_eq!(merged.min_lon, -122.4);
        assert_eq!(merged.max_lon, -121.0);
        assert_eq!(merged.min_lat, 36.0);
        assert_eq!(merged.max_lat, 37.8);
        assert_eq!(Bounds::merge(None, Some(b)), Some(b));
        assert_eq!(Bounds::merge(None, None), None);
    }

    #[test]
    fn test_shape_category_parsing_and_rank() {
        assert_eq!(ShapeCategory::from("Governance"), ShapeCategory::Governance);
        assert_eq!(
            ShapeCategory::from("transit"),
            ShapeCategory::Other("transit".to_string())
        );
        assert!(ShapeCategory::Governance.rank() < ShapeCategory::Neighborhood.rank());
        assert!(ShapeCategory::Planning.rank() < ShapeCategory::Other(String::new()).rank());
        assert!(StructureType::District.rank() < StructureType::Ward.rank());
    }

    #[test]
    fn test_shape_instance_deserialize() {
        let json = r#"{
            "id": "d1",
            "label": "District 1",
            "category": "governance",
            "structureType": "district",
            "renderOrder": 2,
            "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}
        }"#;
        let shape: ShapeInstance = serde_json::from_str(json).unwrap();
        assert_eq!(shape.category, ShapeCategory::Governance);
        assert_eq!(shape.structure_type, Some(StructureType::District));
        assert_eq!(shape.render_order, Some(2));

        let back = serde_json::to_value(&shape).unwrap();
        assert_eq!(back["category"], "governance");
        assert_eq!(back["structure_type"], "district");
    }

    #[test]
    fn test_layer_ids_and_load_state_display() {
        assert_eq!(LayerKind::Metric.layer_id("m1"), "metric-m1");
        assert_eq!(LayerKind::Shape.layer_id("d1"), "shape-d1");
        assert_eq!(LoadState::AttemptedNoData.to_string(), "attempted-no-data");
    }

    #[test]
    fn test_feature_set_geojson() {
        let feature = AggregatedFeature {
            coordinates: [-122.4194, 37.7749],
            properties: Map::new(),
            source_metric_id: "m1".to_string(),
            is_aggregated: true,
            count: 3,
            scale: 0.62,
            earliest_date: None,
        };
        let set = FeatureSet {
            features: vec![feature],
            bounds: Some(Bounds::from_point(-122.4194, 37.7749)),
            dropped: 0,
        };

        assert_eq!(set.record_count(), 3);
        let geojson = set.to_geojson();
        assert_eq!(geojson["type"], "FeatureCollection");
        assert_eq!(geojson["features"][0]["properties"]["fid"], 0);
        assert_eq!(geojson["features"][0]["properties"]["count"], 3);
        assert_eq!(geojson["features"][0]["geometry"]["coordinates"][1], 37.7749);
    }
}
