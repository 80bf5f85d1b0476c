//! Coordinate extraction from raw records.
//!
//! Backends deliver locations in three shapes: explicit longitude/latitude
//! attributes, a GeoJSON-like `{ "coordinates": [lon, lat] }` object, or a
//! bare `[lon, lat]` array.

use crate::models::RawRecord;
use serde_json::Value;

const LON_FIELDS: &[&str] = &["longitude", "lon", "lng"];
const LAT_FIELDS: &[&str] = &["latitude", "lat"];
const LOCATION_FIELDS: &[&str] = &["location", "geometry", "coordinates", "point", "geocoded_column"];

/// Read a finite number from a JSON number or numeric string.
pub fn as_finite_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn pair_from_array(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [lon, lat] => Some((as_finite_f64(lon)?, as_finite_f64(lat)?)),
        _ => None,
    }
}

fn pair_from_location(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Array(_) => pair_from_array(value),
        Value::Object(obj) => obj.get("coordinates").and_then(pair_from_array),
        _ => None,
    }
}

fn first_field<'a>(record: &'a RawRecord, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| record.get(*name))
}

/// Extract `(lon, lat)` from a record, or `None` if it has no usable location.
pub fn extract_coordinates(record: &RawRecord) -> Option<(f64, f64)> {
    if let (Some(lon), Some(lat)) = (
        first_field(record, LON_FIELDS).and_then(as_finite_f64),
        first_field(record, LAT_FIELDS).and_then(as_finite_f64),
    ) {
        return Some((lon, lat));
    }

    LOCATION_FIELDS
        .iter()
        .filter_map(|name| record.get(*name))
        .find_map(pair_from_location)
}

/// Integer grid key of a coordinate rounded to `precision` decimals.
pub fn grid_key(value: f64, precision: u32) -> i64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() as i64
}

/// Coordinate value of a grid key.
pub fn from_grid_key(key: i64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    key as f64 / factor
}
