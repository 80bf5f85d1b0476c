//! Paint properties for metric and shape layers.
//!
//! Per-feature temporal style is encoded as data-driven expressions on the
//! `fid` property, so restyling never touches layer data.

use crate::color::desaturate;
use crate::config::RenderConfig;
use crate::models::FeatureSet;
use crate::surface::Paint;
use crate::temporal::{FadeWindow, FeatureStyle};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const CIRCLE_COLOR: &str = "circle-color";
pub const CIRCLE_OPACITY: &str = "circle-opacity";
pub const CIRCLE_RADIUS: &str = "circle-radius";
pub const FILL_COLOR: &str = "fill-color";
pub const FILL_OPACITY: &str = "fill-opacity";
pub const LINE_COLOR: &str = "line-color";
pub const LINE_WIDTH: &str = "line-width";

/// Opacity in thousandths, so equal-looking values compare equal.
fn quantize(opacity: f64) -> i64 {
    (opacity.clamp(0.0, 1.0) * 1000.0).round() as i64
}

fn dequantize(q: i64) -> f64 {
    q as f64 / 1000.0
}

/// Inputs for styling one metric layer.
#[derive(Debug, Clone, Copy)]
pub struct MetricStyleInput<'a> {
    pub color: &'a str,
    pub window: &'a FadeWindow,
    pub date: Option<NaiveDate>,
    pub is_playing: bool,
    pub stale_desaturation: f64,
}

/// Paint for a metric point layer.
pub fn metric_paint(set: &FeatureSet, input: MetricStyleInput<'_>, render: &RenderConfig) -> Paint {
    let styles: Vec<FeatureStyle> = set
        .features
        .iter()
        .map(|f| input.window.style_of(f, input.date, input.is_playing))
        .collect();

    let stale_color = desaturate(input.color, input.stale_desaturation);

    let mut paint = Paint::new();
    paint.insert(CIRCLE_OPACITY.to_string(), opacity_expression(&styles));
    paint.insert(
        CIRCLE_COLOR.to_string(),
        color_expression(&styles, input.color, &stale_color),
    );
    paint.insert(
        CIRCLE_RADIUS.to_string(),
        json!(["*", render.circle_radius, ["get", "scale"]]),
    );
    paint
}

/// A literal when every feature shares one opacity, a `match` on `fid` otherwise.
///
/// The most common opacity becomes the fallback branch.
pub fn opacity_expression(styles: &[FeatureStyle]) -> Value {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (fid, style) in styles.iter().enumerate() {
        groups.entry(quantize(style.opacity)).or_default().push(fid);
    }

    if groups.len() <= 1 {
        let q = groups.keys().next().copied().unwrap_or(0);
        return json!(dequantize(q));
    }

    let mut fallback = 0;
    let mut fallback_size = 0;
    for (q, fids) in &groups {
        if fids.len() > fallback_size {
            fallback = *q;
            fallback_size = fids.len();
        }
    }

    let mut expr = vec![json!("match"), json!(["get", "fid"])];
    for (q, fids) in &groups {
        if *q == fallback {
            continue;
        }
        expr.push(json!(fids));
        expr.push(json!(dequantize(*q)));
    }
    expr.push(json!(dequantize(fallback)));
    Value::Array(expr)
}

/// Stale features get the desaturated color.
pub fn color_expression(styles: &[FeatureStyle], color: &str, stale_color: &str) -> Value {
    let stale: Vec<usize> = styles
        .iter()
        .enumerate()
        .filter(|(_, s)| s.stale)
        .map(|(fid, _)| fid)
        .collect();

    if stale.is_empty() {
        json!(color)
    } else if stale.len() == styles.len() {
        json!(stale_color)
    } else {
        json!([
            "case",
            ["in", ["get", "fid"], ["literal", stale]],
            stale_color,
            color
        ])
    }
}

/// Paint for a static shape layer.
pub fn shape_paint(color: &str, render: &RenderConfig) -> Paint {
    let mut paint = Paint::new();
    paint.insert(FILL_COLOR.to_string(), json!(color));
    paint.insert(FILL_OPACITY.to_string(), json!(render.shape_fill_opacity));
    paint.insert(LINE_COLOR.to_string(), json!(color));
    paint.insert(LINE_WIDTH.to_string(), json!(render.shape_line_width));
    paint
}
