//! Markdown and JSON rendering of session reports.

use anyhow::{Context, Result};
use std::path::Path;

use super::{MetricSummary, ReportMetadata, SessionReport, ShapeSummary};
use crate::models::Bounds;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SessionReport) -> String {
    let mut output = String::new();

    output.push_str("# Civic Map Session Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_legend_section(report));
    output.push_str(&generate_metrics_section(&report.metrics));
    output.push_str(&generate_shapes_section(&report.shapes));
    output.push_str(&generate_surface_section(report));
    output.push_str(&generate_footer());

    output
}

fn format_bounds(bounds: &Option<Bounds>) -> String {
    match bounds {
        Some(b) => format!(
            "[{:.5}, {:.5}] – [{:.5}, {:.5}]",
            b.min_lon, b.min_lat, b.max_lon, b.max_lat
        ),
        None => "-".to_string(),
    }
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **City:** {}\n", metadata.city_id));
    section.push_str(&format!("- **Source:** {}\n", metadata.source));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    match metadata.date_range {
        Some(range) => section.push_str(&format!("- **Date Range:** {}\n", range)),
        None => section.push_str("- **Date Range:** all time\n"),
    }
    if let Some(date) = metadata.selected_date {
        section.push_str(&format!("- **Selected Date:** {}\n", date));
    }
    if metadata.played_days > 0 {
        section.push_str(&format!(
            "- **Timeline Played:** {} days\n",
            metadata.played_days
        ));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

fn generate_legend_section(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Legend\n\n");
    if report.legend.is_empty() {
        section.push_str("No visible layers.\n\n");
        return section;
    }

    section.push_str("| Layer | Kind | Color | Features |\n");
    section.push_str("|:---|:---:|:---:|---:|\n");
    for entry in &report.legend {
        section.push_str(&format!(
            "| {} | {} | `{}` | {} |\n",
            entry.label, entry.kind, entry.color, entry.feature_count
        ));
    }
    section.push('\n');

    section
}

fn generate_metrics_section(metrics: &[MetricSummary]) -> String {
    let mut section = String::new();

    section.push_str("## Metrics\n\n");
    if metrics.is_empty() {
        section.push_str("No metrics selected.\n\n");
        return section;
    }

    section.push_str("| Metric | State | Records | Features | Clusters | Dropped | Bounds |\n");
    section.push_str("|:---|:---:|---:|---:|---:|---:|:---|\n");
    for metric in metrics {
        let name = if metric.visible {
            metric.name.clone()
        } else {
            format!("{} (hidden)", metric.name)
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            name,
            metric.state,
            metric.records,
            metric.features,
            metric.clusters,
            metric.dropped,
            format_bounds(&metric.bounds)
        ));
    }
    section.push('\n');

    for metric in metrics.iter().filter(|m| !m.densest.is_empty()) {
        section.push_str(&format!("### Densest clusters: {}\n\n", metric.name));
        section.push_str("| Longitude | Latitude | Records | Dates |\n");
        section.push_str("|---:|---:|---:|:---|\n");
        for cluster in &metric.densest {
            section.push_str(&format!(
                "| {:.6} | {:.6} | {} | {} |\n",
                cluster.coordinates[0],
                cluster.coordinates[1],
                cluster.count,
                cluster.dates.as_deref().unwrap_or("-")
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_shapes_section(shapes: &[ShapeSummary]) -> String {
    if shapes.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Shape Layers\n\n");
    section.push_str("| Layer | Category | Color | Shown |\n");
    section.push_str("|:---|:---|:---:|:---:|\n");
    for shape in shapes {
        let shown = match (shape.enabled, shape.visible) {
            (true, true) => "yes",
            (true, false) => "hidden",
            _ => "no",
        };
        section.push_str(&format!(
            "| {} | {} | `{}` | {} |\n",
            shape.label, shape.category, shape.color, shown
        ));
    }
    section.push('\n');

    section
}

fn generate_surface_section(report: &SessionReport) -> String {
    let ops = &report.surface;
    let mut section = String::new();

    section.push_str("## Surface Operations\n\n");
    section.push_str("| Add | Data | Paint | Visibility | Remove | Fit | Failed |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} | {} |\n\n",
        ops.adds,
        ops.data_updates,
        ops.paint_updates,
        ops.visibility_changes,
        ops.removes,
        ops.fits,
        ops.failures
    ));
    section.push_str(&format!(
        "{} reconcile passes, {} surface resets handled.\n\n",
        report.lifecycle.passes, report.lifecycle.rehydrations
    ));

    section
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by civicmap v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SessionReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render `content` to `path`.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
