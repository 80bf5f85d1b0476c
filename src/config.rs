//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.civicmap.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".civicmap.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Metrics backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Point aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Timeline fade settings.
    #[serde(default)]
    pub timeline: TimelineConfig,

    /// Color palette.
    #[serde(default)]
    pub palette: PaletteConfig,

    /// Layer paint settings.
    #[serde(default)]
    pub render: RenderConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report output path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "civicmap_report.md".to_string()
}

/// Metrics backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the metrics API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Directory with fixture data; when set, replaces the HTTP backend.
    #[serde(default)]
    pub fixtures_dir: Option<PathBuf>,

    /// City whose metrics and shapes are shown.
    #[serde(default)]
    pub city_id: Option<String>,

    /// Bearer token from the authentication provider.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            fixtures_dir: None,
            city_id: None,
            auth_token: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Point aggregation settings.
///
/// Which string fields get a category summary is a heuristic; the denylist
/// and thresholds are kept here so deployments can tune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Decimal places coordinates are rounded to before grouping.
    #[serde(default = "default_precision")]
    pub precision: u32,

    /// Cluster scale at one record.
    #[serde(default = "default_scale_base")]
    pub scale_base: f64,

    /// Cluster scale growth per natural-log unit of count.
    #[serde(default = "default_scale_step")]
    pub scale_step: f64,

    /// Upper bound of the cluster scale.
    #[serde(default = "default_scale_max")]
    pub scale_max: f64,

    /// Fields never summarized as categories.
    #[serde(default = "default_category_denylist")]
    pub category_denylist: Vec<String>,

    /// Distinct values listed before the "+K more" suffix.
    #[serde(default = "default_listed_values")]
    pub listed_values: usize,

    /// Distinct value count above which a summary is truncated.
    #[serde(default = "default_truncate_after")]
    pub truncate_after: usize,

    /// Distinct dates listed before switching to a range summary.
    #[serde(default = "default_listed_dates")]
    pub listed_dates: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            precision: default_precision(),
            scale_base: default_scale_base(),
            scale_step: default_scale_step(),
            scale_max: default_scale_max(),
            category_denylist: default_category_denylist(),
            listed_values: default_listed_values(),
            truncate_after: default_truncate_after(),
            listed_dates: default_listed_dates(),
        }
    }
}

fn default_precision() -> u32 {
    6 // ~0.11 m
}

fn default_scale_base() -> f64 {
    0.4
}

fn default_scale_step() -> f64 {
    0.2
}

fn default_scale_max() -> f64 {
    1.5
}

fn default_category_denylist() -> Vec<String> {
    vec![
        "id",
        "lat",
        "lon",
        "lng",
        "latitude",
        "longitude",
        "location",
        "coordinates",
        "geometry",
        "point",
        "address",
        "dates",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_listed_values() -> usize {
    3
}

fn default_truncate_after() -> usize {
    5
}

fn default_listed_dates() -> usize {
    3
}

/// Timeline fade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Length of the playback trail in days.
    #[serde(default = "default_fade_days")]
    pub fade_days: i64,

    /// Age in days after which a trailing feature is stale.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,

    /// Opacity used when no date is selected.
    #[serde(default = "default_static_opacity")]
    pub static_opacity: f64,

    /// Delay between playback ticks in the CLI, in milliseconds.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            fade_days: default_fade_days(),
            stale_after_days: default_stale_after_days(),
            static_opacity: default_static_opacity(),
            tick_millis: default_tick_millis(),
        }
    }
}

fn default_fade_days() -> i64 {
    7
}

fn default_stale_after_days() -> i64 {
    3
}

fn default_static_opacity() -> f64 {
    0.8
}

fn default_tick_millis() -> u64 {
    0
}

/// Color palette shared by metric and shape layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteConfig {
    /// Ordered list of hex colors.
    #[serde(default = "default_colors")]
    pub colors: Vec<String>,

    /// How far stale features are mixed toward grey (0.0 - 1.0).
    #[serde(default = "default_stale_desaturation")]
    pub stale_desaturation: f64,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            colors: default_colors(),
            stale_desaturation: default_stale_desaturation(),
        }
    }
}

pub(crate) fn default_colors() -> Vec<String> {
    vec![
        "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
        "#bcbd22", "#17becf",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_stale_desaturation() -> f64 {
    0.6
}

/// Layer paint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Base circle radius in pixels, multiplied by feature scale.
    #[serde(default = "default_circle_radius")]
    pub circle_radius: f64,

    /// Fill opacity of shape layers.
    #[serde(default = "default_shape_fill_opacity")]
    pub shape_fill_opacity: f64,

    /// Outline width of shape layers.
    #[serde(default = "default_shape_line_width")]
    pub shape_line_width: f64,

    /// Padding in pixels when fitting the view to bounds.
    #[serde(default = "default_fit_padding")]
    pub fit_padding: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            circle_radius: default_circle_radius(),
            shape_fill_opacity: default_shape_fill_opacity(),
            shape_line_width: default_shape_line_width(),
            fit_padding: default_fit_padding(),
        }
    }
}

fn default_circle_radius() -> f64 {
    12.0
}

fn default_shape_fill_opacity() -> f64 {
    0.15
}

fn default_shape_line_width() -> f64 {
    2.0
}

fn default_fit_padding() -> u32 {
    40
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.civicmap.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.timeline.fade_days <= 0 {
            anyhow::bail!("timeline.fade_days must be at least 1");
        }
        if self.timeline.stale_after_days < 0 {
            anyhow::bail!("timeline.stale_after_days must not be negative");
        }
        if !(0.0..=1.0).contains(&self.timeline.static_opacity) {
            anyhow::bail!("timeline.static_opacity must be between 0.0 and 1.0");
        }
        if self.aggregation.precision > 10 {
            anyhow::bail!("aggregation.precision must be at most 10");
        }
        if self.aggregation.listed_values == 0 {
            anyhow::bail!("aggregation.listed_values must be at least 1");
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only explicitly provided values override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.backend_url {
            self.backend.base_url = url.clone();
        }
        if let Some(ref dir) = args.fixtures {
            self.backend.fixtures_dir = Some(dir.clone());
        }
        if let Some(ref city) = args.city {
            self.backend.city_id = Some(city.clone());
        }
        if let Some(ref token) = args.token {
            self.backend.auth_token = Some(token.clone());
        }
        if let Some(timeout) = args.timeout {
            self.backend.timeout_seconds = timeout;
        }
        if let Some(precision) = args.precision {
            self.aggregation.precision = precision;
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(tick) = args.tick_millis {
            self.timeline.tick_millis = tick;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
