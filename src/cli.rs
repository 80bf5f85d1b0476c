//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// civicmap - metric map engine for civic-data dashboards
///
/// Loads geolocated metric records from a dashboard backend (or a fixture
/// directory), aggregates them into map layers, optionally plays the
/// timeline, and writes a session report.
///
/// Examples:
///   civicmap --fixtures ./fixtures --city sf --metric potholes
///   civicmap --backend-url https://dash.example.org/api --city sf --list-metrics
///   civicmap --fixtures ./fixtures --city sf --metric potholes --shape districts \
///       --from 2024-06-01 --to 2024-06-14 --play --format json
///   civicmap --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Dashboard API base URL
    ///
    /// Can also be set via CIVICMAP_BACKEND_URL or .civicmap.toml.
    #[arg(long, value_name = "URL", env = "CIVICMAP_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Read backend responses from a fixture directory instead of HTTP
    #[arg(long, value_name = "DIR", conflicts_with = "backend_url")]
    pub fixtures: Option<PathBuf>,

    /// City whose metrics and shapes to load
    #[arg(long, value_name = "ID", env = "CIVICMAP_CITY")]
    pub city: Option<String>,

    /// Bearer token for the dashboard API
    #[arg(long, value_name = "TOKEN", env = "CIVICMAP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Metric to select (repeatable)
    #[arg(short, long = "metric", value_name = "ID")]
    pub metrics: Vec<String>,

    /// Shape layer to enable (repeatable)
    #[arg(short, long = "shape", value_name = "ID")]
    pub shapes: Vec<String>,

    /// First day of the query range (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "to")]
    pub from: Option<NaiveDate>,

    /// Last day of the query range (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "from")]
    pub to: Option<NaiveDate>,

    /// Timeline date to style against
    #[arg(long, value_name = "DATE")]
    pub date: Option<NaiveDate>,

    /// Play the timeline day by day across the query range
    #[arg(long, requires = "from")]
    pub play: bool,

    /// Delay between timeline ticks in milliseconds
    #[arg(long, value_name = "MS")]
    pub tick_millis: Option<u64>,

    /// Coordinate rounding precision (decimal places)
    #[arg(long, value_name = "DIGITS")]
    pub precision: Option<u32>,

    /// Output file path for the report
    ///
    /// Defaults to the config value (civicmap_report.md).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .civicmap.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List map-eligible metrics and exit
    #[arg(long)]
    pub list_metrics: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .civicmap.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Backend URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref dir) = self.fixtures {
            if !dir.is_dir() {
                return Err(format!(
                    "Fixture directory does not exist: {}",
                    dir.display()
                ));
            }
        }

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err("--from must not be after --to".to_string());
            }
        }

        if let Some(precision) = self.precision {
            if precision > 10 {
                return Err("Precision must be at most 10 decimal places".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
