//! civicmap - geospatial metric map engine for civic-data dashboards
//!
//! Loads metric records from a dashboard backend or fixture directory,
//! drives a map session against an in-memory rendering surface and writes
//! a session report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, backend unreachable, report not written, etc.)

use anyhow::{Context, Result};
use chrono::Utc;
use civicmap::cli::{Args, OutputFormat};
use civicmap::config::{Config, CONFIG_FILE_NAME};
use civicmap::engine::MapSession;
use civicmap::loader::{CityStructureBackend, FileBackend, HttpBackend, MetricsBackend, Settled};
use civicmap::models::{DateRange, MetricDescriptor};
use civicmap::report::{self, ReportMetadata, SessionReport};
use civicmap::surface::RecordingSurface;
use civicmap::temporal::TimelineState;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args)?;

    info!("civicmap v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .civicmap.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to set the backend, palette, timeline and aggregation options.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Backends selected by the configuration.
struct Backends {
    metrics: Arc<dyn MetricsBackend>,
    shapes: Arc<dyn CityStructureBackend>,
    source: String,
}

fn build_backends(config: &Config) -> Result<Backends> {
    if let Some(ref dir) = config.backend.fixtures_dir {
        info!("Using fixture backend at {}", dir.display());
        let backend = Arc::new(FileBackend::new(dir.clone()));
        return Ok(Backends {
            metrics: backend.clone(),
            shapes: backend,
            source: dir.display().to_string(),
        });
    }

    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    Ok(Backends {
        metrics: backend.clone(),
        shapes: backend,
        source: config.backend.base_url.clone(),
    })
}

/// Run the complete session workflow. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let backends = build_backends(&config)?;
    let city = match config.backend.city_id.clone() {
        Some(city) => city,
        None if config.backend.fixtures_dir.is_some() => "local".to_string(),
        None => anyhow::bail!("No city configured (use --city or [backend] city_id)"),
    };

    // Step 1: Metric catalog
    let catalog = backends
        .metrics
        .list_map_eligible_metrics(&city)
        .await
        .with_context(|| format!("Failed to list metrics for city {}", city))?;

    if args.list_metrics {
        print_catalog(&city, &catalog);
        return Ok(0);
    }

    if args.metrics.is_empty() && args.shapes.is_empty() {
        println!("Nothing selected. Use --metric or --shape (see --list-metrics).");
        return Ok(0);
    }

    let mut session = MapSession::new(&config, backends.metrics.clone());
    session.set_catalog(catalog);

    // Step 2: Shape layers
    if !args.shapes.is_empty() {
        match backends.shapes.list_shape_instances(&city).await {
            Ok(instances) => {
                info!("Loaded {} shape instances", instances.len());
                session.set_shapes(instances);
            }
            Err(e) => warn!("Failed to load shape layers: {}", e),
        }
        for shape_id in &args.shapes {
            if !session.toggle_shape(shape_id) {
                warn!("Unknown shape layer {}, skipping", shape_id);
            }
        }
    }

    // Step 3: Metric data
    let range = match (args.from, args.to) {
        (Some(from), Some(to)) => Some(DateRange::new(from, to)),
        _ => None,
    };
    session.set_date_range(range);

    let mut handles = Vec::new();
    for metric_id in &args.metrics {
        if session.metric(metric_id).is_none() {
            warn!("Metric {} is not map-eligible in {}, skipping", metric_id, city);
            continue;
        }
        handles.extend(session.select_metric(metric_id));
    }

    if !handles.is_empty() {
        let spinner = if args.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        spinner.set_message(format!("Loading {} metrics...", handles.len()));
        spinner.enable_steady_tick(Duration::from_millis(100));

        let ids: Vec<String> = handles.iter().map(|h| h.ticket.metric_id.clone()).collect();
        let settled = session.complete_all(handles).await;
        spinner.finish_and_clear();
        report_load_outcomes(&session, &ids, &settled);
    }

    // Step 4: Render
    let mut surface = RecordingSurface::new();
    if let Some(date) = args.date {
        session.set_timeline(TimelineState {
            selected_date: Some(date),
            is_playing: false,
        });
    }
    let first = session.refresh(&mut surface);
    if !first.is_clean() {
        warn!("{} layers failed to render", first.failures.len());
    }

    let played_days = match (args.play, range) {
        (true, Some(range)) => play_timeline(&mut session, &mut surface, range, &config, args.quiet).await?,
        _ => 0,
    };

    // Step 5: Report
    let metadata = ReportMetadata {
        city_id: city.clone(),
        source: backends.source.clone(),
        generated_at: Utc::now(),
        date_range: range,
        selected_date: session.timeline().selected_date,
        played_days,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let session_report = SessionReport::build(&session, surface.op_counts(), metadata);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&session_report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&session_report),
    };

    let output_path = PathBuf::from(&config.general.output);
    report::write_report(&output, &output_path)?;

    if !args.quiet {
        println!("\n📊 Session Summary:");
        println!("   Metrics selected: {}", session_report.metrics.len());
        println!("   Records loaded: {}", session_report.total_records());
        println!("   Visible layers: {}", session_report.legend.len());
        println!("   Surface operations: {}", session_report.surface.total());
        println!(
            "   Duration: {:.1}s",
            session_report.metadata.duration_seconds
        );
        println!(
            "\n✅ Report saved to: {}",
            output_path.display()
        );
    }

    Ok(0)
}

/// Step the timeline one day at a time across `range`.
async fn play_timeline(
    session: &mut MapSession,
    surface: &mut RecordingSurface,
    range: DateRange,
    config: &Config,
    quiet: bool,
) -> Result<usize> {
    let days = range.len_days().max(0) as u64;
    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(days)
    };
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    session.set_timeline(TimelineState {
        selected_date: Some(range.start),
        is_playing: true,
    });

    let delay = Duration::from_millis(config.timeline.tick_millis);
    let mut played = 0;
    for day in range.days() {
        progress.set_message(day.to_string());
        let tick = session.tick(day, surface);
        for (layer, e) in &tick.failures {
            warn!("Tick {} failed on {}: {}", day, layer, e);
        }
        played += 1;
        progress.inc(1);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    progress.finish_and_clear();

    // Park the scrubber on the last day.
    session.set_timeline(TimelineState {
        selected_date: Some(range.end),
        is_playing: false,
    });
    session.refresh(surface);

    info!("Played {} timeline days", played);
    Ok(played)
}

fn report_load_outcomes(session: &MapSession, ids: &[String], settled: &[Settled]) {
    for (metric_id, outcome) in ids.iter().zip(settled) {
        match outcome {
            Settled::Loaded => {
                let features = session
                    .dataset(metric_id)
                    .map(|d| d.features.features.len())
                    .unwrap_or(0);
                info!("Metric {} ready with {} features", metric_id, features);
            }
            Settled::NoData => {
                println!("   ⚠️  {} is not available on the map", metric_id);
            }
            Settled::Failed(e) => {
                warn!("Metric {} failed to load: {}", metric_id, e);
            }
            Settled::Discarded => {
                debug!("Response for metric {} was superseded", metric_id);
            }
        }
    }
}

fn print_catalog(city: &str, catalog: &[MetricDescriptor]) {
    if catalog.is_empty() {
        println!("No map-eligible metrics for {}.", city);
        return;
    }

    println!("Map-eligible metrics for {}:\n", city);
    let mut sorted: Vec<&MetricDescriptor> = catalog.iter().collect();
    sorted.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)));
    for metric in sorted {
        println!("  {:<24} {:<16} {}", metric.id, metric.category, metric.name);
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
