//! Command-line interface.
//!
//! `calibrate` replays recorded traversal events through a calibration run,
//! one events file per iteration. The remaining subcommands inspect
//! configuration and persisted output.

use crate::context::{CalibrationContext, IterationReport};
use crate::demand::DemandAccumulator;
use crate::exit_codes::ExitCode;
use crate::logging::LogFormat;
use crate::measurement::MeasurementStore;
use crate::persist;
use crate::series::TimeGrid;
use crate::stats::StatisticsLog;
use clap::{ArgAction, Args, Parser, Subcommand};
use flowcal_common::{EntityId, Error, Result, SCHEMA_VERSION};
use flowcal_config::{resolve_config, CalibrationConfig, MeasurementType};
use flowcal_math::SummaryStats;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Closed-loop count calibration.
#[derive(Parser, Debug)]
#[command(name = "flowcal-core", version, about)]
pub struct Cli {
    /// Calibration config file (.json or .toml); falls back to FLOWCAL_CONFIG
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run calibration iterations over recorded traversal events
    Calibrate(CalibrateArgs),
    /// Validate the configuration and print the effective settings
    ValidateConfig,
    /// Summarize a persisted offsets file
    InspectOffsets {
        /// Offsets file (*.costOffsets.jsonl)
        path: PathBuf,
        /// Number of largest offsets to list
        #[arg(long, default_value = "10")]
        top: usize,
    },
    /// Print a statistics table as JSON
    ShowStats {
        /// Statistics table (calibration-stats.tsv)
        path: PathBuf,
    },
}

/// Arguments for the calibrate command
#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// Measured counts: entity<TAB>bin<TAB>value
    #[arg(long, value_name = "TSV")]
    pub counts: PathBuf,

    /// Traversal events of one iteration: entity<TAB>time_s (repeat per iteration)
    #[arg(long = "events", value_name = "TSV", required = true)]
    pub events: Vec<PathBuf>,

    /// Unit of the measured counts (flow_veh_h, count_veh)
    #[arg(long, value_parser = parse_measurement_type, default_value = "flow_veh_h")]
    pub measurement_type: MeasurementType,

    /// Iteration number of the first events file
    #[arg(long, default_value = "0")]
    pub first_iteration: u32,

    /// Start from previously persisted offsets
    #[arg(long, value_name = "PATH")]
    pub offsets_in: Option<PathBuf>,

    /// Directory for per-iteration offsets and the statistics table
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

fn parse_measurement_type(s: &str) -> std::result::Result<MeasurementType, String> {
    match s {
        "flow_veh_h" => Ok(MeasurementType::FlowVehH),
        "count_veh" => Ok(MeasurementType::CountVeh),
        other => Err(format!(
            "unknown measurement type '{other}' (expected flow_veh_h or count_veh)"
        )),
    }
}

/// Run a parsed command line.
pub fn run(cli: &Cli) -> ExitCode {
    let result = match &cli.command {
        Commands::Calibrate(args) => run_calibrate(cli.config.as_deref(), args),
        Commands::ValidateConfig => run_validate_config(cli.config.as_deref()),
        Commands::InspectOffsets { path, top } => run_inspect_offsets(path, *top),
        Commands::ShowStats { path } => run_show_stats(path),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!(code = e.code(), error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

// ── calibrate ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CalibrateSummary {
    run_id: String,
    schema_version: &'static str,
    config_source: Option<PathBuf>,
    output: Option<PathBuf>,
    iterations: Vec<IterationReport>,
    /// Entities with at least one non-zero offset after the last iteration.
    final_offset_entities: usize,
}

fn run_calibrate(config_path: Option<&Path>, args: &CalibrateArgs) -> Result<ExitCode> {
    let (config, config_source) = resolve_config(config_path)?;
    let grid = TimeGrid::from_config(&config)?;
    let counts = BufReader::new(File::open(&args.counts)?);
    let measurements = MeasurementStore::<EntityId>::read_tsv(grid, args.measurement_type, counts)?;

    let mut ctx = CalibrationContext::for_measured_entities(config, measurements)?;
    if let Some(root) = &args.output {
        ctx = ctx.with_output(root);
    }
    if let Some(path) = &args.offsets_in {
        let reader = BufReader::new(File::open(path)?);
        let offsets = persist::read_offsets_for_grid::<EntityId, _>(reader, ctx.grid())?;
        ctx.restore_offsets(offsets)?;
        info!(path = %path.display(), "starting from persisted offsets");
    }

    let last = last_iteration(args.first_iteration, args.events.len())?;
    let mut reports = Vec::with_capacity(args.events.len());
    for (iteration, events_path) in (args.first_iteration..=last).zip(&args.events) {
        let counted = load_events(events_path, &ctx.accumulator())?;
        debug!(iteration, counted, path = %events_path.display(), "events replayed");
        reports.push(ctx.end_iteration(iteration)?);
    }

    let partial = reports.iter().any(|r| !r.persistence_errors.is_empty());
    let summary = CalibrateSummary {
        run_id: ctx.run_id().to_string(),
        schema_version: SCHEMA_VERSION,
        config_source,
        output: ctx.output().map(|layout| layout.root().to_path_buf()),
        iterations: reports,
        final_offset_entities: ctx
            .offsets()
            .rows()
            .filter(|(_, row)| row.iter().any(|v| *v != 0.0))
            .count(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if partial {
        ExitCode::PartialOutput
    } else {
        ExitCode::Ok
    })
}

/// Number of the iteration replaying the last of `files` events files.
fn last_iteration(first: u32, files: usize) -> Result<u32> {
    u32::try_from(files.saturating_sub(1))
        .ok()
        .and_then(|n| first.checked_add(n))
        .ok_or_else(|| {
            Error::InvalidEvent(format!(
                "{files} events files starting at iteration {first} exceed the iteration range"
            ))
        })
}

/// Feed an events file into the accumulator; returns the events counted.
fn load_events(path: &Path, accumulator: &DemandAccumulator<EntityId>) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut counted = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let located = |reason: String| {
            Error::InvalidEvent(format!("{}:{}: {reason}", path.display(), idx + 1))
        };
        let (entity, time) = trimmed
            .split_once('\t')
            .ok_or_else(|| located("expected entity<TAB>time_s".to_string()))?;
        let time_s: f64 = time
            .trim()
            .parse()
            .map_err(|e| located(format!("bad time '{}': {e}", time.trim())))?;
        if accumulator.record(&EntityId::from(entity.trim()), time_s) {
            counted += 1;
        }
    }
    Ok(counted)
}

// ── validate-config ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct ConfigReport {
    valid: bool,
    source: Option<PathBuf>,
    bin_count: usize,
    config: CalibrationConfig,
}

fn run_validate_config(config_path: Option<&Path>) -> Result<ExitCode> {
    let (config, source) = resolve_config(config_path)?;
    let report = ConfigReport {
        valid: true,
        source,
        bin_count: config.bin_count(),
        config,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::Ok)
}

// ── inspect-offsets ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct OffsetCell {
    entity: String,
    bin: usize,
    value: f64,
}

#[derive(Serialize)]
struct OffsetsSummary {
    bin_size_s: u32,
    day_length_s: u32,
    entities: usize,
    nonzero_cells: usize,
    values: SummaryStats,
    largest: Vec<OffsetCell>,
}

fn run_inspect_offsets(path: &Path, top: usize) -> Result<ExitCode> {
    let offsets = persist::load_from_file::<EntityId>(path)?;
    let mut cells: Vec<OffsetCell> = offsets
        .nonzero_cells()
        .map(|(entity, bin, value)| OffsetCell {
            entity: entity.to_string(),
            bin,
            value,
        })
        .collect();
    let values = SummaryStats::from_values(cells.iter().map(|c| c.value));
    let nonzero_cells = cells.len();
    cells.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
    cells.truncate(top);

    let grid = offsets.grid();
    let summary = OffsetsSummary {
        bin_size_s: grid.bin_size_s(),
        day_length_s: grid.day_length_s(),
        entities: offsets.len(),
        nonzero_cells,
        values,
        largest: cells,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::Ok)
}

// ── show-stats ──────────────────────────────────────────────────────────

fn run_show_stats(path: &Path) -> Result<ExitCode> {
    let log = StatisticsLog::read_table(BufReader::new(File::open(path)?))?;
    let rows: Vec<_> = log.iter().collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(ExitCode::Ok)
}
