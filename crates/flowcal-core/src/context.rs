//! Per-run calibration context.
//!
//! One [`CalibrationContext`] exists per calibration run. It hands out the
//! shared demand accumulator to event producers, scoring adapters and plan
//! registrars to the replanning side, and at the end of every iteration runs
//! the calibrator and publishes the new offsets.
//!
//! # Iteration boundary
//!
//! ```text
//! accumulator.snapshot() → calibrator.update() → publish offsets → persist
//! ```
//!
//! Scoring adapters created before the boundary keep the offsets they were
//! created with; adapters created after it see the new table.

use crate::calibrate::{CalibrationError, CalibrationPhase, Calibrator};
use crate::demand::DemandAccumulator;
use crate::measurement::MeasurementStore;
use crate::persist::{self, PersistenceError};
use crate::registrar::PlanRegistrar;
use crate::scoring::ScoringAdapter;
use crate::series::{TimeBinnedSeries, TimeGrid};
use crate::stats::{CalibrationStatistics, StatisticsLog};
use flowcal_common::{EntityKey, RunId};
use flowcal_config::CalibrationConfig;
use serde::Serialize;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the statistics table under the output root.
pub const STATS_FILE: &str = "calibration-stats.tsv";

/// Per-iteration output directory prefix.
const ITERS_DIR: &str = "ITERS";

/// Where a run writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/ITERS/it.<n>/<n>.costOffsets.jsonl`
    pub fn offsets_path(&self, iteration: u32) -> PathBuf {
        self.root
            .join(ITERS_DIR)
            .join(format!("it.{iteration}"))
            .join(format!("{iteration}.costOffsets.jsonl"))
    }

    pub fn stats_path(&self) -> PathBuf {
        self.root.join(STATS_FILE)
    }
}

/// What happened at one iteration boundary.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: u32,
    pub phase: CalibrationPhase,
    pub statistics: CalibrationStatistics,
    pub events_recorded: u64,
    pub plans_registered: u64,
    pub dropped: u64,
    /// Offsets file written this iteration.
    pub offsets_file: Option<PathBuf>,
    /// Persistence failures that were logged and skipped.
    pub persistence_errors: Vec<String>,
}

/// Wiring of one calibration run.
#[derive(Debug)]
pub struct CalibrationContext<K: EntityKey> {
    run_id: RunId,
    measurements: Arc<MeasurementStore<K>>,
    accumulator: Arc<DemandAccumulator<K>>,
    calibrator: Calibrator<K>,
    published: Arc<TimeBinnedSeries<K>>,
    output: Option<OutputLayout>,
}

impl<K: EntityKey> CalibrationContext<K> {
    /// Context over an explicit entity universe.
    pub fn new<I>(
        config: CalibrationConfig,
        measurements: MeasurementStore<K>,
        entities: I,
    ) -> Result<Self, CalibrationError>
    where
        I: IntoIterator<Item = K>,
    {
        let calibrator = Calibrator::new(config)?;
        let grid = calibrator.grid();
        TimeBinnedSeries::<K>::new(grid).ensure_same_grid(measurements.grid())?;

        let accumulator = Arc::new(DemandAccumulator::new(grid, entities));
        let run_id = RunId::new();
        info!(
            run_id = %run_id,
            entities = accumulator.entity_count(),
            measured_cells = measurements.len(),
            bins = grid.bin_count(),
            "calibration context created"
        );
        Ok(Self {
            run_id,
            measurements: Arc::new(measurements),
            accumulator,
            published: Arc::new(calibrator.offsets().clone()),
            calibrator,
            output: None,
        })
    }

    /// Context whose entity universe is the set of measured entities.
    pub fn for_measured_entities(
        config: CalibrationConfig,
        measurements: MeasurementStore<K>,
    ) -> Result<Self, CalibrationError> {
        let entities: Vec<K> = measurements.entities().cloned().collect();
        Self::new(config, measurements, entities)
    }

    /// Write offsets and statistics under `root`.
    pub fn with_output(mut self, root: impl Into<PathBuf>) -> Self {
        self.output = Some(OutputLayout::new(root));
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn config(&self) -> &CalibrationConfig {
        self.calibrator.config()
    }

    pub fn grid(&self) -> TimeGrid {
        self.calibrator.grid()
    }

    pub fn output(&self) -> Option<&OutputLayout> {
        self.output.as_ref()
    }

    pub fn measurements(&self) -> &Arc<MeasurementStore<K>> {
        &self.measurements
    }

    /// Shared accumulator for event producers.
    pub fn accumulator(&self) -> Arc<DemandAccumulator<K>> {
        Arc::clone(&self.accumulator)
    }

    /// Offsets published at the last iteration boundary.
    pub fn offsets(&self) -> Arc<TimeBinnedSeries<K>> {
        Arc::clone(&self.published)
    }

    pub fn scoring_adapter(&self, weight: f64) -> ScoringAdapter<K> {
        ScoringAdapter::new(self.offsets(), weight)
    }

    pub fn registrar(&self, weight: f64) -> PlanRegistrar<K> {
        PlanRegistrar::new(self.accumulator(), self.scoring_adapter(weight))
    }

    pub fn calibrator(&self) -> &Calibrator<K> {
        &self.calibrator
    }

    pub fn statistics(&self) -> &StatisticsLog {
        self.calibrator.log()
    }

    /// Start from previously persisted offsets.
    pub fn restore_offsets(&mut self, offsets: TimeBinnedSeries<K>) -> Result<(), CalibrationError> {
        self.calibrator.restore_offsets(offsets)?;
        self.published = Arc::new(self.calibrator.offsets().clone());
        Ok(())
    }

    /// Close an iteration: snapshot demand, update and publish offsets, persist.
    ///
    /// A repeated iteration is rejected before demand is snapshotted, so the
    /// pending counts carry over to the next call. Persistence failures are
    /// logged and reported but do not fail the call.
    pub fn end_iteration(&mut self, iteration: u32) -> Result<IterationReport, CalibrationError> {
        self.calibrator.check_iteration(iteration)?;
        let demand = self.accumulator.snapshot();
        let phase = self.calibrator.phase(iteration);
        let statistics = self
            .calibrator
            .record_iteration(iteration, &demand, &self.measurements)?;
        self.published = Arc::new(self.calibrator.offsets().clone());

        let mut report = IterationReport {
            iteration,
            phase,
            statistics,
            events_recorded: demand.events_recorded,
            plans_registered: demand.plans_registered,
            dropped: demand.dropped,
            offsets_file: None,
            persistence_errors: Vec::new(),
        };
        if let Some(layout) = &self.output {
            self.persist(layout, iteration, &mut report);
        }
        Ok(report)
    }

    fn persist(&self, layout: &OutputLayout, iteration: u32, report: &mut IterationReport) {
        let interval = self.config().write_offsets_interval;
        if interval > 0 && iteration % interval == 0 {
            let path = layout.offsets_path(iteration);
            match persist::save_to_file(self.published.as_ref(), &path) {
                Ok(()) => report.offsets_file = Some(path),
                Err(e) => {
                    warn!(error = %e, iteration, "failed to write offsets, continuing");
                    report.persistence_errors.push(e.to_string());
                }
            }
        }
        if let Err(e) = write_stats_table(self.statistics(), &layout.stats_path()) {
            warn!(error = %e, iteration, "failed to write statistics, continuing");
            report.persistence_errors.push(e.to_string());
        }
    }
}

fn write_stats_table(log: &StatisticsLog, path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    log.write_table(BufWriter::new(file))?;
    Ok(())
}
