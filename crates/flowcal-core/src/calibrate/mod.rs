//! Offset calibration against measured counts.
//!
//! The calibrator owns the current cost-offset table and the append-only
//! statistics log. Once per iteration it compares the iteration's demand with
//! the measurements and, depending on the phase, updates the offsets.
//!
//! # Phases
//!
//! ```text
//! iteration <  preparatory_iterations            → Preparatory (offsets unchanged)
//! preparatory_iterations ≤ iteration ≤ freeze    → Active      (offsets updated)
//! iteration >  freeze                            → Frozen      (offsets unchanged)
//! ```
//!
//! Statistics are recorded in every phase.

mod update;

use crate::demand::DemandSnapshot;
use crate::measurement::MeasurementStore;
use crate::series::{SeriesError, TimeBinnedSeries, TimeGrid};
use crate::stats::{CalibrationStatistics, StatisticsLog, StatisticsReporter};
use flowcal_common::EntityKey;
use flowcal_config::{CalibrationConfig, ValidationError};
use flowcal_math::CountVarianceModel;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use update::UpdateOutcome;

/// Errors raised by the calibrator.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("statistics for iteration {0} were already recorded")]
    DuplicateIteration(u32),
}

impl From<CalibrationError> for flowcal_common::Error {
    fn from(err: CalibrationError) -> Self {
        match err {
            CalibrationError::Config(e) => e.into(),
            CalibrationError::Series(e) => e.into(),
            other => flowcal_common::Error::Calibration(other.to_string()),
        }
    }
}

/// Where an iteration sits in the calibration schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Preparatory,
    Active,
    Frozen,
}

/// Estimator core: owns the offsets and the statistics log of one run.
#[derive(Debug)]
pub struct Calibrator<K: EntityKey> {
    config: CalibrationConfig,
    grid: TimeGrid,
    offsets: TimeBinnedSeries<K>,
    reporter: StatisticsReporter<K>,
    log: StatisticsLog,
    last_update: Option<u32>,
}

impl<K: EntityKey> Calibrator<K> {
    /// Create a calibrator with all offsets at zero.
    pub fn new(config: CalibrationConfig) -> Result<Self, CalibrationError> {
        config.validate()?;
        let grid = TimeGrid::from_config(&config)?;
        Ok(Self {
            reporter: StatisticsReporter::new(config.clone()),
            offsets: TimeBinnedSeries::new(grid),
            log: StatisticsLog::new(),
            last_update: None,
            grid,
            config,
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn grid(&self) -> TimeGrid {
        self.grid
    }

    pub fn phase(&self, iteration: u32) -> CalibrationPhase {
        if iteration < self.config.preparatory_iterations {
            CalibrationPhase::Preparatory
        } else if self.config.is_frozen(iteration) {
            CalibrationPhase::Frozen
        } else {
            CalibrationPhase::Active
        }
    }

    /// Current offsets.
    pub fn offsets(&self) -> &TimeBinnedSeries<K> {
        &self.offsets
    }

    /// Iteration of the last offset change, if any.
    pub fn last_update(&self) -> Option<u32> {
        self.last_update
    }

    /// Replace the offsets, e.g. with a table restored from disk.
    pub fn restore_offsets(&mut self, offsets: TimeBinnedSeries<K>) -> Result<(), CalibrationError> {
        offsets.ensure_same_grid(self.grid)?;
        info!(entities = offsets.len(), "cost offsets restored");
        self.offsets = offsets;
        Ok(())
    }

    /// Process one finished iteration and return the resulting offsets.
    pub fn update(
        &mut self,
        iteration: u32,
        demand: &DemandSnapshot<K>,
        measurements: &MeasurementStore<K>,
    ) -> Result<&TimeBinnedSeries<K>, CalibrationError> {
        self.record_iteration(iteration, demand, measurements)?;
        Ok(&self.offsets)
    }

    /// Fail with [`CalibrationError::DuplicateIteration`] if `iteration` was
    /// already recorded.
    pub fn check_iteration(&self, iteration: u32) -> Result<(), CalibrationError> {
        if self.log.contains(iteration) {
            return Err(CalibrationError::DuplicateIteration(iteration));
        }
        Ok(())
    }

    /// Same as [`Calibrator::update`], returning the iteration's statistics.
    pub fn record_iteration(
        &mut self,
        iteration: u32,
        demand: &DemandSnapshot<K>,
        measurements: &MeasurementStore<K>,
    ) -> Result<CalibrationStatistics, CalibrationError> {
        demand.counts.ensure_same_grid(self.grid)?;
        self.offsets.ensure_same_grid(measurements.grid())?;
        self.check_iteration(iteration)?;
        if let Some(latest) = self.log.latest_iteration() {
            if iteration < latest {
                warn!(iteration, latest, "iteration number went backwards");
            }
        }

        let phase = self.phase(iteration);
        match phase {
            CalibrationPhase::Active => {
                let outcome =
                    update::apply(&self.config, &mut self.offsets, &demand.counts, measurements)?;
                self.last_update = Some(iteration);
                debug!(
                    iteration,
                    cells = outcome.updated_cells,
                    max_abs_change = outcome.max_abs_change,
                    recentered_by = ?outcome.recentered_by,
                    "offsets updated"
                );
            }
            CalibrationPhase::Preparatory | CalibrationPhase::Frozen => {
                debug!(iteration, ?phase, "offsets left unchanged");
            }
        }

        let stats = self
            .reporter
            .record(iteration, demand, measurements, &self.offsets);
        info!(
            iteration,
            ?phase,
            count_ll = stats.count_ll,
            total_ll = stats.total_ll,
            "calibration iteration recorded"
        );
        self.log.append(stats.clone())?;
        Ok(stats)
    }

    /// Statistics recorded for an iteration.
    pub fn statistics_for(&self, iteration: u32) -> Option<&CalibrationStatistics> {
        self.log.get(iteration)
    }

    pub fn log(&self) -> &StatisticsLog {
        &self.log
    }
}

/// Variance model for the store's measurement type under a config.
pub(crate) fn variance_model(
    config: &CalibrationConfig,
    kind: flowcal_config::MeasurementType,
) -> CountVarianceModel {
    CountVarianceModel::new(config.min_stddev(kind), config.variance_scale)
}

/// Measured cells that take part in calibration: selected entity, bin in window.
pub(crate) fn calibrated_cells<'a, K: EntityKey>(
    config: &'a CalibrationConfig,
    measurements: &'a MeasurementStore<K>,
) -> impl Iterator<Item = (&'a K, usize, f64)> + 'a {
    measurements.iter_measured().filter(move |(entity, bin, _)| {
        config.bin_in_window(*bin) && config.calibrated_entities.contains(&entity.to_string())
    })
}
