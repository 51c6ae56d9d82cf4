//! flowcal core library.
//!
//! Closed-loop calibration of simulated demand against measured counts:
//! traversal events accumulate per entity and time bin, the calibrator turns
//! the gap to the measurements into per-cell cost offsets, and the scoring
//! adapter feeds those offsets back into agent utilities for the next
//! iteration.

pub mod calibrate;
pub mod cli;
pub mod context;
pub mod demand;
pub mod exit_codes;
pub mod logging;
pub mod measurement;
pub mod persist;
pub mod registrar;
pub mod scoring;
pub mod series;
pub mod stats;
pub mod trajectory;

pub use calibrate::{CalibrationError, CalibrationPhase, Calibrator};
pub use context::{CalibrationContext, IterationReport, OutputLayout};
pub use demand::{DemandAccumulator, DemandSnapshot};
pub use measurement::{MeasurementError, MeasurementStore};
pub use persist::PersistenceError;
pub use registrar::{PlanRegistrar, PlanSelection};
pub use scoring::ScoringAdapter;
pub use series::{SeriesError, TimeBinnedSeries, TimeGrid};
pub use stats::{CalibrationStatistics, StatisticsLog, StatisticsReporter};
pub use trajectory::{CandidatePlan, PenaltySink, Trajectory, TrajectorySource};
