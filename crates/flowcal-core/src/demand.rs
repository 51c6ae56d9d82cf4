//! Per-iteration demand accumulation.
//!
//! Simulation worker threads report traversals concurrently while an
//! iteration runs; the replanning plugin registers plan trajectories the same
//! way. Each (entity, bin) cell is an atomic counter, so increments on
//! unrelated cells never contend. The entity universe is fixed at
//! construction; traversals of unknown entities are counted as dropped and
//! otherwise ignored.
//!
//! [`DemandAccumulator::snapshot`] hands the finished iteration's counts to the
//! calibrator and resets every counter for the next iteration.

use crate::series::{TimeBinnedSeries, TimeGrid};
use crate::trajectory::Trajectory;
use flowcal_common::EntityKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Immutable view of one iteration's accumulated demand.
#[derive(Debug, Clone)]
pub struct DemandSnapshot<K: EntityKey> {
    /// Count per entity and bin.
    pub counts: TimeBinnedSeries<K>,
    /// Calibration correction of every registered plan, in registration order.
    pub plan_corrections: Vec<f64>,
    /// Individual traversal events recorded.
    pub events_recorded: u64,
    /// Plans registered through [`DemandAccumulator::add_to_demand`].
    pub plans_registered: u64,
    /// Traversals ignored because their entity or time was unusable.
    pub dropped: u64,
}

impl<K: EntityKey> DemandSnapshot<K> {
    /// Snapshot made of plain counts, without plan-level information.
    pub fn from_counts(counts: TimeBinnedSeries<K>) -> Self {
        Self {
            counts,
            plan_corrections: Vec::new(),
            events_recorded: 0,
            plans_registered: 0,
            dropped: 0,
        }
    }

    pub fn grid(&self) -> TimeGrid {
        self.counts.grid()
    }
}

/// Thread-safe demand counter for one calibration run.
#[derive(Debug)]
pub struct DemandAccumulator<K: EntityKey> {
    grid: TimeGrid,
    cells: HashMap<K, Box<[AtomicU64]>>,
    plan_corrections: Mutex<Vec<f64>>,
    events_recorded: AtomicU64,
    plans_registered: AtomicU64,
    dropped: AtomicU64,
}

impl<K: EntityKey> DemandAccumulator<K> {
    /// Create an accumulator over a fixed entity universe.
    pub fn new<I>(grid: TimeGrid, entities: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let cells = entities
            .into_iter()
            .map(|entity| {
                let row: Box<[AtomicU64]> =
                    (0..grid.bin_count()).map(|_| AtomicU64::new(0)).collect();
                (entity, row)
            })
            .collect();
        Self {
            grid,
            cells,
            plan_corrections: Mutex::new(Vec::new()),
            events_recorded: AtomicU64::new(0),
            plans_registered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn grid(&self) -> TimeGrid {
        self.grid
    }

    pub fn contains(&self, entity: &K) -> bool {
        self.cells.contains_key(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.cells.len()
    }

    /// Record one traversal. Returns whether it was counted.
    ///
    /// Times past the end of the day land in the last bin, negative times in
    /// the first one.
    pub fn record(&self, entity: &K, time_s: f64) -> bool {
        let counted = self.increment(entity, time_s);
        if counted {
            self.events_recorded.fetch_add(1, Ordering::Relaxed);
        }
        counted
    }

    /// Register a plan's trajectory as demand and log its plan-level correction.
    ///
    /// Returns the number of steps that were counted.
    pub fn add_to_demand(&self, trajectory: &Trajectory<K>, correction: f64) -> usize {
        let counted = trajectory
            .steps()
            .iter()
            .filter(|step| self.increment(&step.entity, step.time_s))
            .count();
        self.plans_registered.fetch_add(1, Ordering::Relaxed);
        self.plan_corrections.lock().push(correction);
        counted
    }

    fn increment(&self, entity: &K, time_s: f64) -> bool {
        let Some(row) = self.cells.get(entity) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let Some(bin) = self.grid.clamped_bin_index(time_s) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        row[bin].fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Count currently held for one cell (diagnostics).
    pub fn count(&self, entity: &K, bin: usize) -> u64 {
        self.cells
            .get(entity)
            .and_then(|row| row.get(bin))
            .map_or(0, |cell| cell.load(Ordering::Relaxed))
    }

    /// Take the accumulated counts and reset for the next iteration.
    ///
    /// Callers must stop delivering events for the finished iteration before
    /// taking the snapshot; increments racing with it land in either this
    /// snapshot or the next one, never both.
    pub fn snapshot(&self) -> DemandSnapshot<K> {
        let mut counts = TimeBinnedSeries::new(self.grid);
        for (entity, row) in &self.cells {
            let values: Vec<f64> = row
                .iter()
                .map(|cell| cell.swap(0, Ordering::AcqRel) as f64)
                .collect();
            if values.iter().any(|v| *v != 0.0) {
                // Row length always matches the grid.
                let _ = counts.insert_row(entity.clone(), values);
            }
        }
        let plan_corrections = std::mem::take(&mut *self.plan_corrections.lock());
        let snapshot = DemandSnapshot {
            counts,
            plan_corrections,
            events_recorded: self.events_recorded.swap(0, Ordering::AcqRel),
            plans_registered: self.plans_registered.swap(0, Ordering::AcqRel),
            dropped: self.dropped.swap(0, Ordering::AcqRel),
        };
        debug!(
            events = snapshot.events_recorded,
            plans = snapshot.plans_registered,
            dropped = snapshot.dropped,
            total = snapshot.counts.total(),
            "demand snapshot taken"
        );
        snapshot
    }
}
