//! Offset-based utility corrections for agent scoring.
//!
//! The adapter holds an immutable view of the offsets published at the end of
//! the previous iteration. Every step of a trajectory contributes the offset
//! of its (entity, bin) cell; the sum, scaled by the calibration weight, is
//! added to the agent's score. Traversals past the end of the day fall into
//! the last bin.

use crate::series::TimeBinnedSeries;
use crate::trajectory::{PenaltySink, Trajectory, TrajectorySource};
use flowcal_common::EntityKey;
use std::sync::Arc;

/// Read-only scoring view over published offsets.
#[derive(Debug, Clone)]
pub struct ScoringAdapter<K: EntityKey> {
    offsets: Arc<TimeBinnedSeries<K>>,
    weight: f64,
}

impl<K: EntityKey> ScoringAdapter<K> {
    pub fn new(offsets: Arc<TimeBinnedSeries<K>>, weight: f64) -> Self {
        Self { offsets, weight }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn offsets(&self) -> &TimeBinnedSeries<K> {
        &self.offsets
    }

    /// Unweighted sum of the offsets along a trajectory.
    pub fn correction_for(&self, trajectory: &Trajectory<K>) -> f64 {
        trajectory
            .steps()
            .iter()
            .map(|step| self.offsets.get_clamped(&step.entity, step.time_s))
            .sum()
    }

    /// Weighted utility correction for a trajectory.
    pub fn penalty_for(&self, trajectory: &Trajectory<K>) -> f64 {
        self.weight * self.correction_for(trajectory)
    }

    /// Score a source's trajectory into a sink; returns the added penalty.
    pub fn score<S, P>(&self, source: &S, sink: &mut P) -> f64
    where
        S: TrajectorySource<K> + ?Sized,
        P: PenaltySink + ?Sized,
    {
        let penalty = self.penalty_for(&source.trajectory());
        sink.add_penalty(penalty);
        penalty
    }
}
