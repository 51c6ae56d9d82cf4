//! Agent trajectories and the capability traits the calibration core needs
//! from the surrounding scoring and replanning frameworks.

use flowcal_common::EntityKey;
use serde::{Deserialize, Serialize};

/// One traversal: an entity passed at a simulated time (seconds since midnight).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep<K> {
    pub entity: K,
    pub time_s: f64,
}

/// Ordered sequence of traversals realized (or predicted) by one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory<K> {
    steps: Vec<TrajectoryStep<K>>,
}

impl<K: EntityKey> Trajectory<K> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, entity: K, time_s: f64) {
        self.steps.push(TrajectoryStep { entity, time_s });
    }

    pub fn steps(&self) -> &[TrajectoryStep<K>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<K: EntityKey> Default for Trajectory<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityKey> FromIterator<(K, f64)> for Trajectory<K> {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            steps: iter
                .into_iter()
                .map(|(entity, time_s)| TrajectoryStep { entity, time_s })
                .collect(),
        }
    }
}

/// Anything that can describe the entities it traverses.
pub trait TrajectorySource<K: EntityKey> {
    fn trajectory(&self) -> Trajectory<K>;
}

impl<K: EntityKey> TrajectorySource<K> for Trajectory<K> {
    fn trajectory(&self) -> Trajectory<K> {
        self.clone()
    }
}

/// Receiver of a utility correction (typically an agent's score accumulator).
pub trait PenaltySink {
    fn add_penalty(&mut self, value: f64);
}

impl PenaltySink for f64 {
    fn add_penalty(&mut self, value: f64) {
        *self += value;
    }
}

/// A plan offered to the registrar: a trajectory plus its current score.
pub trait CandidatePlan<K: EntityKey>: TrajectorySource<K> {
    /// Score assigned by the host framework; `None` for unscored plans.
    fn base_score(&self) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcal_common::EntityId;

    #[test]
    fn collect_from_pairs() {
        let t: Trajectory<EntityId> = [(EntityId::from("a"), 10.0), (EntityId::from("b"), 20.0)]
            .into_iter()
            .collect();
        assert_eq!(t.len(), 2);
        assert_eq!(t.steps()[1].entity, EntityId::from("b"));
    }

    #[test]
    fn f64_sink_accumulates() {
        let mut score = 1.0;
        score.add_penalty(0.5);
        score.add_penalty(-2.0);
        assert!((score - -0.5).abs() < 1e-12);
    }
}
