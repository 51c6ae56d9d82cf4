//! Plan registration with calibration-aware choice.
//!
//! Called once per agent during replanning. The agent's currently selected
//! plan is always registered as demand; when the calibration weight is
//! positive, a plan is then drawn from a logit model over
//! `base_score + weight · correction` of every candidate.

use crate::demand::DemandAccumulator;
use crate::scoring::ScoringAdapter;
use crate::trajectory::{CandidatePlan, TrajectorySource};
use flowcal_common::EntityKey;
use flowcal_math::{sample_index, stable_softmax};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of handling one agent's plans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanSelection {
    /// Index of the plan the agent should execute.
    pub selected: usize,
    /// Unweighted correction of the plan registered as demand.
    pub registered_correction: f64,
    /// Whether the choice differs from the previously selected plan.
    pub changed: bool,
}

/// Registers plan trajectories and applies the calibrated choice.
#[derive(Debug, Clone)]
pub struct PlanRegistrar<K: EntityKey> {
    accumulator: Arc<DemandAccumulator<K>>,
    scoring: ScoringAdapter<K>,
}

impl<K: EntityKey> PlanRegistrar<K> {
    /// `scoring` supplies the offsets and the calibration weight.
    pub fn new(accumulator: Arc<DemandAccumulator<K>>, scoring: ScoringAdapter<K>) -> Self {
        Self {
            accumulator,
            scoring,
        }
    }

    pub fn weight(&self) -> f64 {
        self.scoring.weight()
    }

    /// Register a plan's trajectory as demand; returns its unweighted correction.
    pub fn register<P>(&self, plan: &P) -> f64
    where
        P: TrajectorySource<K> + ?Sized,
    {
        let trajectory = plan.trajectory();
        let correction = self.scoring.correction_for(&trajectory);
        let counted = self.accumulator.add_to_demand(&trajectory, correction);
        trace!(steps = trajectory.len(), counted, correction, "plan registered");
        correction
    }

    /// Handle one agent: register the selected plan and, if calibration
    /// weighs on choice, draw the plan to execute.
    ///
    /// Returns `None` when `plans` is empty or `selected` is out of range.
    pub fn handle_agent<P, R>(&self, plans: &[P], selected: usize, rng: &mut R) -> Option<PlanSelection>
    where
        P: CandidatePlan<K>,
        R: Rng,
    {
        let Some(current) = plans.get(selected) else {
            debug!(plans = plans.len(), selected, "no selectable plan, agent skipped");
            return None;
        };
        let registered_correction = self.register(current);

        let weight = self.scoring.weight();
        if weight == 0.0 || plans.len() == 1 {
            return Some(PlanSelection {
                selected,
                registered_correction,
                changed: false,
            });
        }

        let utilities: Vec<f64> = plans
            .iter()
            .enumerate()
            .map(|(idx, plan)| {
                let correction = if idx == selected {
                    registered_correction
                } else {
                    self.scoring.correction_for(&plan.trajectory())
                };
                plan.base_score().unwrap_or(0.0) + weight * correction
            })
            .collect();
        let probs = stable_softmax(&utilities);
        let chosen = sample_index(&probs, rng.random::<f64>()).unwrap_or(selected);

        Some(PlanSelection {
            selected: chosen,
            registered_correction,
            changed: chosen != selected,
        })
    }
}
