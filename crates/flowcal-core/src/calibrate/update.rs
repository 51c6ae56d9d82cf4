//! Offset update disciplines.
//!
//! ```text
//! sim    = count · unit_scale · counts_scale_factor
//! raw    = (measured - sim) / variance(measured)
//! brute  : offset ← raw
//! smooth : offset ← inertia·offset + (1 - inertia)·raw
//! center : offset ← offset - mean_e(mean_b(offset))    smooth only, updated cells
//! ```

use super::{calibrated_cells, variance_model};
use crate::measurement::MeasurementStore;
use crate::series::{SeriesError, TimeBinnedSeries};
use flowcal_common::EntityKey;
use flowcal_config::CalibrationConfig;
use std::collections::BTreeMap;

/// Summary of one update pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UpdateOutcome {
    pub updated_cells: usize,
    pub max_abs_change: f64,
    /// Mean subtracted by re-centering, when it ran.
    pub recentered_by: Option<f64>,
}

pub(super) fn apply<K: EntityKey>(
    config: &CalibrationConfig,
    offsets: &mut TimeBinnedSeries<K>,
    demand: &TimeBinnedSeries<K>,
    measurements: &MeasurementStore<K>,
) -> Result<UpdateOutcome, SeriesError> {
    let model = variance_model(config, measurements.kind());
    let scale = config.sim_scale(measurements.kind(), demand.grid().bin_size_s());
    let inertia = config.regression_inertia;

    let mut updates: Vec<(K, usize, f64)> = Vec::new();
    for (entity, bin, measured) in calibrated_cells(config, measurements) {
        let sim = demand.get(entity, bin)? * scale;
        let raw = model.gradient(sim, measured);
        let value = if config.use_brute_force {
            raw
        } else {
            inertia * offsets.get(entity, bin)? + (1.0 - inertia) * raw
        };
        updates.push((entity.clone(), bin, value));
    }

    let recentered_by = if config.center_regression && !config.use_brute_force {
        entity_weighted_mean(&updates)
    } else {
        None
    };
    let shift = recentered_by.unwrap_or(0.0);

    let mut outcome = UpdateOutcome {
        updated_cells: updates.len(),
        recentered_by,
        ..UpdateOutcome::default()
    };
    for (entity, bin, value) in updates {
        let value = value - shift;
        let change = (value - offsets.get(&entity, bin)?).abs();
        outcome.max_abs_change = outcome.max_abs_change.max(change);
        offsets.set(&entity, bin, value)?;
    }
    Ok(outcome)
}

/// Mean over entities of each entity's mean updated value.
fn entity_weighted_mean<K: EntityKey>(updates: &[(K, usize, f64)]) -> Option<f64> {
    let mut per_entity: BTreeMap<&K, (f64, usize)> = BTreeMap::new();
    for (entity, _, value) in updates {
        let slot = per_entity.entry(entity).or_insert((0.0, 0));
        slot.0 += value;
        slot.1 += 1;
    }
    if per_entity.is_empty() {
        return None;
    }
    let sum: f64 = per_entity
        .values()
        .map(|(total, n)| total / *n as f64)
        .sum();
    Some(sum / per_entity.len() as f64)
}
