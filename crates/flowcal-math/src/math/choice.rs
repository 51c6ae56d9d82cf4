//! Logit choice probabilities over scored alternatives.
//!
//! Plan selection turns utilities (base score plus weighted calibration
//! correction) into choice probabilities. Utilities can be large in magnitude
//! when the correction weight is high, so everything is normalized in log
//! space before exponentiating.

use super::stable::log_sum_exp;

/// Stable softmax returning choice probabilities directly from utilities.
///
/// Every alternative with `-inf` utility gets probability zero; if all of
/// them do, every probability is zero.
pub fn stable_softmax(utilities: &[f64]) -> Vec<f64> {
    if utilities.is_empty() {
        return Vec::new();
    }
    if utilities.iter().any(|v| v.is_nan()) {
        return vec![f64::NAN; utilities.len()];
    }
    let z = log_sum_exp(utilities);
    if z.is_nan() {
        return vec![f64::NAN; utilities.len()];
    }
    if z == f64::NEG_INFINITY {
        return vec![0.0; utilities.len()];
    }
    utilities.iter().map(|v| (*v - z).exp()).collect()
}

/// Pick an index from a probability vector given a uniform draw in `[0, 1)`.
///
/// Returns `None` when the probabilities are empty, contain NaN, or sum to
/// zero. Rounding slack at the top end falls to the last positive entry.
pub fn sample_index(probs: &[f64], uniform: f64) -> Option<usize> {
    if probs.is_empty() || probs.iter().any(|p| p.is_nan()) {
        return None;
    }
    let total: f64 = probs.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let target = uniform.clamp(0.0, 1.0) * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (idx, p) in probs.iter().enumerate() {
        if *p <= 0.0 {
            continue;
        }
        cumulative += p;
        last_positive = Some(idx);
        if target < cumulative {
            return Some(idx);
        }
    }
    last_positive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_utilities_split_evenly() {
        let probs = stable_softmax(&[-3.0, -3.0, -3.0, -3.0]);
        for p in &probs {
            assert!((p - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn weighted_corrections_do_not_overflow() {
        // weight 1000 on corrections of 2/64 and 1/64
        let probs = stable_softmax(&[31.25, 15.625]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[0] > 0.999_999);
        assert!(((probs[0] + probs[1]) - 1.0).abs() < 1e-12);

        let huge = stable_softmax(&[1e6, 1e6 - 1.0]);
        let expected = 1.0 / (1.0 + (-1.0f64).exp());
        assert!((huge[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn unscored_alternatives_get_no_mass() {
        let probs = stable_softmax(&[f64::NEG_INFINITY, 0.0]);
        assert_eq!(probs, vec![0.0, 1.0]);
        let none = stable_softmax(&[f64::NEG_INFINITY, f64::NEG_INFINITY]);
        assert_eq!(none, vec![0.0, 0.0]);
        assert!(stable_softmax(&[]).is_empty());
        assert!(stable_softmax(&[0.0, f64::NAN])[0].is_nan());
    }

    #[test]
    fn sample_index_walks_cdf() {
        let probs = [0.25, 0.5, 0.25];
        assert_eq!(sample_index(&probs, 0.0), Some(0));
        assert_eq!(sample_index(&probs, 0.3), Some(1));
        assert_eq!(sample_index(&probs, 0.74), Some(1));
        assert_eq!(sample_index(&probs, 0.9), Some(2));
        assert_eq!(sample_index(&probs, 1.0), Some(2));
    }

    #[test]
    fn sample_index_skips_zero_mass() {
        let probs = [0.0, 1.0, 0.0];
        assert_eq!(sample_index(&probs, 0.0), Some(1));
        assert_eq!(sample_index(&probs, 0.999), Some(1));
    }

    #[test]
    fn sample_index_degenerate_inputs() {
        assert_eq!(sample_index(&[], 0.5), None);
        assert_eq!(sample_index(&[0.0, 0.0], 0.5), None);
        assert_eq!(sample_index(&[f64::NAN], 0.5), None);
    }
}
