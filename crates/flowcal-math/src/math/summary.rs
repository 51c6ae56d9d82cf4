//! Distribution summaries with an explicit "undefined" state.
//!
//! Statistics that do not exist for a sample (the mean of nothing, the
//! sample standard deviation of one value) are `None` rather than NaN, so
//! they cannot leak into downstream averages.

use serde::{Deserialize, Serialize};

/// Average, extremes, and sample standard deviation of a set of values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Sample standard deviation (denominator `n - 1`); `None` for `n <= 1`.
    pub stddev: Option<f64>,
}

impl SummaryStats {
    /// Summarize the finite values of an iterator; non-finite values are skipped.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        // Welford's online update keeps the variance stable for long inputs.
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for value in values.into_iter().filter(|v| v.is_finite()) {
            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            m2 += delta * (value - mean);
            min = min.min(value);
            max = max.max(value);
        }

        if count == 0 {
            return Self::default();
        }

        let stddev = if count > 1 {
            Some((m2 / (count - 1) as f64).max(0.0).sqrt())
        } else {
            None
        };

        Self {
            count,
            avg: Some(mean),
            min: Some(min),
            max: Some(max),
            stddev,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
