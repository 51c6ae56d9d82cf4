//! Gaussian likelihood of a simulated count against a measured count.
//!
//! The measurement noise model is `N(measured, sigma²)` with
//! `sigma = max(min_stddev, sqrt(variance_scale * measured))`: a Poisson-like
//! variance that never drops below a device floor.

use serde::{Deserialize, Serialize};

/// Variance model for one measurement type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountVarianceModel {
    pub min_stddev: f64,
    pub variance_scale: f64,
}

impl CountVarianceModel {
    pub fn new(min_stddev: f64, variance_scale: f64) -> Self {
        Self {
            min_stddev,
            variance_scale,
        }
    }

    /// Standard deviation of a measurement.
    pub fn stddev(&self, measured: f64) -> f64 {
        let poisson = (self.variance_scale * measured.max(0.0)).sqrt();
        self.min_stddev.max(poisson)
    }

    /// Variance of a measurement.
    pub fn variance(&self, measured: f64) -> f64 {
        let sd = self.stddev(measured);
        sd * sd
    }

    /// Log-likelihood term `-(simulated - measured)² / (2 variance)`.
    ///
    /// A degenerate (zero or non-finite) variance contributes zero.
    pub fn log_likelihood(&self, simulated: f64, measured: f64) -> f64 {
        let var = self.variance(measured);
        if !(var.is_finite() && var > 0.0) {
            return 0.0;
        }
        let diff = simulated - measured;
        -0.5 * diff * diff / var
    }

    /// Derivative of the log-likelihood with respect to the simulated count.
    ///
    /// This is the raw per-bin discrepancy signal `(measured - simulated) / variance`.
    /// Zero measured and zero simulated yields exactly zero.
    pub fn gradient(&self, simulated: f64, measured: f64) -> f64 {
        if simulated == 0.0 && measured == 0.0 {
            return 0.0;
        }
        let var = self.variance(measured);
        if !(var.is_finite() && var > 0.0) {
            return 0.0;
        }
        (measured - simulated) / var
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_dominates_small_counts() {
        let model = CountVarianceModel::new(8.0, 1.0);
        assert!((model.stddev(4.0) - 8.0).abs() < 1e-12);
        assert!((model.variance(4.0) - 64.0).abs() < 1e-12);
    }

    #[test]
    fn poisson_term_dominates_large_counts() {
        let model = CountVarianceModel::new(8.0, 1.0);
        assert!((model.variance(100.0) - 100.0).abs() < 1e-9);
        let scaled = CountVarianceModel::new(8.0, 2.0);
        assert!((scaled.variance(100.0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn reference_log_likelihood_terms() {
        let model = CountVarianceModel::new(8.0, 1.0);
        let total = model.log_likelihood(0.0, 1.0)
            + model.log_likelihood(0.0, 2.0)
            + model.log_likelihood(4.0, 5.0)
            + model.log_likelihood(4.0, 4.0);
        assert!((total - -0.046875).abs() < 1e-15);
    }

    #[test]
    fn gradient_sign_and_scale() {
        let model = CountVarianceModel::new(8.0, 1.0);
        assert!((model.gradient(4.0, 5.0) - 1.0 / 64.0).abs() < 1e-15);
        assert!((model.gradient(6.0, 2.0) + 4.0 / 64.0).abs() < 1e-15);
        assert_eq!(model.gradient(0.0, 0.0), 0.0);
    }

    #[test]
    fn degenerate_variance_is_neutral() {
        let model = CountVarianceModel::new(0.0, 1.0);
        assert_eq!(model.log_likelihood(3.0, 0.0), 0.0);
        assert_eq!(model.gradient(3.0, 0.0), 0.0);
    }
}
