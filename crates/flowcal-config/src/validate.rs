//! Semantic validation of calibration configuration.
//!
//! Every check here is fatal: a run with an invalid configuration must not
//! start its first iteration.

use crate::calibration::CalibrationConfig;
use thiserror::Error;

/// Result of validating a configuration.
pub type ValidationResult = Result<(), ValidationError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("unsupported config format: {0} (expected .json or .toml)")]
    UnsupportedFormat(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<ValidationError> for flowcal_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidValue {
                field: field @ ("timeBinSize" | "dayLength"),
                reason,
            } => flowcal_common::Error::InvalidGrid(format!("{field}: {reason}")),
            other => flowcal_common::Error::Config(other.to_string()),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Validate a configuration, returning the first violated constraint.
pub fn validate_config(config: &CalibrationConfig) -> ValidationResult {
    if config.time_bin_size == 0 {
        return Err(invalid("timeBinSize", "must be positive"));
    }
    if config.day_length == 0 {
        return Err(invalid("dayLength", "must be positive"));
    }
    if config.day_length % config.time_bin_size != 0 {
        return Err(invalid(
            "timeBinSize",
            format!(
                "{} does not evenly divide the day length {}",
                config.time_bin_size, config.day_length
            ),
        ));
    }
    if config.start_time >= config.end_time {
        return Err(invalid(
            "startTime",
            format!(
                "window [{}, {}) is empty",
                config.start_time, config.end_time
            ),
        ));
    }
    if config.end_time > config.day_length {
        return Err(invalid(
            "endTime",
            format!("{} exceeds the day length {}", config.end_time, config.day_length),
        ));
    }
    if !config.regression_inertia.is_finite() || !(0.0..=1.0).contains(&config.regression_inertia)
    {
        return Err(invalid(
            "regressionInertia",
            format!("{} is outside [0, 1]", config.regression_inertia),
        ));
    }
    if !config.variance_scale.is_finite() || config.variance_scale <= 0.0 {
        return Err(invalid(
            "varianceScale",
            format!("{} must be a positive number", config.variance_scale),
        ));
    }
    if !config.counts_scale_factor.is_finite() || config.counts_scale_factor <= 0.0 {
        return Err(invalid(
            "countsScaleFactor",
            format!("{} must be a positive number", config.counts_scale_factor),
        ));
    }
    for (field, value) in [
        ("minFlowStdDev", config.min_flow_stddev),
        ("minCountStdDev", config.min_count_stddev),
    ] {
        // A zero floor would divide by zero for measured-zero bins.
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid(field, format!("{value} must be a positive number")));
        }
    }
    if let Some(freeze) = config.freeze_iteration {
        if freeze < config.preparatory_iterations {
            tracing::warn!(
                freeze_iteration = freeze,
                preparatory_iterations = config.preparatory_iterations,
                "freeze iteration precedes the end of warm-up; offsets will never change"
            );
        }
    }
    Ok(())
}
