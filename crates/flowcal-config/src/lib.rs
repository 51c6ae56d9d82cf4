//! flowcal configuration loading and validation.
//!
//! This crate provides:
//! - The typed calibration configuration and its defaults
//! - Measurement types with their standard-deviation floors
//! - Config resolution (CLI → env → defaults)
//! - Semantic validation run before any iteration starts

pub mod calibration;
pub mod resolve;
pub mod validate;

pub use calibration::{CalibrationConfig, EntitySelection, MeasurementType};
pub use resolve::{resolve_config, CONFIG_ENV_VAR};
pub use validate::{ValidationError, ValidationResult};
