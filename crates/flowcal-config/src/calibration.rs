//! Calibration run configuration.
//!
//! Field names follow the camelCase option names recognised in config files
//! (`timeBinSize`, `regressionInertia`, `minFlowStdDev`, ...).

use crate::validate::{ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Kind of quantity a measurement reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    /// Vehicles (or passengers) per hour, regardless of bin width.
    #[default]
    FlowVehH,
    /// Raw count inside one bin.
    CountVeh,
}

impl MeasurementType {
    /// Factor converting a per-bin simulated count into this measurement's unit.
    pub fn unit_scale(self, bin_size_s: u32) -> f64 {
        match self {
            MeasurementType::FlowVehH => SECONDS_PER_HOUR / f64::from(bin_size_s),
            MeasurementType::CountVeh => 1.0,
        }
    }
}

/// Which entities take part in calibration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "SelectionRepr", into = "SelectionRepr")]
pub enum EntitySelection {
    /// Every entity with a measurement.
    #[default]
    All,
    /// Only the listed entity identifiers.
    Only(BTreeSet<String>),
}

impl EntitySelection {
    pub fn contains(&self, entity: &str) -> bool {
        match self {
            EntitySelection::All => true,
            EntitySelection::Only(ids) => ids.contains(entity),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SelectionRepr {
    Keyword(String),
    List(BTreeSet<String>),
}

impl TryFrom<SelectionRepr> for EntitySelection {
    type Error = String;

    fn try_from(repr: SelectionRepr) -> Result<Self, Self::Error> {
        match repr {
            SelectionRepr::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(EntitySelection::All),
            SelectionRepr::Keyword(k) => Err(format!(
                "calibratedEntities must be \"all\" or a list of ids, got \"{k}\""
            )),
            SelectionRepr::List(ids) => Ok(EntitySelection::Only(ids)),
        }
    }
}

impl From<EntitySelection> for SelectionRepr {
    fn from(selection: EntitySelection) -> Self {
        match selection {
            EntitySelection::All => SelectionRepr::Keyword("all".to_string()),
            EntitySelection::Only(ids) => SelectionRepr::List(ids),
        }
    }
}

/// Immutable configuration of one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// Start of the calibration window (seconds since midnight, inclusive).
    pub start_time: u32,
    /// End of the calibration window (seconds since midnight, exclusive).
    pub end_time: u32,
    /// Width of one time bin in seconds. Must divide `day_length`.
    pub time_bin_size: u32,
    /// Length of the simulated day in seconds.
    pub day_length: u32,
    /// Weight of the previous offset in the regression-smoothed update.
    pub regression_inertia: f64,
    /// Recompute offsets from the current discrepancy only.
    pub use_brute_force: bool,
    /// Standard-deviation floor for `flow_veh_h` measurements.
    #[serde(rename = "minFlowStdDev")]
    pub min_flow_stddev: f64,
    /// Standard-deviation floor for `count_veh` measurements.
    #[serde(rename = "minCountStdDev")]
    pub min_count_stddev: f64,
    /// Warm-up iterations during which offsets are not updated.
    pub preparatory_iterations: u32,
    /// Last iteration that may update offsets; `None` means never freeze.
    pub freeze_iteration: Option<u32>,
    /// Scale of the Poisson-like variance term `variance_scale * measured`.
    pub variance_scale: f64,
    /// Multiplier applied to simulated counts before comparison, e.g. `10.0`
    /// for a 10% sample population.
    pub counts_scale_factor: f64,
    /// Entities taking part in calibration.
    pub calibrated_entities: EntitySelection,
    /// Re-center updated offsets to a zero entity-weighted mean.
    pub center_regression: bool,
    /// Persist offsets every N iterations (0 disables per-iteration files).
    pub write_offsets_interval: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            start_time: 0,
            end_time: 86_400,
            time_bin_size: 3600,
            day_length: 86_400,
            regression_inertia: 0.95,
            use_brute_force: false,
            min_flow_stddev: 8.0,
            min_count_stddev: 8.0,
            preparatory_iterations: 1,
            freeze_iteration: None,
            variance_scale: 1.0,
            counts_scale_factor: 1.0,
            calibrated_entities: EntitySelection::All,
            center_regression: false,
            write_offsets_interval: 1,
        }
    }
}

impl CalibrationConfig {
    /// Load a configuration from a `.json` or `.toml` file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&content),
            Some("toml") => Self::parse_toml(&content),
            other => Err(ValidationError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn parse_json(json: &str) -> Result<Self, ValidationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ValidationError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML configuration.
    pub fn parse_toml(text: &str) -> Result<Self, ValidationError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ValidationError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation; see [`crate::validate`].
    pub fn validate(&self) -> ValidationResult {
        crate::validate::validate_config(self)
    }

    /// Factor converting a per-bin simulated count into `kind`'s unit at full
    /// population.
    pub fn sim_scale(&self, kind: MeasurementType, bin_size_s: u32) -> f64 {
        kind.unit_scale(bin_size_s) * self.counts_scale_factor
    }

    /// Standard-deviation floor for a measurement type.
    pub fn min_stddev(&self, kind: MeasurementType) -> f64 {
        match kind {
            MeasurementType::FlowVehH => self.min_flow_stddev,
            MeasurementType::CountVeh => self.min_count_stddev,
        }
    }

    /// Number of bins covering one day.
    pub fn bin_count(&self) -> usize {
        self.day_length.div_ceil(self.time_bin_size.max(1)) as usize
    }

    /// Whether a bin starts inside the `[start_time, end_time)` window.
    pub fn bin_in_window(&self, bin: usize) -> bool {
        let bin_start = bin as u64 * u64::from(self.time_bin_size);
        bin_start >= u64::from(self.start_time) && bin_start < u64::from(self.end_time)
    }

    /// Whether offsets may change at this iteration.
    pub fn is_frozen(&self, iteration: u32) -> bool {
        self.freeze_iteration.is_some_and(|freeze| iteration > freeze)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CalibrationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bin_count(), 24);
        assert_eq!(config.preparatory_iterations, 1);
        assert!(config.freeze_iteration.is_none());
        assert_eq!(config.counts_scale_factor, 1.0);
    }

    #[test]
    fn test_parse_json_camel_case() {
        let json = r#"{
            "timeBinSize": 1800,
            "useBruteForce": true,
            "minFlowStdDev": 4.0,
            "freezeIteration": 10,
            "calibratedEntities": ["stop1", "stop2"]
        }"#;
        let config = CalibrationConfig::parse_json(json).unwrap();
        assert_eq!(config.time_bin_size, 1800);
        assert_eq!(config.bin_count(), 48);
        assert!(config.use_brute_force);
        assert!((config.min_flow_stddev - 4.0).abs() < 1e-12);
        assert_eq!(config.freeze_iteration, Some(10));
        assert!(config.calibrated_entities.contains("stop2"));
        assert!(!config.calibrated_entities.contains("stop3"));
    }

    #[test]
    fn test_parse_toml_all_keyword() {
        let text = r#"
            regressionInertia = 0.5
            calibratedEntities = "all"
            centerRegression = true
        "#;
        let config = CalibrationConfig::parse_toml(text).unwrap();
        assert_eq!(config.calibrated_entities, EntitySelection::All);
        assert!(config.center_regression);
        assert!((config.regression_inertia - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_keyword_rejected() {
        let err = CalibrationConfig::parse_json(r#"{"calibratedEntities": "some"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = CalibrationConfig::parse_json(r#"{"timeBinSz": 60}"#).unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_selection_round_trips_through_json() {
        let mut config = CalibrationConfig::default();
        config.calibrated_entities =
            EntitySelection::Only(["a".to_string(), "b".to_string()].into_iter().collect());
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"calibratedEntities\":[\"a\",\"b\"]"));
        let back = CalibrationConfig::parse_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_window_membership() {
        let config = CalibrationConfig {
            start_time: 6 * 3600,
            end_time: 10 * 3600,
            ..CalibrationConfig::default()
        };
        assert!(!config.bin_in_window(5));
        assert!(config.bin_in_window(6));
        assert!(config.bin_in_window(9));
        assert!(!config.bin_in_window(10));
    }

    #[test]
    fn test_flow_unit_scale() {
        assert!((MeasurementType::FlowVehH.unit_scale(3600) - 1.0).abs() < 1e-12);
        assert!((MeasurementType::FlowVehH.unit_scale(900) - 4.0).abs() < 1e-12);
        assert!((MeasurementType::CountVeh.unit_scale(900) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sim_scale_includes_sample_factor() {
        let config = CalibrationConfig::parse_json(r#"{"countsScaleFactor": 10.0}"#).unwrap();
        assert!((config.sim_scale(MeasurementType::CountVeh, 900) - 10.0).abs() < 1e-12);
        assert!((config.sim_scale(MeasurementType::FlowVehH, 900) - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_freeze_semantics() {
        let config = CalibrationConfig {
            freeze_iteration: Some(5),
            ..CalibrationConfig::default()
        };
        assert!(!config.is_frozen(5));
        assert!(config.is_frozen(6));
        assert!(!CalibrationConfig::default().is_frozen(u32::MAX));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("cal.json");
        std::fs::write(&json_path, r#"{"preparatoryIterations": 3}"#).unwrap();
        assert_eq!(
            CalibrationConfig::from_file(&json_path).unwrap().preparatory_iterations,
            3
        );

        let yaml_path = dir.path().join("cal.yaml");
        std::fs::write(&yaml_path, "preparatoryIterations: 3").unwrap();
        assert!(matches!(
            CalibrationConfig::from_file(&yaml_path),
            Err(ValidationError::UnsupportedFormat(_))
        ));
    }
}
