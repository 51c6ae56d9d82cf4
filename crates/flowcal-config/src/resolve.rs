//! Configuration resolution: CLI flag → environment → defaults.

use crate::calibration::CalibrationConfig;
use crate::validate::ValidationError;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "FLOWCAL_CONFIG";

/// Resolve the effective configuration.
///
/// An explicit path wins over `FLOWCAL_CONFIG`; with neither, the built-in
/// defaults are used. Returns the config and the file it came from, if any.
pub fn resolve_config(
    cli_path: Option<&Path>,
) -> Result<(CalibrationConfig, Option<PathBuf>), ValidationError> {
    let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    resolve_from(cli_path, env_path)
}

fn resolve_from(
    cli_path: Option<&Path>,
    env_path: Option<PathBuf>,
) -> Result<(CalibrationConfig, Option<PathBuf>), ValidationError> {
    let chosen = cli_path.map(Path::to_path_buf).or(env_path);
    match chosen {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading calibration config");
            let config = CalibrationConfig::from_file(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            tracing::debug!("no calibration config given, using defaults");
            Ok((CalibrationConfig::default(), None))
        }
    }
}
