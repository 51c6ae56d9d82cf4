//! Version stamp of persisted offset files and statistics tables.

/// Current schema version for persisted offsets and statistics tables.
///
/// A major bump changes the record layout; readers accept any minor or
/// patch version of their own major.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Whether a file written with `version` can be read by this build.
pub fn is_compatible(version: &str) -> bool {
    major(SCHEMA_VERSION) == major(version)
}

fn major(version: &str) -> Option<u32> {
    version.split('.').next().and_then(|s| s.parse::<u32>().ok())
}
