//! Error types for flowcal.

use thiserror::Error;

/// Result type alias for flowcal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for flowcal.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid time grid: {0}")]
    InvalidGrid(String),

    // Input data errors (20-29)
    #[error("invalid measurement data: {0}")]
    InvalidMeasurement(String),

    #[error("invalid event data: {0}")]
    InvalidEvent(String),

    // Calibration errors (30-39)
    #[error("calibration failed: {0}")]
    Calibration(String),

    // Persistence errors (50-59)
    #[error("persisted state corrupted: {0}")]
    StateCorrupted(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidGrid(_) => 11,
            Error::InvalidMeasurement(_) => 20,
            Error::InvalidEvent(_) => 21,
            Error::Calibration(_) => 30,
            Error::StateCorrupted(_) => 51,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Whether the run may continue after this error.
    ///
    /// Losing durability (a failed write) is survivable; corrupted state and
    /// invalid configuration are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_grouped_by_category() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(Error::InvalidMeasurement("x".into()).code(), 20);
        assert_eq!(Error::Calibration("x".into()).code(), 30);
        assert_eq!(Error::StateCorrupted("x".into()).code(), 51);
    }

    #[test]
    fn test_recoverability() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_recoverable());
        assert!(!Error::StateCorrupted("bad header".into()).is_recoverable());
        assert!(!Error::Config("bin size".into()).is_recoverable());
    }
}
