//! Exit codes for the flowcal-core CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.

use flowcal_common::Error;

/// Exit codes for flowcal-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command completed
    Ok = 0,

    /// Completed, but some output could not be written
    PartialOutput = 1,

    /// Configuration error
    ConfigError = 10,

    /// Measurement or event input rejected
    InputError = 11,

    /// Calibration failed
    CalibrationError = 12,

    /// Persisted state unreadable or incompatible
    StateError = 13,

    /// I/O error
    IoError = 14,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Ok | ExitCode::PartialOutput)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_) | Error::InvalidGrid(_) => ExitCode::ConfigError,
            Error::InvalidMeasurement(_) | Error::InvalidEvent(_) => ExitCode::InputError,
            Error::Calibration(_) => ExitCode::CalibrationError,
            Error::StateCorrupted(_) => ExitCode::StateError,
            Error::Io(_) => ExitCode::IoError,
            Error::Json(_) => ExitCode::InternalError,
        }
    }
}
