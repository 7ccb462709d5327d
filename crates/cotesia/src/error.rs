//! Error types for the cotesia release controller.
//!
//! This module defines all error types used throughout the crate. The
//! taxonomy follows the fault classes of the controller: transient
//! hardware faults that are retried on the next tick, data-integrity
//! faults reported to the caller, configuration faults rejected at the
//! command boundary, and storage faults that halt actuation.

use std::path::PathBuf;
use thiserror::Error;

use crate::actuator::ActuatorError;

/// The main error type for cotesia operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Transient hardware ===
    /// The actuator driver refused or failed a command.
    #[error("actuator fault: {0}")]
    Actuator(#[from] ActuatorError),

    // === Data integrity ===
    /// A flight with the given numbers already exists on disk.
    #[error("flight already exists: global {global}, daily {daily}")]
    DuplicateFlight {
        /// The global flight number.
        global: u32,
        /// The per-day flight number.
        daily: u32,
    },

    /// No flight with the given global number exists.
    #[error("flight {0} not found")]
    FlightNotFound(u32),

    /// A flight is already in progress.
    #[error("a flight is already in progress")]
    FlightInProgress,

    // === Configuration ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Storage ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Log sealing or unsealing failed.
    #[error("log sealing error: {message}")]
    Seal {
        /// Description of what went wrong.
        message: String,
    },

    // === Generic ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for cotesia operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a new sealing error.
    #[must_use]
    pub fn seal(message: impl Into<String>) -> Self {
        Self::Seal {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is absorbed by the tick loop and retried.
    ///
    /// Actuator faults resolve themselves once the hardware comes
    /// back; everything else must surface to the caller. Serial faults
    /// never reach this type: the telemetry source absorbs them into
    /// its own connection state.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Actuator(_))
    }

    /// Check if this error compromises the persisted flight record.
    ///
    /// While a storage fault is outstanding the state machine must not
    /// issue new actuations.
    #[must_use]
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::DirectoryCreate { .. } | Self::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FlightNotFound(7);
        assert_eq!(err.to_string(), "flight 7 not found");

        let err = Error::DuplicateFlight {
            global: 12,
            daily: 3,
        };
        assert!(err.to_string().contains("global 12"));
        assert!(err.to_string().contains("daily 3"));
    }

    #[test]
    fn test_actuator_error_is_recoverable() {
        let err = Error::Actuator(ActuatorError::unavailable("pwm chip missing"));
        assert!(err.is_recoverable());
        assert!(!err.is_storage_fault());
    }

    #[test]
    fn test_io_error_is_storage_fault() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: Error = io_err.into();
        assert!(err.is_storage_fault());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_flight_not_found_not_recoverable() {
        let err = Error::FlightNotFound(1);
        assert!(!err.is_recoverable());
        assert!(!err.is_storage_fault());
    }

    #[test]
    fn test_config_validation_helper() {
        let err = Error::config_validation("distance must be positive");
        assert!(err.to_string().contains("distance must be positive"));
    }

    #[test]
    fn test_seal_helper() {
        let err = Error::seal("bad key");
        assert_eq!(err.to_string(), "log sealing error: bad key");
    }

    #[test]
    fn test_internal_helper() {
        let err = Error::internal("broken invariant");
        assert_eq!(err.to_string(), "internal error: broken invariant");
    }

    #[test]
    fn test_directory_create_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/data/flights"),
            source: io_err,
        };
        assert!(err.to_string().contains("/data/flights"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
            assert!(err.is_storage_fault());
        }
    }
}
