//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from I/O and configuration issues to
//! capture-session and finalization problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically related to file parsing or
//!   environment overrides.
//! - **`Configuration`**: Semantic errors in the configuration that pass parsing but are
//!   logically incorrect (e.g. a zero poll timeout). Caught during validation.
//! - **`Io`** / **`Serial`**: Link-level failures. Inside the capture loop these are the
//!   only fatal class; they stop the session but captured data is still finalized.
//! - **`InvalidTransition`**: A capture session was driven out of order.
//! - **`EmptySession`**, **`MissingField`**, **`NonNumericField`**: The finalizer could not
//!   produce a table from the measurement log.
//! - **`Export`**: The export sink failed to persist a finalized table.
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types,
//! simplifying error handling throughout the crate with the `?` operator.

use crate::session::SessionState;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Top-level error type for configuration, capture, finalization and export.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or enumerated.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The link went away while capturing.
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// A capture session operation was requested in the wrong state.
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        /// The operation that was attempted.
        action: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// Finalization was requested for a log with no measurement records.
    #[error("No measurement records were captured")]
    EmptySession,

    /// A measurement record lacks a key the finalizer requires.
    #[error("Measurement row {row} is missing required key '{key}'")]
    MissingField {
        /// Row index in the measurement log.
        row: usize,
        /// Missing key.
        key: &'static str,
    },

    /// A measurement record holds a non-numeric value under a numeric key.
    #[error("Measurement row {row} has non-numeric value for key '{key}'")]
    NonNumericField {
        /// Row index in the measurement log.
        row: usize,
        /// Offending key.
        key: &'static str,
    },

    /// The export sink could not persist the finalized table.
    #[error("Export error: {0}")]
    Export(String),

    /// Functionality compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}
