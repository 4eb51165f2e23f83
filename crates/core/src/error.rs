//! Orderflow Core Error System
//!
//! Error types for configuration, pool admission and retry scheduling.
//! Saturation and transient work failures are not errors and never show up here.

use thiserror::Error;

use crate::engine::{PoolError, RetryError};

/// Core result type for all fallible operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Validation errors
    #[error("Validation failed for field '{field}': {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Configuration source could not be read or deserialized
    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    /// Worker pool errors
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Retry scheduler errors
    #[error("Retry scheduler error: {0}")]
    Retry(#[from] RetryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error (use sparingly)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

// Convenience constructors for common errors
impl CoreError {
    /// Create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create internal error (use sparingly)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
