//! Error handling module
//!
//! Provides unified error types for the risk engine.
//!
//! Only caller errors are meant to reach the caller of [`crate::pipeline::analyze`].
//! Lookup and parse failures are absorbed at the component boundary and surface
//! as partial or absent data instead.

use thiserror::Error;

use crate::config::ConfigError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported warehouse: '{name}'. Supported types: {supported}")]
    UnsupportedWarehouse { name: String, supported: String },

    #[error("Warehouse '{0}' is not yet implemented. Currently supported: catalog")]
    WarehouseNotImplemented(String),

    #[error("Dependency lookup failed for {object}: {reason}")]
    Lookup { object: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Caller errors are programming/config mistakes; everything else is runtime degradation.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::Config(_)
                | AppError::UnsupportedWarehouse { .. }
                | AppError::WarehouseNotImplemented(_)
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a lookup error
pub fn lookup_error(object: impl Into<String>, reason: impl Into<String>) -> AppError {
    AppError::Lookup {
        object: object.into(),
        reason: reason.into(),
    }
}
