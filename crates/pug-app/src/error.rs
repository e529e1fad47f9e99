//! Application-level error type.
//!
//! [`AppError`] unifies all internal errors for the application layer.

use pug_runtime::{ConfigError, PugError};
use pug_types::ErrorCode;
use thiserror::Error;

/// Unified application error.
///
/// Collects all internal errors into a single type for CLI handling.
///
/// # Example
///
/// ```
/// use pug_app::{AppError, ErrorCode, PugError};
///
/// let app_err: AppError = PugError::invalid_state("plan already applied").into();
/// assert_eq!(app_err.code(), "PUG_INVALID_STATE");
/// eprintln!("Error: {}", app_err);
/// ```
#[derive(Debug, Error)]
pub enum AppError {
    /// Task engine or service failure
    #[error("{0}")]
    Runtime(#[from] PugError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for AppError {
    fn code(&self) -> &'static str {
        match self {
            Self::Runtime(e) => e.code(),
            Self::Config(e) => e.code(),
            Self::Io(_) => "APP_IO_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Runtime(e) => e.is_recoverable(),
            Self::Config(e) => e.is_recoverable(),
            Self::Io(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_converts() {
        let err: AppError = PugError::Canceled.into();
        assert!(matches!(err, AppError::Runtime(PugError::Canceled)));
        assert_eq!(err.code(), "PUG_CANCELED");
        assert!(err.is_recoverable());
    }

    #[test]
    fn config_error_converts() {
        let err: AppError = ConfigError::invalid_value("envs", "expected KEY=VALUE").into();
        assert_eq!(err.code(), "CONFIG_INVALID_VALUE");
        assert!(err.to_string().starts_with("Config error: "));
    }

    #[test]
    fn io_error_converts() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), "APP_IO_ERROR");
        assert!(err.is_recoverable());
    }
}
