//! Runtime errors.
//!
//! All errors implement [`ErrorCode`] for standardized handling.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`PugError::NotFound`] | `PUG_NOT_FOUND` | No |
//! | [`PugError::Exists`] | `PUG_EXISTS` | No |
//! | [`PugError::InvalidState`] | `PUG_INVALID_STATE` | No |
//! | [`PugError::Parse`] | `PUG_PARSE` | No |
//! | [`PugError::Spawn`] | `PUG_SPAWN` | Yes |
//! | [`PugError::Task`] | `PUG_TASK` | Yes |
//! | [`PugError::Canceled`] | `PUG_CANCELED` | Yes |
//! | [`PugError::UnexpectedOutput`] | `PUG_UNEXPECTED_OUTPUT` | No |
//! | [`PugError::Io`] | `PUG_IO` | Yes |
//!
//! # Propagation
//!
//! Store lookups return errors to the caller synchronously. Failures of
//! a running task are never returned from the runner; they are recorded
//! on the task, which then transitions to `errored`.
//!
//! The error is `Clone` so that it can be stored on a task row and
//! published with it. Underlying I/O errors are kept as messages.

use pug_types::{ErrorCode, Id, Kind};
use thiserror::Error;

/// Runtime error.
///
/// # Example
///
/// ```
/// use pug_runtime::PugError;
/// use pug_types::ErrorCode;
///
/// let err = PugError::unexpected_output("plan");
/// assert_eq!(err.to_string(), "unexpected plan output");
/// assert_eq!(err.code(), "PUG_UNEXPECTED_OUTPUT");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PugError {
    /// Entity lookup failed.
    #[error("{kind} not found: {key}")]
    NotFound { kind: Kind, key: String },

    /// An entity with the same identity already exists.
    #[error("{kind} already exists: {key}")]
    Exists { kind: Kind, key: String },

    /// The operation is not valid in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Tool output or a file could not be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// The child process could not be started.
    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    /// The task failed: nonzero exit or a failing dependency.
    #[error("task failed: {0}")]
    Task(String),

    /// The task was canceled.
    #[error("canceled")]
    Canceled,

    /// Tool output did not match any expected pattern.
    #[error("unexpected {0} output")]
    UnexpectedOutput(String),

    /// Filesystem failure.
    #[error("{context}: {message}")]
    Io { context: String, message: String },
}

impl PugError {
    /// Creates a not-found error for an id.
    #[must_use]
    pub fn not_found(id: Id) -> Self {
        Self::NotFound {
            kind: id.kind(),
            key: id.to_string(),
        }
    }

    /// Creates a not-found error for a lookup by name or path.
    pub fn not_found_named(kind: Kind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Creates an already-exists error.
    pub fn exists(kind: Kind, key: impl Into<String>) -> Self {
        Self::Exists {
            kind,
            key: key.into(),
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates a parse error.
    pub fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Creates a spawn error.
    pub fn spawn(program: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            message: source.to_string(),
        }
    }

    /// Creates a task error.
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }

    /// Creates an unexpected-output error, e.g. `unexpected plan output`.
    pub fn unexpected_output(what: impl Into<String>) -> Self {
        Self::UnexpectedOutput(what.into())
    }

    /// Creates an I/O error with context.
    pub fn io(context: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: source.to_string(),
        }
    }
}

impl ErrorCode for PugError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "PUG_NOT_FOUND",
            Self::Exists { .. } => "PUG_EXISTS",
            Self::InvalidState(_) => "PUG_INVALID_STATE",
            Self::Parse { .. } => "PUG_PARSE",
            Self::Spawn { .. } => "PUG_SPAWN",
            Self::Task(_) => "PUG_TASK",
            Self::Canceled => "PUG_CANCELED",
            Self::UnexpectedOutput(_) => "PUG_UNEXPECTED_OUTPUT",
            Self::Io { .. } => "PUG_IO",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::Task(_) | Self::Canceled | Self::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pug_types::assert_error_codes;

    fn all_variants() -> Vec<PugError> {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        vec![
            PugError::not_found(Id::new(Kind::Task)),
            PugError::exists(Kind::Workspace, "dev"),
            PugError::invalid_state("x"),
            PugError::parse("state", "x"),
            PugError::spawn("terraform", &io),
            PugError::task("exit status 1"),
            PugError::Canceled,
            PugError::unexpected_output("plan"),
            PugError::io("remove artefacts", &io),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "PUG_");
    }

    #[test]
    fn not_found_names_the_kind() {
        let id = Id::new(Kind::Module);
        let err = PugError::not_found(id);
        assert_eq!(err.to_string(), format!("module not found: {id}"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn spawn_keeps_program_and_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PugError::spawn("tofu", &io);
        assert!(err.to_string().contains("tofu"));
        assert!(err.to_string().contains("no such file"));
        assert!(err.is_recoverable());
    }
}
