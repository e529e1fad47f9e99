//! Unified error interface for pug.
//!
//! Every error type in the workspace implements [`ErrorCode`] so that
//! frontends can branch on a stable, machine-readable code instead of
//! matching on message text.
//!
//! # Example
//!
//! ```
//! use pug_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum StoreError {
//!     NotFound,
//!     Busy,
//! }
//!
//! impl ErrorCode for StoreError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound => "STORE_NOT_FOUND",
//!             Self::Busy => "STORE_BUSY",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Busy)
//!     }
//! }
//!
//! assert_eq!(StoreError::Busy.code(), "STORE_BUSY");
//! assert!(StoreError::Busy.is_recoverable());
//! ```

/// Machine-readable error code interface.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, e.g. `"PUG_NOT_FOUND"`
/// - **Prefixed by layer**: `PUG_` for the runtime, `CONFIG_` for
///   configuration, `APP_` for the application layer
/// - **Stable**: a code never changes once published
///
/// # Recoverability
///
/// An error is recoverable when resubmitting the same work may succeed
/// (a task that failed, a canceled task) or the user can fix it without
/// a code change. Lookups of missing entities and malformed tool output
/// are not recoverable.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying or user action may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Validates that an error code follows pug conventions.
///
/// # Panics
///
/// Panics if the code is empty, lacks `expected_prefix`, or is not
/// UPPER_SNAKE_CASE.
///
/// # Example
///
/// ```
/// use pug_types::{ErrorCode, assert_error_code};
///
/// #[derive(Debug)]
/// enum MyError { Timeout }
///
/// impl ErrorCode for MyError {
///     fn code(&self) -> &'static str { "MY_TIMEOUT" }
///     fn is_recoverable(&self) -> bool { true }
/// }
///
/// assert_error_code(&MyError::Timeout, "MY_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every error in `errors`; use it over all variants of an enum.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
