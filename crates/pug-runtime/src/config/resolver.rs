//! Configuration resolver trait for layered overrides.
//!
//! ```text
//! ConfigLoader.load()  →  PugConfig (files + env)
//!                              │
//!                              ▼
//!                     ConfigResolver.apply()
//!                              │
//!                              ▼
//!                      PugConfig (final)
//! ```

use super::PugConfig;

/// Applies overrides on top of a loaded configuration.
///
/// The frontend implements this for its command-line flags; only
/// options the user actually gave should be applied.
///
/// # Example
///
/// ```
/// use pug_runtime::config::{ConfigResolver, PugConfig};
///
/// struct Flags {
///     max_tasks: Option<usize>,
/// }
///
/// impl ConfigResolver for Flags {
///     fn apply(&self, config: &mut PugConfig) {
///         if let Some(n) = self.max_tasks {
///             config.max_tasks = n;
///         }
///     }
/// }
///
/// let mut config = PugConfig::default();
/// Flags { max_tasks: Some(3) }.apply(&mut config);
/// assert_eq!(config.max_tasks, 3);
/// ```
pub trait ConfigResolver {
    fn apply(&self, config: &mut PugConfig);
}

/// Resolver that makes no changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpResolver;

impl ConfigResolver for NoOpResolver {
    fn apply(&self, _config: &mut PugConfig) {}
}
