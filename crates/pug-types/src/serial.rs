//! Monotonic serial numbers.
//!
//! Serials give entities a deterministic total order independent of
//! their random ids. The scheduler breaks ties on the oldest serial and
//! plan artefacts are stored under their serial.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic serial number. Smaller is older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Serial(pub u64);

impl Serial {
    /// Returns the raw value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe source of [`Serial`]s.
///
/// # Example
///
/// ```
/// use pug_types::SerialGenerator;
///
/// let gen = SerialGenerator::new();
/// let a = gen.next();
/// let b = gen.next();
/// assert!(a < b);
/// ```
#[derive(Debug)]
pub struct SerialGenerator {
    next: AtomicU64,
}

impl SerialGenerator {
    /// Creates a generator whose first serial is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator whose first serial is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocates the next serial.
    pub fn next(&self) -> Serial {
        Serial(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}
