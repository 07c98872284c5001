//! Record versioning for optimistic concurrency control.
//!
//! Every persisted record carries a [`Version`]. A commit names the version it
//! read; the store rejects the commit if the record moved on in the meantime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record version number for optimistic concurrency control.
///
/// Versions start at 1 when a record is first written and increment by 1 on
/// every committed write:
///
/// - A writer remembers the version it read
/// - The commit names that version as the expected one
/// - If the stored version differs, the commit fails and nothing is written
///
/// # Examples
///
/// ```
/// use meetreg_core::version::Version;
///
/// let v1 = Version::FIRST;
/// assert_eq!(v1.next(), Version::new(2));
/// assert_eq!(Version::new(5).value(), 5);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a record that has been written exactly once.
    pub const FIRST: Self = Self(1);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// Saturates at `u64::MAX`, which no record will realistically reach.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A value paired with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The record as it was read
    pub value: T,
    /// Version of the record at read time
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pair a value with its version.
    #[must_use]
    pub const fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Drop the version and keep the value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}
