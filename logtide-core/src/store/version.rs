/*
    version.rs - Monotonic configuration versions

    Every stored configuration value carries a version. Versions are
    totally ordered and strictly increase with each accepted write to
    a key; independent keys have independent version sequences.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of a stored configuration value.
///
/// `ConfigVersion::GENESIS` is never held by a persisted value; the first
/// accepted write to a key produces `GENESIS.next()`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ConfigVersion(u64);

impl ConfigVersion {
    /// The version "before the first write" of any key.
    pub const GENESIS: ConfigVersion = ConfigVersion(0);

    pub fn new(v: u64) -> Self {
        ConfigVersion(v)
    }

    /// The version a successful write on top of `self` produces.
    pub fn next(self) -> Self {
        ConfigVersion(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A typed value paired with the version the store holds it at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: ConfigVersion,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: ConfigVersion) -> Self {
        Versioned { value, version }
    }
}
