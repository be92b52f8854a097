/*
    backend.rs - Abstract versioned key/value store with conditional writes

    The single atomicity primitive the membership subsystem is built on:
    a per-key compare-and-set write. Backends (coordination service,
    log-backed latest-pointer, in-memory test double) implement this
    contract; everything above it is backend-agnostic.
*/

use crate::store::errors::StoreResult;
use crate::store::value::ConfigValue;
use crate::store::version::ConfigVersion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Stable identifier namespacing independent configuration domains.
///
/// Each key has its own version sequence; cross-key ordering is not
/// guaranteed anywhere in the stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey(String);

impl ConfigKey {
    pub fn new(key: impl Into<String>) -> Self {
        ConfigKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConfigKey {
    fn from(s: &str) -> Self {
        ConfigKey(s.to_string())
    }
}

/// Precondition attached to a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Succeed only if the key's current version equals this version
    MatchVersion(ConfigVersion),

    /// Succeed only if the key does not exist yet
    CreateOnly,

    /// Unconditional write; last writer wins
    Overwrite,
}

/// Abstract versioned configuration store.
///
/// Implementations must guarantee:
/// - `put` is atomic per key under concurrent writers: no lost updates,
///   no two accepted writes producing the same version.
/// - An accepted write strictly increases the key's version.
/// - `get` observes only durably committed versions (linearizable per
///   key against the backend's own ordering).
///
/// Watch delivery is best-effort and never a correctness dependency;
/// callers fall back to polling `get`.
#[async_trait]
pub trait VersionedConfigStore: Send + Sync {
    /// Read the current value of a key.
    async fn get(&self, key: &ConfigKey) -> StoreResult<ConfigValue>;

    /// Convenience read returning only the payload bytes.
    async fn get_payload(&self, key: &ConfigKey) -> StoreResult<Vec<u8>> {
        Ok(self.get(key).await?.payload)
    }

    /// Conditional write. On success returns the version assigned to the
    /// new value. Fails with `VersionMismatch { actual }` when a
    /// `MatchVersion` condition does not hold, and with `AlreadyExists`
    /// when a `CreateOnly` condition does not hold.
    async fn put(
        &self,
        key: &ConfigKey,
        payload: Vec<u8>,
        condition: WriteCondition,
        author: Option<String>,
    ) -> StoreResult<ConfigVersion>;

    /// Best-effort change notification: the latest committed version of
    /// the key, `None` while the key does not exist. The receiver is
    /// valid even for keys that have never been written.
    fn watch(&self, key: &ConfigKey) -> watch::Receiver<Option<ConfigVersion>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key_display() {
        let key = ConfigKey::from("nodes-configuration");
        assert_eq!(key.to_string(), "nodes-configuration");
        assert_eq!(key.as_str(), "nodes-configuration");
    }

    #[test]
    fn test_write_condition_equality() {
        assert_eq!(
            WriteCondition::MatchVersion(ConfigVersion::new(2)),
            WriteCondition::MatchVersion(ConfigVersion::new(2))
        );
        assert_ne!(WriteCondition::CreateOnly, WriteCondition::Overwrite);
    }
}
