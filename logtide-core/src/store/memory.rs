/*
    memory.rs - In-memory versioned store

    Test-double backend implementing the full VersionedConfigStore
    contract: per-key CAS, strict version monotonicity, best-effort watch
    notification. Stores values in encoded blob form so the codec path is
    exercised exactly as it would be against a real backend.

    Supports injecting transient failures so retry and backoff paths can
    be tested deterministically.
*/

use crate::store::backend::{ConfigKey, VersionedConfigStore, WriteCondition};
use crate::store::errors::{StoreError, StoreResult};
use crate::store::value::{ConfigValue, ValueMetadata};
use crate::store::version::ConfigVersion;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct Shared {
    /// Encoded blobs, keyed by configuration domain
    values: HashMap<ConfigKey, Vec<u8>>,

    /// One watch channel per key, created on demand
    watchers: HashMap<ConfigKey, watch::Sender<Option<ConfigVersion>>>,
}

/// In-memory implementation of the versioned configuration store
#[derive(Default)]
pub struct InMemoryConfigStore {
    shared: Mutex<Shared>,

    /// Number of upcoming backend calls that fail with a transient error
    injected_faults: AtomicU32,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` backend calls (get or put) fail transiently.
    pub fn fail_next(&self, n: u32) {
        self.injected_faults.store(n, Ordering::SeqCst);
    }

    fn maybe_inject_fault(&self) -> StoreResult<()> {
        let remaining = self.injected_faults.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .injected_faults
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StoreError::Transient("injected fault".to_string()));
        }
        Ok(())
    }

    fn notify(shared: &mut Shared, key: &ConfigKey, version: ConfigVersion) {
        let sender = shared
            .watchers
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0);
        // Watch is best-effort: closed receivers are fine.
        let _ = sender.send(Some(version));
    }
}

#[async_trait]
impl VersionedConfigStore for InMemoryConfigStore {
    async fn get(&self, key: &ConfigKey) -> StoreResult<ConfigValue> {
        self.maybe_inject_fault()?;

        let shared = self.shared.lock().expect("store mutex poisoned");
        match shared.values.get(key) {
            Some(blob) => ConfigValue::decode(blob),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn put(
        &self,
        key: &ConfigKey,
        payload: Vec<u8>,
        condition: WriteCondition,
        author: Option<String>,
    ) -> StoreResult<ConfigVersion> {
        self.maybe_inject_fault()?;

        let mut shared = self.shared.lock().expect("store mutex poisoned");

        let current_version = match shared.values.get(key) {
            Some(blob) => Some(ConfigValue::decode(blob)?.version),
            None => None,
        };

        let new_version = match (condition, current_version) {
            (WriteCondition::CreateOnly, Some(_)) => {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            (WriteCondition::CreateOnly, None) => ConfigVersion::GENESIS.next(),
            (WriteCondition::MatchVersion(_), None) => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            (WriteCondition::MatchVersion(expected), Some(actual)) => {
                if expected != actual {
                    return Err(StoreError::VersionMismatch { actual });
                }
                actual.next()
            }
            (WriteCondition::Overwrite, current) => {
                current.unwrap_or(ConfigVersion::GENESIS).next()
            }
        };

        let value = ConfigValue::new(payload, new_version, ValueMetadata::new(author));
        shared.values.insert(key.clone(), value.encode()?);
        Self::notify(&mut shared, key, new_version);

        Ok(new_version)
    }

    fn watch(&self, key: &ConfigKey) -> watch::Receiver<Option<ConfigVersion>> {
        let mut shared = self.shared.lock().expect("store mutex poisoned");

        let initial = shared
            .values
            .get(key)
            .and_then(|blob| ConfigValue::decode(blob).ok())
            .map(|v| v.version);

        shared
            .watchers
            .entry(key.clone())
            .or_insert_with(|| watch::channel(initial).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConfigKey {
        ConfigKey::from("nodes-configuration")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryConfigStore::new();

        let version = store
            .put(&key(), b"v1".to_vec(), WriteCondition::CreateOnly, None)
            .await
            .unwrap();
        assert_eq!(version, ConfigVersion::new(1));

        let value = store.get(&key()).await.unwrap();
        assert_eq!(value.payload, b"v1");
        assert_eq!(value.version, ConfigVersion::new(1));
    }

    #[tokio::test]
    async fn test_create_only_rejects_existing_key() {
        let store = InMemoryConfigStore::new();
        store.put(&key(), b"v1".to_vec(), WriteCondition::CreateOnly, None).await.unwrap();

        let err = store
            .put(&key(), b"again".to_vec(), WriteCondition::CreateOnly, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_match_version_cas() {
        let store = InMemoryConfigStore::new();
        let v1 = store.put(&key(), b"a".to_vec(), WriteCondition::CreateOnly, None).await.unwrap();

        // Stale expected version loses and reports the actual version.
        let v2 = store
            .put(&key(), b"b".to_vec(), WriteCondition::MatchVersion(v1), None)
            .await
            .unwrap();
        let err = store
            .put(&key(), b"c".to_vec(), WriteCondition::MatchVersion(v1), None)
            .await
            .unwrap_err();

        match err {
            StoreError::VersionMismatch { actual } => assert_eq!(actual, v2),
            other => panic!("expected VersionMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_match_version_on_missing_key() {
        let store = InMemoryConfigStore::new();
        let err = store
            .put(
                &key(),
                b"x".to_vec(),
                WriteCondition::MatchVersion(ConfigVersion::new(1)),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_overwrite_advances_version() {
        let store = InMemoryConfigStore::new();
        store.put(&key(), b"a".to_vec(), WriteCondition::CreateOnly, None).await.unwrap();
        let v = store.put(&key(), b"b".to_vec(), WriteCondition::Overwrite, None).await.unwrap();
        assert_eq!(v, ConfigVersion::new(2));
    }

    #[tokio::test]
    async fn test_watch_sees_writes() {
        let store = InMemoryConfigStore::new();
        let mut rx = store.watch(&key());
        assert_eq!(*rx.borrow(), None);

        store.put(&key(), b"a".to_vec(), WriteCondition::CreateOnly, None).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(ConfigVersion::new(1)));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryConfigStore::new();
        store.fail_next(1);

        let err = store.get(&key()).await.unwrap_err();
        assert!(err.is_transient());

        // Fault budget consumed; next call behaves normally.
        let err = store.get(&key()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
