//! Configuration manager
//!
//! Process-local façade over one configuration key: a cached,
//! subscribable materialized view plus the coordination needed to make
//! concurrent local proposals safe.
//!
//! # Responsibilities
//!
//! - **Cached reads**: `get()` hands out an `Arc` of the last-known-good
//!   state without touching the backend; writers install replacements
//!   atomically, so readers never observe torn state.
//! - **Serialized proposals**: all local updates funnel through one
//!   optimistic read-modify-write loop at a time, so local proposals
//!   never starve each other's CAS retries.
//! - **Ordered fan-out**: exactly one notification per accepted version
//!   transition, delivered in version order to every subscriber.
//! - **Remote catch-up**: externally-originated version bumps are picked
//!   up from the backend's watch channel, with periodic polling as the
//!   correctness fallback.

use crate::config::{ManagerConfig, RetryConfig};
use crate::manager::lifecycle::ManagerState;
use crate::store::backend::{ConfigKey, VersionedConfigStore};
use crate::store::errors::{StoreError, StoreResult};
use crate::store::typed::{ConfigPayload, Mutation, TypedConfigStore};
use crate::store::version::{ConfigVersion, Versioned};
use crate::subscriber::{SubscriberRegistry, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Cached, update-coordinating view of one configuration key
pub struct ConfigManager<T: ConfigPayload> {
    inner: Arc<Inner<T>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<T: ConfigPayload> {
    typed: TypedConfigStore<T>,
    store: Arc<dyn VersionedConfigStore>,
    key: ConfigKey,
    settings: ManagerConfig,

    /// Last-known-good state; replaced wholesale, never mutated in place
    current: RwLock<Option<Arc<Versioned<T>>>>,

    /// Highest version the backend has reported, cached or not; lets
    /// callers bound staleness of `get()`
    highest_observed: AtomicU64,

    /// Lifecycle; watch so waiters can follow transitions
    lifecycle: watch::Sender<ManagerState>,

    /// Serializes local proposals
    update_gate: Mutex<()>,

    /// Serializes cache swap + fan-out so subscribers see version order
    install_gate: StdMutex<()>,

    subscribers: SubscriberRegistry<Arc<Versioned<T>>>,
    shutdown: watch::Sender<bool>,
}

impl<T: ConfigPayload> ConfigManager<T> {
    pub fn new(
        store: Arc<dyn VersionedConfigStore>,
        key: ConfigKey,
        retry: RetryConfig,
        settings: ManagerConfig,
    ) -> Self {
        let typed = TypedConfigStore::new(store.clone(), key.clone(), retry);
        let subscribers = SubscriberRegistry::new(settings.subscriber_queue_depth);

        ConfigManager {
            inner: Arc::new(Inner {
                typed,
                store,
                key,
                settings,
                current: RwLock::new(None),
                highest_observed: AtomicU64::new(0),
                lifecycle: watch::channel(ManagerState::Uninitialized).0,
                update_gate: Mutex::new(()),
                install_gate: StdMutex::new(()),
                subscribers,
                shutdown: watch::channel(false).0,
            }),
            background: Mutex::new(None),
        }
    }

    /// Perform the initial load and start the catch-up task.
    ///
    /// Retries transient failures and a missing key until the configured
    /// ready deadline, then fails with `NotReady`. A corrupt stored value
    /// fails immediately: serving a wrong state is worse than serving
    /// none.
    pub async fn start(&self) -> StoreResult<()> {
        self.inner.transition(ManagerState::Loading)?;
        info!(key = %self.inner.key, "configuration manager loading");

        let deadline = Instant::now() + self.inner.settings.ready_deadline;
        loop {
            match self.inner.typed.get().await {
                Ok(loaded) => {
                    self.inner.install(Arc::new(loaded));
                    break;
                }
                Err(e @ StoreError::Corrupt(_)) => {
                    error!(key = %self.inner.key, error = %e, "refusing to serve corrupt configuration");
                    let _ = self.inner.transition(ManagerState::Stopped);
                    return Err(e);
                }
                Err(StoreError::NotFound(_)) | Err(StoreError::Transient(_)) => {
                    if Instant::now() >= deadline {
                        warn!(key = %self.inner.key, "initial load missed ready deadline");
                        let _ = self.inner.transition(ManagerState::Stopped);
                        return Err(StoreError::NotReady);
                    }
                    tokio::time::sleep(self.inner.settings.poll_interval.min(Duration::from_millis(200)))
                        .await;
                }
                Err(e) => {
                    let _ = self.inner.transition(ManagerState::Stopped);
                    return Err(e);
                }
            }
        }

        self.inner.transition(ManagerState::Ready)?;
        info!(key = %self.inner.key, "configuration manager ready");

        // Subscribe before spawning so a shutdown issued right after
        // start() always has a live receiver to signal.
        let shutdown_rx = self.inner.shutdown.subscribe();
        let task = tokio::spawn(Self::catch_up_loop(self.inner.clone(), shutdown_rx));
        *self.background.lock().await = Some(task);
        Ok(())
    }

    /// Current cached state. Never touches the backend.
    pub fn get(&self) -> StoreResult<Arc<Versioned<T>>> {
        let state = *self.inner.lifecycle.borrow();
        if !state.is_serving() {
            return Err(match state {
                ManagerState::ShuttingDown | ManagerState::Stopped => StoreError::ShuttingDown,
                _ => StoreError::NotReady,
            });
        }
        self.inner
            .current
            .read()
            .expect("cache lock poisoned")
            .clone()
            .ok_or(StoreError::NotReady)
    }

    /// Highest version the backend has reported for this key, whether or
    /// not the cache has caught up to it yet.
    pub fn highest_observed_version(&self) -> Option<ConfigVersion> {
        match self.inner.highest_observed.load(Ordering::SeqCst) {
            0 => None,
            v => Some(ConfigVersion::new(v)),
        }
    }

    /// Block until the manager is serving, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> StoreResult<()> {
        let mut rx = self.inner.lifecycle.subscribe();
        let wait = async {
            loop {
                let state = *rx.borrow_and_update();
                if state.is_serving() {
                    return Ok(());
                }
                if state.is_terminal() {
                    return Err(StoreError::NotReady);
                }
                if rx.changed().await.is_err() {
                    return Err(StoreError::ShuttingDown);
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::NotReady),
        }
    }

    /// Propose an update through the optimistic read-modify-write loop.
    ///
    /// Proposals submitted before the initial load completes wait for
    /// readiness within their deadline. Concurrent local proposals are
    /// serialized, not interleaved. On success the local cache has
    /// already been swapped and subscribers notified.
    pub async fn update<F>(&self, mutate: F, deadline: Duration) -> StoreResult<Arc<Versioned<T>>>
    where
        F: FnMut(&T) -> Mutation<T> + Send,
    {
        let deadline_at = Instant::now() + deadline;
        self.wait_ready(deadline).await?;

        let _permit = match tokio::time::timeout_at(deadline_at, self.inner.update_gate.lock()).await
        {
            Ok(permit) => permit,
            Err(_) => return Err(StoreError::Timeout),
        };

        if !self.inner.lifecycle.borrow().is_serving() {
            return Err(StoreError::ShuttingDown);
        }

        self.inner.transition(ManagerState::Updating)?;
        let result = self.inner.typed.read_modify_write(mutate, Some(deadline_at)).await;
        let _ = self.inner.transition(ManagerState::Ready);

        match result {
            Ok(accepted) => {
                let accepted = Arc::new(accepted);
                self.inner.install(accepted.clone());
                Ok(accepted)
            }
            Err(e) => {
                debug!(key = %self.inner.key, error = %e, "proposal failed");
                Err(e)
            }
        }
    }

    /// Subscribe to accepted version transitions, delivered in order.
    pub fn subscribe(&self) -> Subscription<Arc<Versioned<T>>> {
        self.inner.subscribers.subscribe()
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.lifecycle.borrow()
    }

    /// Stop the catch-up task and end all subscriptions.
    pub async fn shutdown(&self) {
        if self.inner.lifecycle.borrow().is_terminal() {
            return;
        }
        let _ = self.inner.transition(ManagerState::ShuttingDown);
        self.inner.shutdown.send_replace(true);

        if let Some(task) = self.background.lock().await.take() {
            let _ = task.await;
        }

        self.inner.subscribers.clear();
        let _ = self.inner.transition(ManagerState::Stopped);
        info!(key = %self.inner.key, "configuration manager stopped");
    }

    /// Follow externally-originated version bumps: react to the backend
    /// watch channel, and poll on an interval as the fallback watch
    /// delivery is allowed to need.
    async fn catch_up_loop(inner: Arc<Inner<T>>, mut shutdown: watch::Receiver<bool>) {
        let mut watch_rx = inner.store.watch(&inner.key);
        let mut poll = tokio::time::interval(inner.settings.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; consume it.
        poll.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = watch_rx.changed() => {
                    if changed.is_err() {
                        // Watch source went away; re-subscribe and let
                        // polling cover the gap.
                        watch_rx = inner.store.watch(&inner.key);
                        continue;
                    }
                    let observed = *watch_rx.borrow_and_update();
                    if let Some(version) = observed {
                        inner.note_observed(version);
                        if inner.is_behind(version) {
                            inner.refresh().await;
                        }
                    }
                }
                _ = poll.tick() => {
                    inner.refresh().await;
                }
            }
        }
    }
}

impl<T: ConfigPayload> Inner<T> {
    fn transition(&self, next: ManagerState) -> StoreResult<()> {
        let current = *self.lifecycle.borrow();
        if !current.can_transition_to(next) {
            return Err(StoreError::Internal(format!(
                "invalid lifecycle transition {} -> {}",
                current, next
            )));
        }
        self.lifecycle.send_replace(next);
        Ok(())
    }

    fn note_observed(&self, version: ConfigVersion) {
        self.highest_observed.fetch_max(version.as_u64(), Ordering::SeqCst);
    }

    fn is_behind(&self, version: ConfigVersion) -> bool {
        let cached = self
            .current
            .read()
            .expect("cache lock poisoned")
            .as_ref()
            .map(|v| v.version)
            .unwrap_or(ConfigVersion::GENESIS);
        cached < version
    }

    /// Re-fetch from the backend and install if newer. Failures keep the
    /// last-known-good cache; the next poll tick tries again.
    async fn refresh(&self) {
        match self.typed.get().await {
            Ok(fresh) => {
                self.install(Arc::new(fresh));
            }
            Err(e @ StoreError::Corrupt(_)) => {
                error!(key = %self.key, error = %e, "refresh read corrupt data, keeping cached state");
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "refresh failed, keeping cached state");
            }
        }
    }

    /// Swap the cache to `new` if it is strictly newer, and fan out one
    /// notification. The install gate keeps swap+publish atomic with
    /// respect to other installers, so no subscriber ever sees versions
    /// out of order.
    fn install(&self, new: Arc<Versioned<T>>) -> bool {
        let _ordering = self.install_gate.lock().expect("install lock poisoned");

        {
            let mut cache = self.current.write().expect("cache lock poisoned");
            match cache.as_ref() {
                Some(existing) if existing.version >= new.version => return false,
                _ => *cache = Some(new.clone()),
            }
        }

        self.note_observed(new.version);
        debug!(key = %self.key, version = %new.version, "installed configuration");
        self.subscribers.publish(&new);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryConfigStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Flag {
        enabled: bool,
    }

    fn fast_settings() -> ManagerConfig {
        ManagerConfig {
            ready_deadline: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            subscriber_queue_depth: 8,
        }
    }

    fn manager(store: Arc<InMemoryConfigStore>) -> ConfigManager<Flag> {
        ConfigManager::new(
            store,
            ConfigKey::from("flag"),
            RetryConfig::fast_for_tests(),
            fast_settings(),
        )
    }

    #[tokio::test]
    async fn test_get_before_start_is_not_ready() {
        let store = Arc::new(InMemoryConfigStore::new());
        let mgr = manager(store);
        assert!(matches!(mgr.get(), Err(StoreError::NotReady)));
    }

    #[tokio::test]
    async fn test_start_without_key_times_out_not_ready() {
        let store = Arc::new(InMemoryConfigStore::new());
        let mgr = manager(store);
        let err = mgr.start().await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady));
        assert_eq!(mgr.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_loads_existing_value() {
        let store = Arc::new(InMemoryConfigStore::new());
        let typed = TypedConfigStore::<Flag>::new(
            store.clone(),
            ConfigKey::from("flag"),
            RetryConfig::fast_for_tests(),
        );
        typed.create(&Flag { enabled: false }).await.unwrap();

        let mgr = manager(store);
        mgr.start().await.unwrap();
        assert_eq!(mgr.state(), ManagerState::Ready);

        let cached = mgr.get().unwrap();
        assert_eq!(cached.version, ConfigVersion::new(1));
        assert!(!cached.value.enabled);

        mgr.shutdown().await;
        assert_eq!(mgr.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn test_update_swaps_cache_and_reports_version() {
        let store = Arc::new(InMemoryConfigStore::new());
        let typed = TypedConfigStore::<Flag>::new(
            store.clone(),
            ConfigKey::from("flag"),
            RetryConfig::fast_for_tests(),
        );
        typed.create(&Flag { enabled: false }).await.unwrap();

        let mgr = manager(store);
        mgr.start().await.unwrap();

        let accepted = mgr
            .update(|f| Mutation::Update(Flag { enabled: !f.enabled }), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(accepted.version, ConfigVersion::new(2));
        assert!(accepted.value.enabled);

        let cached = mgr.get().unwrap();
        assert_eq!(cached.version, ConfigVersion::new(2));

        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_after_shutdown_is_refused() {
        let store = Arc::new(InMemoryConfigStore::new());
        let typed = TypedConfigStore::<Flag>::new(
            store.clone(),
            ConfigKey::from("flag"),
            RetryConfig::fast_for_tests(),
        );
        typed.create(&Flag { enabled: false }).await.unwrap();

        let mgr = manager(store);
        mgr.start().await.unwrap();
        mgr.shutdown().await;

        let err = mgr
            .update(|f| Mutation::Update(f.clone()), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotReady | StoreError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_right_after_start_reaches_stopped() {
        let store = Arc::new(InMemoryConfigStore::new());
        let typed = TypedConfigStore::<Flag>::new(
            store.clone(),
            ConfigKey::from("flag"),
            RetryConfig::fast_for_tests(),
        );
        typed.create(&Flag { enabled: false }).await.unwrap();

        let mgr = manager(store);
        mgr.start().await.unwrap();

        // The signal must reach the catch-up task even if it has not
        // been polled yet; a lost signal would hang this await forever.
        tokio::time::timeout(Duration::from_secs(5), mgr.shutdown())
            .await
            .expect("shutdown never completed");
        assert_eq!(mgr.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn test_highest_observed_tracks_installs() {
        let store = Arc::new(InMemoryConfigStore::new());
        let typed = TypedConfigStore::<Flag>::new(
            store.clone(),
            ConfigKey::from("flag"),
            RetryConfig::fast_for_tests(),
        );
        typed.create(&Flag { enabled: false }).await.unwrap();

        let mgr = manager(store);
        assert_eq!(mgr.highest_observed_version(), None);
        mgr.start().await.unwrap();
        assert_eq!(mgr.highest_observed_version(), Some(ConfigVersion::new(1)));

        mgr.shutdown().await;
    }
}
