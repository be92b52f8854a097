/*
    typed.rs - Typed layer over the versioned store

    Serializes a typed payload in and out of the opaque blob the backend
    persists, and provides the optimistic read-modify-write loop every
    writer in the cluster goes through:

        read (value, version) -> mutate -> CAS at that version
        -> on mismatch, re-read and recompute against the fresh value

    The loop is bounded: version-mismatch exhaustion surfaces as
    UpdateConflict, transient exhaustion as Unavailable, and a caller
    deadline as Timeout. A Timeout after a write was issued means
    "unknown - may have applied"; a VersionMismatch always means
    "definitely not applied".
*/

use crate::config::RetryConfig;
use crate::store::backend::{ConfigKey, VersionedConfigStore, WriteCondition};
use crate::store::errors::{StoreError, StoreResult};
use crate::store::version::{ConfigVersion, Versioned};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Payload types storable through the typed layer
pub trait ConfigPayload:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

impl<T> ConfigPayload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Outcome of a mutator function in the read-modify-write loop
#[derive(Debug, Clone)]
pub enum Mutation<T> {
    /// Replace the current value with this one
    Update(T),

    /// The current value already satisfies the caller; write nothing
    NoChange,
}

/// Typed view of one configuration key
pub struct TypedConfigStore<T> {
    store: Arc<dyn VersionedConfigStore>,
    key: ConfigKey,
    retry: RetryConfig,
    author: Option<String>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: ConfigPayload> TypedConfigStore<T> {
    pub fn new(store: Arc<dyn VersionedConfigStore>, key: ConfigKey, retry: RetryConfig) -> Self {
        TypedConfigStore { store, key, retry, author: None, _payload: PhantomData }
    }

    /// Record an author string on every write issued through this store.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// Read and decode the current value.
    pub async fn get(&self) -> StoreResult<Versioned<T>> {
        let value = self.store.get(&self.key).await?;
        let typed: T = bincode::deserialize(&value.payload)
            .map_err(|e| StoreError::Corrupt(format!("undecodable payload: {}", e)))?;
        Ok(Versioned::new(typed, value.version))
    }

    /// Write the initial value of the key; fails with `AlreadyExists` if
    /// any writer got there first.
    pub async fn create(&self, value: &T) -> StoreResult<ConfigVersion> {
        self.write(value, WriteCondition::CreateOnly).await
    }

    /// Conditional typed write.
    pub async fn write(&self, value: &T, condition: WriteCondition) -> StoreResult<ConfigVersion> {
        let payload = bincode::serialize(value)?;
        self.store.put(&self.key, payload, condition, self.author.clone()).await
    }

    /// Optimistic read-modify-write.
    ///
    /// `mutate` must be a pure function of the value it is given; it may
    /// be called several times against successively fresher values. The
    /// loop never blindly retries a lost CAS: it always re-reads and
    /// recomputes first, so concurrent changes are never clobbered.
    pub async fn read_modify_write<F>(
        &self,
        mut mutate: F,
        deadline: Option<Instant>,
    ) -> StoreResult<Versioned<T>>
    where
        F: FnMut(&T) -> Mutation<T> + Send,
    {
        let mut attempts: u32 = 0;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(StoreError::Timeout);
            }

            let current = match with_deadline(deadline, self.get()).await {
                Ok(current) => current,
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts {
                        return Err(StoreError::Unavailable(e.to_string()));
                    }
                    self.backoff(attempts, deadline).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let next = match mutate(&current.value) {
                Mutation::NoChange => return Ok(current),
                Mutation::Update(next) => next,
            };

            let condition = WriteCondition::MatchVersion(current.version);
            match with_deadline(deadline, self.write(&next, condition)).await {
                Ok(version) => {
                    debug!(key = %self.key, %version, "conditional write accepted");
                    return Ok(Versioned::new(next, version));
                }
                Err(StoreError::VersionMismatch { actual }) => {
                    attempts += 1;
                    debug!(
                        key = %self.key,
                        expected = %current.version,
                        %actual,
                        attempt = attempts,
                        "conditional write lost the race, recomputing"
                    );
                    if attempts >= self.retry.max_attempts {
                        return Err(StoreError::UpdateConflict { attempts });
                    }
                }
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    warn!(key = %self.key, error = %e, attempt = attempts, "transient write failure");
                    if attempts >= self.retry.max_attempts {
                        return Err(StoreError::Unavailable(e.to_string()));
                    }
                    self.backoff(attempts, deadline).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff with jitter, clipped to the caller's deadline.
    async fn backoff(&self, attempt: u32, deadline: Option<Instant>) -> StoreResult<()> {
        let exp = self
            .retry
            .base_backoff
            .saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
        let capped = exp.min(self.retry.max_backoff);

        let millis = capped.as_millis().max(1) as u64;
        let jittered = Duration::from_millis(millis / 2 + rand::rng().random_range(0..=millis / 2));

        let delay = match deadline {
            Some(d) => jittered.min(d.saturating_duration_since(Instant::now())),
            None => jittered,
        };
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

async fn with_deadline<F, R>(deadline: Option<Instant>, fut: F) -> StoreResult<R>
where
    F: Future<Output = StoreResult<R>>,
{
    match deadline {
        Some(d) => match tokio::time::timeout_at(d, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        },
        None => fut.await,
    }
}
