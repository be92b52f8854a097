/*
    engine.rs - Generic replicated state machine

    Derives convergent state from a replicated, snapshot-compactable
    delta log: bootstrap from the most recent snapshot, tail the log
    from the snapshot's exact position, apply every delta in log order
    through a pluggable apply function, and periodically compact by
    writing a new snapshot tagged with the position it reflects.

    Correctness rests on one property: apply is a pure, deterministic
    function of (state, delta). Two replicas that consume the same
    ordered records from the same base reach bit-identical state -
    including rejections, which every replica makes identically and
    which advance the position without changing state.
*/

use crate::config::RsmConfig;
use crate::rsm::errors::{RsmError, RsmResult};
use crate::rsm::log::{DeltaLog, DeltaRecord, LogPosition, SnapshotRecord};
use crate::rsm::snapshot::{decode_snapshot, encode_snapshot};
use crate::subscriber::{SubscriberRegistry, Subscription};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why an apply function refused a delta.
///
/// Rejection is not an error: it is a deterministic decision every
/// replica makes identically, logged and skipped.
#[derive(Debug, Clone)]
pub struct ApplyRejected {
    pub reason: String,
}

impl ApplyRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        ApplyRejected { reason: reason.into() }
    }
}

impl std::fmt::Display for ApplyRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// The pluggable core of a replicated state machine.
///
/// `apply` must be pure: no clocks, no randomness, no iteration over
/// unordered containers feeding into the result. Anything
/// non-deterministic here desynchronizes replicas silently.
pub trait StateMachine: Send + Sync + 'static {
    type State: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Delta: Serialize + DeserializeOwned + Send + 'static;

    /// State before any delta has ever been applied.
    fn initial_state(&self) -> Self::State;

    /// Deterministically derive the successor state, or reject.
    fn apply(&self, state: &Self::State, delta: &Self::Delta) -> Result<Self::State, ApplyRejected>;
}

/// Materialized state plus the log position it reflects
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized<S> {
    pub state: S,
    pub position: LogPosition,
}

/// Generic replicated state machine instance
pub struct ReplicatedStateMachine<M: StateMachine> {
    inner: Arc<EngineInner<M>>,
    replay_task: Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner<M: StateMachine> {
    machine: M,
    log: Arc<dyn DeltaLog>,
    settings: RsmConfig,

    /// Copy-on-write materialized view; replaced wholesale by the replay
    /// task, cloned cheaply by readers
    current: RwLock<Arc<Materialized<M::State>>>,

    /// Caught-up marker; also drives wait_for_position
    applied: watch::Sender<LogPosition>,

    subscribers: SubscriberRegistry<Arc<Materialized<M::State>>>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

impl<M: StateMachine> ReplicatedStateMachine<M> {
    pub fn new(machine: M, log: Arc<dyn DeltaLog>, settings: RsmConfig) -> Self {
        let genesis = Arc::new(Materialized {
            state: machine.initial_state(),
            position: LogPosition::GENESIS,
        });
        let subscribers = SubscriberRegistry::new(settings.subscriber_queue_depth);

        ReplicatedStateMachine {
            inner: Arc::new(EngineInner {
                machine,
                log,
                settings,
                current: RwLock::new(genesis),
                applied: watch::channel(LogPosition::GENESIS).0,
                subscribers,
                shutdown: watch::channel(false).0,
                started: AtomicBool::new(false),
            }),
            replay_task: Mutex::new(None),
        }
    }

    /// Bootstrap from the latest snapshot (or genesis) and start tailing
    /// the delta log.
    ///
    /// A snapshot that fails to decode is fatal: this replica refuses to
    /// serve rather than rebuild a possibly wrong state.
    pub async fn start(&self) -> RsmResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(RsmError::Internal("engine already started".to_string()));
        }

        let base = match self.inner.log.latest_snapshot(None).await? {
            Some(record) => {
                let (state, position) = decode_snapshot::<M::State>(&record.payload)?;
                if position != record.position {
                    return Err(RsmError::Corrupt(format!(
                        "snapshot tagged {} but encodes {}",
                        record.position, position
                    )));
                }
                info!(%position, "bootstrapping from snapshot");
                Materialized { state, position }
            }
            None => {
                info!("no snapshot found, bootstrapping from genesis");
                Materialized {
                    state: self.inner.machine.initial_state(),
                    position: LogPosition::GENESIS,
                }
            }
        };

        let start_position = base.position;
        {
            let mut current = self.inner.current.write().expect("state lock poisoned");
            *current = Arc::new(base);
        }
        self.inner.applied.send_replace(start_position);

        let tail = self.inner.log.tail(start_position).await?;
        // Subscribe before spawning so a shutdown issued right after
        // start() always has a live receiver to signal.
        let shutdown_rx = self.inner.shutdown.subscribe();
        let task = tokio::spawn(Self::replay_loop(self.inner.clone(), tail, shutdown_rx));
        *self.replay_task.lock().await = Some(task);
        Ok(())
    }

    /// Current materialized state and the position it reflects.
    pub fn state(&self) -> Arc<Materialized<M::State>> {
        self.inner.current.read().expect("state lock poisoned").clone()
    }

    /// Highest log position this replica has replayed through.
    pub fn position(&self) -> LogPosition {
        *self.inner.applied.borrow()
    }

    /// Wait until replay has advanced through `position`.
    pub async fn wait_for_position(
        &self,
        position: LogPosition,
        timeout: Duration,
    ) -> RsmResult<()> {
        let mut rx = self.inner.applied.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            if *rx.borrow_and_update() >= position {
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(RsmError::ShuttingDown),
                Err(_) => return Err(RsmError::Timeout),
            }
        }
    }

    /// Post a delta. The backend log is the ordering authority: the
    /// returned position is where every replica, including this one,
    /// will apply it. Local state is reconciled when the delta
    /// round-trips back through the tail.
    pub async fn propose(&self, delta: &M::Delta) -> RsmResult<LogPosition> {
        let payload = bincode::serialize(delta)?;
        let position = self.inner.log.append(payload).await?;
        debug!(%position, "posted delta");
        Ok(position)
    }

    /// Post a delta and wait for it to round-trip through the tail.
    /// The returned state reflects at least the posted delta (or its
    /// deterministic rejection).
    pub async fn propose_and_wait(
        &self,
        delta: &M::Delta,
        timeout: Duration,
    ) -> RsmResult<Arc<Materialized<M::State>>> {
        let position = self.propose(delta).await?;
        self.wait_for_position(position, timeout).await?;
        Ok(self.state())
    }

    /// Subscribe to state transitions (applied deltas only; rejections
    /// advance the position without producing an event).
    pub fn subscribe(&self) -> Subscription<Arc<Materialized<M::State>>> {
        self.inner.subscribers.subscribe()
    }

    /// Stop replay and end all subscriptions.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        if let Some(task) = self.replay_task.lock().await.take() {
            let _ = task.await;
        }
        self.inner.subscribers.clear();
    }

    async fn replay_loop(
        inner: Arc<EngineInner<M>>,
        mut tail: mpsc::Receiver<DeltaRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut applied_since_snapshot: u64 = 0;
        let mut last_snapshot_at = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                record = tail.recv() => {
                    let Some(record) = record else {
                        warn!("delta log tail ended");
                        break;
                    };
                    if Self::apply_record(&inner, record) {
                        applied_since_snapshot += 1;
                    }

                    let due_by_count =
                        applied_since_snapshot >= inner.settings.snapshot_every_deltas;
                    let due_by_time = applied_since_snapshot > 0
                        && last_snapshot_at.elapsed() >= inner.settings.snapshot_interval;
                    if due_by_count || due_by_time {
                        if Self::write_snapshot(&inner).await {
                            applied_since_snapshot = 0;
                            last_snapshot_at = Instant::now();
                        }
                    }
                }
            }
        }
    }

    /// Apply one record in log order. Returns whether the delta changed
    /// state (undecodable and rejected deltas advance position only).
    fn apply_record(inner: &EngineInner<M>, record: DeltaRecord) -> bool {
        let current = inner.current.read().expect("state lock poisoned").clone();

        let (next_state, applied) = match bincode::deserialize::<M::Delta>(&record.payload) {
            Err(e) => {
                warn!(position = %record.position, error = %e, "skipping undecodable delta");
                (current.state.clone(), false)
            }
            Ok(delta) => match inner.machine.apply(&current.state, &delta) {
                Ok(next) => (next, true),
                Err(rejected) => {
                    warn!(position = %record.position, reason = %rejected, "delta rejected");
                    (current.state.clone(), false)
                }
            },
        };

        let next = Arc::new(Materialized { state: next_state, position: record.position });
        {
            let mut cur = inner.current.write().expect("state lock poisoned");
            *cur = next.clone();
        }
        inner.applied.send_replace(record.position);

        if applied {
            inner.subscribers.publish(&next);
        }
        applied
    }

    /// Compact: persist the current state tagged with the exact position
    /// it reflects. Failure is non-fatal; replay continues and the next
    /// trigger retries.
    async fn write_snapshot(inner: &EngineInner<M>) -> bool {
        let current = inner.current.read().expect("state lock poisoned").clone();

        let blob = match encode_snapshot(&current.state, current.position) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "snapshot encode failed");
                return false;
            }
        };

        let record = SnapshotRecord { position: current.position, payload: blob };
        match inner.log.write_snapshot(record).await {
            Ok(()) => {
                info!(position = %current.position, "wrote snapshot");
                true
            }
            Err(e) => {
                warn!(error = %e, "snapshot write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsm::memory_log::InMemoryDeltaLog;
    use serde::Deserialize;

    /// Counter that rejects decrements below zero.
    struct CounterMachine;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterDelta {
        Add(u64),
        Sub(u64),
    }

    impl StateMachine for CounterMachine {
        type State = u64;
        type Delta = CounterDelta;

        fn initial_state(&self) -> u64 {
            0
        }

        fn apply(&self, state: &u64, delta: &CounterDelta) -> Result<u64, ApplyRejected> {
            match delta {
                CounterDelta::Add(n) => Ok(state + n),
                CounterDelta::Sub(n) if *n > *state => {
                    Err(ApplyRejected::new("counter cannot go negative"))
                }
                CounterDelta::Sub(n) => Ok(state - n),
            }
        }
    }

    fn fast_rsm_config() -> RsmConfig {
        RsmConfig {
            snapshot_every_deltas: 1000,
            snapshot_interval: Duration::from_secs(3600),
            subscriber_queue_depth: 8,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_from_genesis_and_apply() {
        let log = Arc::new(InMemoryDeltaLog::new());
        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        engine.start().await.unwrap();

        let after = engine
            .propose_and_wait(&CounterDelta::Add(5), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(after.state, 5);
        assert_eq!(after.position, LogPosition::new(1));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejection_advances_position_without_state_change() {
        let log = Arc::new(InMemoryDeltaLog::new());
        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        engine.start().await.unwrap();

        engine.propose_and_wait(&CounterDelta::Add(3), Duration::from_secs(1)).await.unwrap();
        let after = engine
            .propose_and_wait(&CounterDelta::Sub(10), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(after.state, 3);
        assert_eq!(after.position, LogPosition::new(2));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_written_by_delta_count() {
        let log = Arc::new(InMemoryDeltaLog::new());
        let settings = RsmConfig {
            snapshot_every_deltas: 3,
            snapshot_interval: Duration::from_secs(3600),
            subscriber_queue_depth: 8,
        };
        let engine = ReplicatedStateMachine::new(CounterMachine, log.clone(), settings);
        engine.start().await.unwrap();

        for _ in 0..3 {
            engine.propose_and_wait(&CounterDelta::Add(1), Duration::from_secs(1)).await.unwrap();
        }

        // Snapshot write happens on the replay task right after the third
        // apply; give it a moment.
        let deadline = Instant::now() + Duration::from_secs(2);
        while log.snapshot_count() == 0 {
            assert!(Instant::now() < deadline, "snapshot never written");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snapshot = log.latest_snapshot(None).await.unwrap().unwrap();
        assert_eq!(snapshot.position, LogPosition::new(3));
        let (state, position) = decode_snapshot::<u64>(&snapshot.payload).unwrap();
        assert_eq!(state, 3);
        assert_eq!(position, LogPosition::new(3));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_from_snapshot_skips_replayed_prefix() {
        let log = Arc::new(InMemoryDeltaLog::new());

        // History: +1, +2, then a snapshot at position 2, then +4.
        log.append(bincode::serialize(&CounterDelta::Add(1)).unwrap()).await.unwrap();
        log.append(bincode::serialize(&CounterDelta::Add(2)).unwrap()).await.unwrap();
        let blob = encode_snapshot(&3u64, LogPosition::new(2)).unwrap();
        log.write_snapshot(SnapshotRecord { position: LogPosition::new(2), payload: blob })
            .await
            .unwrap();
        log.append(bincode::serialize(&CounterDelta::Add(4)).unwrap()).await.unwrap();

        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        engine.start().await.unwrap();
        engine.wait_for_position(LogPosition::new(3), Duration::from_secs(1)).await.unwrap();

        let state = engine.state();
        assert_eq!(state.state, 7);
        assert_eq!(state.position, LogPosition::new(3));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_bootstrap() {
        let log = Arc::new(InMemoryDeltaLog::new());
        log.write_snapshot(SnapshotRecord {
            position: LogPosition::new(1),
            payload: b"garbage!".to_vec(),
        })
        .await
        .unwrap();

        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, RsmError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_mistagged_snapshot_fails_bootstrap() {
        let log = Arc::new(InMemoryDeltaLog::new());
        let blob = encode_snapshot(&5u64, LogPosition::new(2)).unwrap();
        log.write_snapshot(SnapshotRecord { position: LogPosition::new(3), payload: blob })
            .await
            .unwrap();

        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, RsmError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_shutdown_right_after_start_completes() {
        let log = Arc::new(InMemoryDeltaLog::new());
        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        engine.start().await.unwrap();

        // The signal must reach the replay task even if it has not been
        // polled yet; a lost signal would hang this await forever.
        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .expect("shutdown never completed");
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let log = Arc::new(InMemoryDeltaLog::new());
        let engine = ReplicatedStateMachine::new(CounterMachine, log, fast_rsm_config());
        engine.start().await.unwrap();
        assert!(engine.start().await.is_err());
        engine.shutdown().await;
    }
}
