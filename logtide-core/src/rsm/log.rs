/*
    log.rs - Abstract ordered delta/snapshot log

    The replication substrate of the state machine engine. Ordering
    authority belongs to the backend implementing this trait, never to
    the engine: the position assigned by append() is the one and only
    order deltas are applied in, on every replica.
*/

use crate::rsm::errors::RsmResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Position of a record in the backend log.
///
/// Positions are dense and strictly increasing; `GENESIS` precedes the
/// first record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The position "before the first record".
    pub const GENESIS: LogPosition = LogPosition(0);

    pub fn new(p: u64) -> Self {
        LogPosition(p)
    }

    pub fn next(self) -> Self {
        LogPosition(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// One ordered delta as stored by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub position: LogPosition,
    pub payload: Vec<u8>,
}

/// A snapshot blob tagged with the exact position it reflects
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub position: LogPosition,
    pub payload: Vec<u8>,
}

/// Abstract append-only ordered log with tailing and snapshots.
///
/// `tail` is restartable from any recorded position and yields records
/// strictly after it, in position order, indefinitely. Implementations
/// must never reorder or drop records within a tail.
#[async_trait]
pub trait DeltaLog: Send + Sync {
    /// Append a delta; the backend assigns and returns its position.
    async fn append(&self, delta: Vec<u8>) -> RsmResult<LogPosition>;

    /// Ordered, infinite sequence of records with positions strictly
    /// greater than `after`.
    async fn tail(&self, after: LogPosition) -> RsmResult<mpsc::Receiver<DeltaRecord>>;

    /// Most recent snapshot at or below `up_to` (unbounded if `None`).
    async fn latest_snapshot(&self, up_to: Option<LogPosition>)
        -> RsmResult<Option<SnapshotRecord>>;

    /// Persist a snapshot.
    async fn write_snapshot(&self, record: SnapshotRecord) -> RsmResult<()>;
}
