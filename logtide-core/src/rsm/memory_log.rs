/*
    memory_log.rs - In-memory delta/snapshot log

    Test-double backend for the replicated state machine engine. Ordering
    is a single mutex-guarded vector; tailing combines a backlog read
    with a broadcast of new appends, deduplicated by position so a tail
    never skips or repeats a record even if it races an append.
*/

use crate::rsm::errors::{RsmError, RsmResult};
use crate::rsm::log::{DeltaLog, DeltaRecord, LogPosition, SnapshotRecord};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

const TAIL_BUFFER: usize = 256;

#[derive(Default)]
struct Shared {
    records: Vec<DeltaRecord>,
    snapshots: Vec<SnapshotRecord>,
}

/// In-memory implementation of the ordered delta log
pub struct InMemoryDeltaLog {
    shared: Arc<Mutex<Shared>>,
    appended: broadcast::Sender<DeltaRecord>,
}

impl Default for InMemoryDeltaLog {
    fn default() -> Self {
        InMemoryDeltaLog {
            shared: Arc::new(Mutex::new(Shared::default())),
            appended: broadcast::channel(TAIL_BUFFER).0,
        }
    }
}

impl InMemoryDeltaLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the last appended record.
    pub fn last_position(&self) -> LogPosition {
        let shared = self.shared.lock().expect("log mutex poisoned");
        LogPosition::new(shared.records.len() as u64)
    }

    pub fn snapshot_count(&self) -> usize {
        self.shared.lock().expect("log mutex poisoned").snapshots.len()
    }
}

#[async_trait]
impl DeltaLog for InMemoryDeltaLog {
    async fn append(&self, delta: Vec<u8>) -> RsmResult<LogPosition> {
        let mut shared = self.shared.lock().expect("log mutex poisoned");
        let position = LogPosition::new(shared.records.len() as u64 + 1);
        let record = DeltaRecord { position, payload: delta };
        shared.records.push(record.clone());
        // No receivers is fine; tails pick the record up from the backlog.
        let _ = self.appended.send(record);
        Ok(position)
    }

    async fn tail(&self, after: LogPosition) -> RsmResult<mpsc::Receiver<DeltaRecord>> {
        let (tx, rx) = mpsc::channel(TAIL_BUFFER);

        // Subscribe under the lock so no append can slip between the
        // backlog read and the live feed.
        let (backlog, mut live) = {
            let shared = self.shared.lock().expect("log mutex poisoned");
            let backlog: Vec<DeltaRecord> =
                shared.records.iter().filter(|r| r.position > after).cloned().collect();
            (backlog, self.appended.subscribe())
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut last_sent = after;

            for record in backlog {
                last_sent = record.position;
                if tx.send(record).await.is_err() {
                    return;
                }
            }

            loop {
                match live.recv().await {
                    Ok(record) => {
                        if record.position <= last_sent {
                            continue;
                        }
                        last_sent = record.position;
                        if tx.send(record).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Fell behind the broadcast ring; re-read the
                        // missed span from the authoritative vector.
                        let missed: Vec<DeltaRecord> = {
                            let shared = shared.lock().expect("log mutex poisoned");
                            shared
                                .records
                                .iter()
                                .filter(|r| r.position > last_sent)
                                .cloned()
                                .collect()
                        };
                        for record in missed {
                            last_sent = record.position;
                            if tx.send(record).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }

    async fn latest_snapshot(
        &self,
        up_to: Option<LogPosition>,
    ) -> RsmResult<Option<SnapshotRecord>> {
        let shared = self.shared.lock().expect("log mutex poisoned");
        Ok(shared
            .snapshots
            .iter()
            .filter(|s| up_to.map_or(true, |bound| s.position <= bound))
            .max_by_key(|s| s.position)
            .cloned())
    }

    async fn write_snapshot(&self, record: SnapshotRecord) -> RsmResult<()> {
        if record.payload.is_empty() {
            return Err(RsmError::Backend("refusing to store empty snapshot".to_string()));
        }
        let mut shared = self.shared.lock().expect("log mutex poisoned");
        shared.snapshots.push(record);
        Ok(())
    }
}
