/*
    RSM subsystem - Replicated state machine engine

    Generic convergent-state derivation from an ordered delta log:
    - The abstract log contract (append, tail, snapshots)
    - The in-memory log used by tests
    - The snapshot blob codec
    - The engine: bootstrap, serial replay, compaction, fan-out
*/

pub mod engine;
pub mod errors;
pub mod log;
pub mod memory_log;
pub mod snapshot;

#[cfg(test)]
pub mod tests;

pub use engine::{ApplyRejected, Materialized, ReplicatedStateMachine, StateMachine};
pub use errors::{RsmError, RsmResult};
pub use log::{DeltaLog, DeltaRecord, LogPosition, SnapshotRecord};
pub use memory_log::InMemoryDeltaLog;
