//! Cluster membership and configuration replication core for logtide
//!
//! Every node in a logtide cluster needs the same answer to "what does
//! the cluster look like right now": which nodes exist, what roles they
//! serve, and which settings are in force. This crate provides the
//! plumbing that keeps that answer consistent:
//!
//! - [`store`]: a versioned key-value store contract with conditional
//!   writes, plus the typed layer running optimistic read-modify-write
//!   loops over it.
//! - [`manager`]: a process-local cached view of one configuration key
//!   with serialized proposals and ordered subscriber fan-out.
//! - [`rsm`]: a generic replicated state machine deriving convergent
//!   state from an ordered delta log with snapshot compaction.
//! - [`membership`]: the cluster roster payload both layers exist to
//!   carry.

pub mod config;
pub mod logging;
pub mod manager;
pub mod membership;
pub mod rsm;
pub mod store;
pub mod subscriber;

pub use config::CoreConfig;
pub use logging::{init_logging, init_logging_with_config, LogLevel};
pub use manager::{ConfigManager, ManagerState};
pub use membership::{
    MembershipDelta, MembershipStateMachine, NodeConfig, NodeIndex, NodeRole,
    NodesConfiguration, NodesConfigurationManager,
};
pub use rsm::{ReplicatedStateMachine, StateMachine};
pub use store::{
    ConfigKey, ConfigVersion, StoreError, StoreResult, TypedConfigStore, Versioned,
    VersionedConfigStore, WriteCondition,
};
