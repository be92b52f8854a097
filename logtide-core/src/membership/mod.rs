/*
    Membership subsystem - Cluster node roster

    The canonical payload the configuration plumbing exists to carry:
    - Roster types (node indexes, roles, per-node config)
    - Membership deltas and their deterministic application
    - Type aliases binding the roster to the manager and the engine
*/

pub mod nodes;
pub mod state_machine;

pub use nodes::{NodeConfig, NodeIndex, NodeRole, NodesConfiguration};
pub use state_machine::{MembershipDelta, MembershipStateMachine};

use crate::manager::ConfigManager;
use crate::rsm::ReplicatedStateMachine;

/// Well-known key the cluster roster is stored under
pub const NODES_CONFIG_KEY: &str = "nodes_configuration";

/// Manager serving the cluster roster from the versioned store
pub type NodesConfigurationManager = ConfigManager<NodesConfiguration>;

/// Roster replica derived from the membership delta log
pub type MembershipReplica = ReplicatedStateMachine<MembershipStateMachine>;
