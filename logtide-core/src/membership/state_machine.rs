//! Membership deltas and their deterministic application
//!
//! Deltas carry full node payloads rather than diffs, so applying one
//! never depends on anything but the delta and the state it lands on.
//! Rejections are part of the contract: a delta that does not fit the
//! current roster is skipped identically on every replica.

use super::nodes::{NodeConfig, NodeIndex, NodesConfiguration};
use crate::rsm::{ApplyRejected, StateMachine};
use serde::{Deserialize, Serialize};

/// A single membership change proposed to the delta log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MembershipDelta {
    /// Add a node at an index that must not already exist
    AddNode {
        index: NodeIndex,
        config: NodeConfig,
    },

    /// Replace the configuration of an existing node
    UpdateNode {
        index: NodeIndex,
        config: NodeConfig,
    },

    /// Remove an existing node
    RemoveNode { index: NodeIndex },

    /// Bump the generation of an existing node slot
    BumpGeneration { index: NodeIndex },
}

/// Applies [`MembershipDelta`]s to a [`NodesConfiguration`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MembershipStateMachine;

impl StateMachine for MembershipStateMachine {
    type State = NodesConfiguration;
    type Delta = MembershipDelta;

    fn initial_state(&self) -> Self::State {
        NodesConfiguration::new()
    }

    fn apply(
        &self,
        state: &Self::State,
        delta: &Self::Delta,
    ) -> Result<Self::State, ApplyRejected> {
        let mut next = state.clone();
        match delta {
            MembershipDelta::AddNode { index, config } => {
                if next.contains(*index) {
                    return Err(ApplyRejected::new(format!(
                        "node {} already in the roster",
                        index
                    )));
                }
                next.insert(*index, config.clone());
            }
            MembershipDelta::UpdateNode { index, config } => {
                if !next.contains(*index) {
                    return Err(ApplyRejected::new(format!(
                        "node {} not in the roster",
                        index
                    )));
                }
                next.insert(*index, config.clone());
            }
            MembershipDelta::RemoveNode { index } => {
                if next.remove(*index).is_none() {
                    return Err(ApplyRejected::new(format!(
                        "node {} not in the roster",
                        index
                    )));
                }
            }
            MembershipDelta::BumpGeneration { index } => match next.get_mut(*index) {
                Some(config) => config.generation += 1,
                None => {
                    return Err(ApplyRejected::new(format!(
                        "node {} not in the roster",
                        index
                    )));
                }
            },
        }
        Ok(next)
    }
}
