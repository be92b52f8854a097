//! Cross-cutting engine tests: replica convergence, snapshot/replay
//! equivalence, and bootstrap scenarios.


use crate::rsm::engine::{ApplyRejected, StateMachine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimal roster machine shared by the engine test suites. Uses
/// ordered containers only, so apply is deterministic by construction.
pub(crate) struct RosterMachine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RosterDelta {
    Add { id: u32, name: String },
    Rename { id: u32, name: String },
    Remove { id: u32 },
}

impl StateMachine for RosterMachine {
    type State = BTreeMap<u32, String>;
    type Delta = RosterDelta;

    fn initial_state(&self) -> Self::State {
        BTreeMap::new()
    }

    fn apply(&self, state: &Self::State, delta: &Self::Delta) -> Result<Self::State, ApplyRejected> {
        let mut next = state.clone();
        match delta {
            RosterDelta::Add { id, name } => {
                if next.contains_key(id) {
                    return Err(ApplyRejected::new(format!("node {} already present", id)));
                }
                next.insert(*id, name.clone());
            }
            RosterDelta::Rename { id, name } => {
                if !next.contains_key(id) {
                    return Err(ApplyRejected::new(format!("node {} not present", id)));
                }
                next.insert(*id, name.clone());
            }
            RosterDelta::Remove { id } => {
                if next.remove(id).is_none() {
                    return Err(ApplyRejected::new(format!("node {} not present", id)));
                }
            }
        }
        Ok(next)
    }
}
