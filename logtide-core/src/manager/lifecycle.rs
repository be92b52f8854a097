//! Manager lifecycle states
//!
//! `Uninitialized -> Loading -> Ready -> (Updating -> Ready)* ->
//! ShuttingDown -> Stopped`. A load that never completes within the
//! ready deadline goes straight to Stopped.

use std::fmt;

/// Lifecycle state of a configuration manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Constructed, start() not yet called
    Uninitialized,

    /// Initial load in progress; proposals queue up to the ready deadline
    Loading,

    /// Serving reads from the cached state; accepting proposals
    Ready,

    /// A proposal is running its read-modify-write loop; reads still
    /// served from the last-known-good cache
    Updating,

    /// Draining; new calls are refused
    ShuttingDown,

    /// Terminal
    Stopped,
}

impl ManagerState {
    /// Whether reads can be served from the cache.
    pub fn is_serving(self) -> bool {
        matches!(self, ManagerState::Ready | ManagerState::Updating)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ManagerState::Stopped)
    }

    /// Valid transitions of the lifecycle state machine.
    pub fn can_transition_to(self, next: ManagerState) -> bool {
        use ManagerState::*;
        matches!(
            (self, next),
            (Uninitialized, Loading)
                | (Loading, Ready)
                | (Loading, Stopped)
                | (Ready, Updating)
                | (Updating, Ready)
                | (Ready, ShuttingDown)
                | (Updating, ShuttingDown)
                | (Loading, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Loading => "loading",
            ManagerState::Ready => "ready",
            ManagerState::Updating => "updating",
            ManagerState::ShuttingDown => "shutting-down",
            ManagerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}
