//! Configuration manager subsystem
//!
//! The process-local, cached, subscribable view over a versioned
//! configuration key, plus the lifecycle state machine that governs it.

pub mod config_manager;
pub mod lifecycle;

#[cfg(test)]
pub mod tests;

pub use config_manager::ConfigManager;
pub use lifecycle::ManagerState;
