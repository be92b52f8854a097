/*
    Store subsystem - Versioned configuration storage

    The conditional-write substrate everything above it relies on:
    - Versions and versioned values
    - The abstract store contract and its write conditions
    - The persisted blob codec with corruption detection
    - The in-memory backend used by tests
    - The typed layer with the optimistic read-modify-write loop
*/

pub mod backend;
pub mod errors;
pub mod memory;
pub mod typed;
pub mod value;
pub mod version;

pub use backend::{ConfigKey, VersionedConfigStore, WriteCondition};
pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryConfigStore;
pub use typed::{ConfigPayload, Mutation, TypedConfigStore};
pub use value::{ConfigValue, ValueMetadata};
pub use version::{ConfigVersion, Versioned};
