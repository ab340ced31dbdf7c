//! The signal/slot registry.
//!
//! Holds the authoritative name-to-record mapping, enforces type
//! consistency, and announces wiring changes to watchers.

mod store;

pub use store::{ConnectionChange, RegistryStore, StoreError};
