//! Ergonomic Rust client for the Patchbay control plane.
//!
//! This crate provides a typed client for registering signals and slots with
//! the Patchbay registry, wiring them together, and watching connection
//! changes. The data plane (value transport and filtering) lives in the main
//! `patchbay` crate; this crate covers the control plane only.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use patchbay_client::{RegistryClient, ValueType};
//!
//! async fn example() -> patchbay_client::Result<()> {
//!     // Connect to the registry (UDS path or host:port)
//!     let client = RegistryClient::connect("/tmp/patchbay/registry.sock").await?;
//!
//!     // Announce a signal and a slot
//!     client.register_signal("temperature", ValueType::Double, "boiler feed").await?;
//!     client.register_slot("display", ValueType::Double, "panel readout").await?;
//!
//!     // Wire them together
//!     let slot = client.connect_slot("display", "temperature").await?;
//!     assert!(slot.connected_to.is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Mocking for Tests
//!
//! Implement the [`traits::Registry`] trait to create mock clients:
//!
//! ```rust,ignore
//! use patchbay_client::traits::Registry;
//! use patchbay_client::{Signal, Slot, ValueType};
//! use async_trait::async_trait;
//!
//! struct MockRegistry;
//!
//! #[async_trait]
//! impl Registry for MockRegistry {
//!     async fn register_signal(&self, name: &str, value_type: ValueType, description: &str)
//!         -> patchbay_client::Result<Signal>
//!     {
//!         // Return a canned record
//!         todo!()
//!     }
//!     // ...
//! }
//! ```

pub mod client;
pub mod error;
pub mod model;
pub mod traits;
pub mod wire;

// Re-export main types at crate root
pub use client::{ConnectionChanges, RegistryClient};
pub use error::{ClientError, Result};
pub use model::{Identity, Signal, Slot, Value, ValueType};
pub use wire::{Connection, Event};
