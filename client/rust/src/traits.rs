//! Client-side trait for the registry surface.
//!
//! Implement this to mock the control plane in tests without a running
//! server.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Signal, Slot, ValueType};
use crate::wire::Connection;

/// Asynchronous front-end to the signal/slot registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create-or-heartbeat a signal. Idempotent; safe to call on every
    /// process start.
    async fn register_signal(
        &self,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Signal>;

    /// Create-or-heartbeat a slot.
    async fn register_slot(
        &self,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Slot>;

    /// Wire a slot to a signal of the same type.
    async fn connect(&self, slot_name: &str, signal_name: &str) -> Result<Slot>;

    /// Clear a slot's wiring. Idempotent.
    async fn disconnect(&self, slot_name: &str) -> Result<Slot>;

    /// Snapshot of all registered signals.
    async fn list_signals(&self) -> Result<Vec<Signal>>;

    /// Snapshot of all registered slots.
    async fn list_slots(&self) -> Result<Vec<Slot>>;

    /// Current wiring as signal name to connected slot names.
    async fn list_connections(&self) -> Result<Vec<Connection>>;
}
