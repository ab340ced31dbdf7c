//! Authoritative signal/slot store.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::client::wire::{Connection, ErrorKind, WireError};
use crate::client::{Signal, Slot, ValueType};
use crate::storage::{PersistedRecord, RecordStore, StorageError};

/// Capacity of the connection-change fanout. Watchers that fall this far
/// behind start losing events.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Errors from registry mutations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {name} is registered as {existing}, not {requested}")]
    TypeConflict {
        entity: &'static str,
        name: String,
        existing: ValueType,
        requested: ValueType,
    },

    #[error("slot {slot} is {slot_type} but signal {signal} is {signal_type}")]
    TypeMismatch {
        slot: String,
        slot_type: ValueType,
        signal: String,
        signal_type: ValueType,
    },

    #[error("{entity} {name} not found")]
    NotFound { entity: &'static str, name: String },

    #[error(transparent)]
    Persistence(#[from] StorageError),
}

impl StoreError {
    /// Wire-level kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::TypeConflict { .. } => ErrorKind::TypeConflict,
            StoreError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Persistence(_) => ErrorKind::PersistenceFailed,
        }
    }

    /// Render for the wire.
    pub fn to_wire(&self) -> WireError {
        WireError {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// A slot's wiring changed. `connected_to` is the new target, `None`
/// after a disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionChange {
    pub slot_name: String,
    pub connected_to: Option<String>,
}

#[derive(Default)]
struct Tables {
    signals: HashMap<String, Signal>,
    slots: HashMap<String, Slot>,
}

/// The registry.
///
/// In-memory state is authoritative; every accepted mutation is written
/// through to the record store, and a write failure is surfaced as
/// [`StoreError::Persistence`] without undoing the mutation. One write
/// lock spans each mutation, so callers never observe a half-applied
/// change and mutations land in a total order.
pub struct RegistryStore {
    tables: RwLock<Tables>,
    records: Arc<dyn RecordStore>,
    changes: broadcast::Sender<ConnectionChange>,
}

impl RegistryStore {
    /// Open the registry, restoring all records from the store.
    pub async fn open(records: Arc<dyn RecordStore>) -> Result<Self, StorageError> {
        let mut tables = Tables::default();
        for record in records.load_all().await? {
            match record {
                PersistedRecord::Signal(signal) => {
                    tables.signals.insert(signal.name.clone(), signal);
                }
                PersistedRecord::Slot(slot) => {
                    tables.slots.insert(slot.name.clone(), slot);
                }
            }
        }
        info!(
            signals = tables.signals.len(),
            slots = tables.slots.len(),
            "registry restored"
        );
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            tables: RwLock::new(tables),
            records,
            changes,
        })
    }

    /// Create or heartbeat a signal.
    ///
    /// A repeat registration refreshes `last_registered`, `created_by` and
    /// the description but never `created_at`. A different type for an
    /// existing name is rejected and the stored record stays untouched.
    pub async fn upsert_signal(
        &self,
        name: &str,
        value_type: ValueType,
        created_by: &str,
        description: &str,
    ) -> Result<Signal, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let signal = match tables.signals.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.value_type != value_type {
                    return Err(StoreError::TypeConflict {
                        entity: "signal",
                        name: name.to_string(),
                        existing: existing.value_type,
                        requested: value_type,
                    });
                }
                existing.last_registered = now;
                existing.created_by = created_by.to_string();
                existing.description = description.to_string();
                existing.clone()
            }
            Entry::Vacant(entry) => {
                debug!(signal = name, %value_type, by = created_by, "signal created");
                entry
                    .insert(Signal {
                        name: name.to_string(),
                        value_type,
                        created_by: created_by.to_string(),
                        created_at: now,
                        last_registered: now,
                        description: description.to_string(),
                    })
                    .clone()
            }
        };
        self.persist(PersistedRecord::Signal(signal.clone())).await?;
        Ok(signal)
    }

    /// Create or heartbeat a slot. Same rules as [`Self::upsert_signal`];
    /// an existing `connected_to` survives re-registration and is
    /// re-announced so a restarted consumer re-learns its wiring.
    pub async fn upsert_slot(
        &self,
        name: &str,
        value_type: ValueType,
        created_by: &str,
        description: &str,
    ) -> Result<Slot, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let slot = match tables.slots.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.value_type != value_type {
                    return Err(StoreError::TypeConflict {
                        entity: "slot",
                        name: name.to_string(),
                        existing: existing.value_type,
                        requested: value_type,
                    });
                }
                existing.last_registered = now;
                existing.created_by = created_by.to_string();
                existing.description = description.to_string();
                existing.clone()
            }
            Entry::Vacant(entry) => {
                debug!(slot = name, %value_type, by = created_by, "slot created");
                entry
                    .insert(Slot {
                        name: name.to_string(),
                        value_type,
                        created_by: created_by.to_string(),
                        created_at: now,
                        last_registered: now,
                        last_modified: now,
                        modified_by: String::new(),
                        connected_to: None,
                        description: description.to_string(),
                    })
                    .clone()
            }
        };
        if slot.connected_to.is_some() {
            self.announce(ConnectionChange {
                slot_name: slot.name.clone(),
                connected_to: slot.connected_to.clone(),
            });
        }
        self.persist(PersistedRecord::Slot(slot.clone())).await?;
        Ok(slot)
    }

    /// Wire a slot to a signal. Both must exist and agree on type.
    pub async fn connect(
        &self,
        slot_name: &str,
        signal_name: &str,
        requested_by: &str,
    ) -> Result<Slot, StoreError> {
        let mut tables = self.tables.write().await;
        let signal_type = match tables.signals.get(signal_name) {
            Some(signal) => signal.value_type,
            None => {
                return Err(StoreError::NotFound {
                    entity: "signal",
                    name: signal_name.to_string(),
                })
            }
        };
        let slot = tables
            .slots
            .get_mut(slot_name)
            .ok_or_else(|| StoreError::NotFound {
                entity: "slot",
                name: slot_name.to_string(),
            })?;
        if slot.value_type != signal_type {
            return Err(StoreError::TypeMismatch {
                slot: slot_name.to_string(),
                slot_type: slot.value_type,
                signal: signal_name.to_string(),
                signal_type,
            });
        }

        slot.connected_to = Some(signal_name.to_string());
        slot.last_modified = Utc::now();
        slot.modified_by = requested_by.to_string();
        let slot = slot.clone();
        info!(slot = slot_name, signal = signal_name, by = requested_by, "connected");

        self.announce(ConnectionChange {
            slot_name: slot_name.to_string(),
            connected_to: Some(signal_name.to_string()),
        });
        self.persist(PersistedRecord::Slot(slot.clone())).await?;
        Ok(slot)
    }

    /// Clear a slot's wiring. A second disconnect is a no-op, not an
    /// error.
    pub async fn disconnect(&self, slot_name: &str, requested_by: &str) -> Result<Slot, StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .slots
            .get_mut(slot_name)
            .ok_or_else(|| StoreError::NotFound {
                entity: "slot",
                name: slot_name.to_string(),
            })?;
        if slot.connected_to.is_none() {
            return Ok(slot.clone());
        }

        slot.connected_to = None;
        slot.last_modified = Utc::now();
        slot.modified_by = requested_by.to_string();
        let slot = slot.clone();
        info!(slot = slot_name, by = requested_by, "disconnected");

        self.announce(ConnectionChange {
            slot_name: slot_name.to_string(),
            connected_to: None,
        });
        self.persist(PersistedRecord::Slot(slot.clone())).await?;
        Ok(slot)
    }

    /// Point lookup.
    pub async fn get_signal(&self, name: &str) -> Result<Signal, StoreError> {
        self.tables
            .read()
            .await
            .signals
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "signal",
                name: name.to_string(),
            })
    }

    /// Point lookup.
    pub async fn get_slot(&self, name: &str) -> Result<Slot, StoreError> {
        self.tables
            .read()
            .await
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "slot",
                name: name.to_string(),
            })
    }

    /// Snapshot of all signals, sorted by name.
    pub async fn list_signals(&self) -> Vec<Signal> {
        let tables = self.tables.read().await;
        let mut signals: Vec<_> = tables.signals.values().cloned().collect();
        signals.sort_by(|a, b| a.name.cmp(&b.name));
        signals
    }

    /// Snapshot of all slots, sorted by name.
    pub async fn list_slots(&self) -> Vec<Slot> {
        let tables = self.tables.read().await;
        let mut slots: Vec<_> = tables.slots.values().cloned().collect();
        slots.sort_by(|a, b| a.name.cmp(&b.name));
        slots
    }

    /// Current wiring, grouped by signal and sorted.
    pub async fn list_connections(&self) -> Vec<Connection> {
        let tables = self.tables.read().await;
        let mut by_signal: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for slot in tables.slots.values() {
            if let Some(signal) = &slot.connected_to {
                by_signal.entry(signal.clone()).or_default().push(slot.name.clone());
            }
        }
        by_signal
            .into_iter()
            .map(|(signal, mut slots)| {
                slots.sort();
                Connection { signal, slots }
            })
            .collect()
    }

    /// Subscribe to wiring changes.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConnectionChange> {
        self.changes.subscribe()
    }

    fn announce(&self, change: ConnectionChange) {
        // Err just means nobody is watching right now.
        let _ = self.changes.send(change);
    }

    async fn persist(&self, record: PersistedRecord) -> Result<(), StoreError> {
        if let Err(e) = self.records.save(&record).await {
            warn!(key = %record.key(), error = %e, "registry write-through failed, in-memory state stands");
            return Err(e.into());
        }
        Ok(())
    }
}
