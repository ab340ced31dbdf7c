//! Consumer side of the data plane.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::endpoint::SignalAddress;
use super::frame::{read_value, TransportError};
use crate::client::{ClientError, Identity, RegistryClient, Value, ValueType};
use crate::filter::{Pipeline, Verdict};

/// Dials the signal its slot is wired to and feeds decoded values through
/// the filter pipeline into a channel.
///
/// The target address comes from [`Self::set_target`] or, with
/// [`Self::follow`], from the registry's connection-change stream. While a
/// target is set the receiver keeps a connection up on its own: a producer
/// that is not listening yet, or goes away, is redialed with backoff. A
/// frame whose type disagrees with the slot's registered type tears the
/// channel down.
pub struct SlotReceiver {
    name: String,
    value_type: ValueType,
    target: Arc<watch::Sender<Option<SignalAddress>>>,
    receive_task: JoinHandle<()>,
    follow_task: Option<JoinHandle<()>>,
}

impl SlotReceiver {
    /// Start a receiver with no target. Values come out of the returned
    /// channel once a target is set and its producer is up.
    pub fn start(
        name: &str,
        value_type: ValueType,
        pipeline: Pipeline,
    ) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (target, target_rx) = watch::channel(None);
        let (values, values_rx) = mpsc::unbounded_channel();
        let receive_task = tokio::spawn(receive_loop(
            name.to_string(),
            value_type,
            pipeline,
            target_rx,
            values,
        ));
        (
            Self {
                name: name.to_string(),
                value_type,
                target: Arc::new(target),
                receive_task,
                follow_task: None,
            },
            values_rx,
        )
    }

    /// Register the slot and keep its data channel wired according to the
    /// registry: the current `connected_to` is applied immediately and
    /// every later connection change retargets the receiver.
    pub async fn follow(
        client: Arc<RegistryClient>,
        base_path: impl Into<PathBuf>,
        name: &str,
        value_type: ValueType,
        description: &str,
        pipeline: Pipeline,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Value>), TransportError> {
        let base_path = base_path.into();
        // Subscribe before reading the snapshot so no change slips between
        // the two.
        let mut changes = client.watch_connections().await?;
        let slot = client.register_slot(name, value_type, description).await?;

        let (mut receiver, values) = Self::start(name, value_type, pipeline);
        if let Some(signal) = &slot.connected_to {
            if let Some(address) = resolve_address(&client, &base_path, signal).await? {
                receiver.set_target(Some(address));
            }
        }

        let slot_name = name.to_string();
        let target = receiver.target.clone();
        receiver.follow_task = Some(tokio::spawn(async move {
            while let Some(connected_to) = changes.recv_for(&slot_name).await {
                let new_target = match &connected_to {
                    Some(signal) => match resolve_address(&client, &base_path, signal).await {
                        Ok(Some(address)) => Some(address),
                        Ok(None) => {
                            warn!(slot = %slot_name, signal = %signal, "wired to an unregistered signal");
                            None
                        }
                        Err(e) => {
                            warn!(slot = %slot_name, error = %e, "failed to resolve new wiring");
                            continue;
                        }
                    },
                    None => None,
                };
                debug!(slot = %slot_name, signal = ?connected_to, "rewired");
                retarget(&target, new_target);
            }
            debug!(slot = %slot_name, "connection watch ended");
        }));
        Ok((receiver, values))
    }

    /// Point the receiver at a signal's channel, or at nothing. Setting
    /// the same target again is a no-op; a changed target tears down the
    /// current connection.
    pub fn set_target(&self, address: Option<SignalAddress>) {
        retarget(&self.target, address);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

impl Drop for SlotReceiver {
    fn drop(&mut self) {
        self.receive_task.abort();
        if let Some(task) = &self.follow_task {
            task.abort();
        }
    }
}

fn retarget(target: &watch::Sender<Option<SignalAddress>>, address: Option<SignalAddress>) {
    target.send_if_modified(|current| {
        if *current == address {
            false
        } else {
            *current = address;
            true
        }
    });
}

/// Find the channel address for a signal from its registry record.
async fn resolve_address(
    client: &RegistryClient,
    base_path: &Path,
    signal_name: &str,
) -> Result<Option<SignalAddress>, ClientError> {
    let signals = client.list_signals().await?;
    let Some(signal) = signals.into_iter().find(|s| s.name == signal_name) else {
        return Ok(None);
    };
    match Identity::parse(&signal.created_by) {
        Some(producer) => Ok(Some(SignalAddress::new(base_path, producer, signal_name))),
        None => {
            warn!(
                signal = signal_name,
                created_by = %signal.created_by,
                "cannot derive a producer identity"
            );
            Ok(None)
        }
    }
}

async fn receive_loop(
    slot: String,
    value_type: ValueType,
    mut pipeline: Pipeline,
    mut target: watch::Receiver<Option<SignalAddress>>,
    values: mpsc::UnboundedSender<Value>,
) {
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(1);

    'target: loop {
        let address = loop {
            let current = target.borrow_and_update().clone();
            if let Some(address) = current {
                break address;
            }
            if target.changed().await.is_err() {
                return;
            }
        };

        let mut delay = INITIAL_DELAY;
        let mut stream = loop {
            tokio::select! {
                connected = UnixStream::connect(address.socket_path()) => match connected {
                    Ok(stream) => break stream,
                    Err(e) => {
                        debug!(slot = %slot, address = %address, error = %e, "producer not available, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {
                                delay = (delay * 2).min(MAX_DELAY);
                            }
                            changed = target.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                                continue 'target;
                            }
                        }
                    }
                },
                changed = target.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue 'target;
                }
            }
        };
        info!(slot = %slot, address = %address, "data channel up");

        loop {
            tokio::select! {
                frame = read_value(&mut stream, value_type) => match frame {
                    Ok(Some((mut value, _timestamp))) => {
                        if pipeline.apply(&mut value) == Verdict::Pass
                            && values.send(value).is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => {
                        info!(slot = %slot, "producer closed the data channel");
                        continue 'target;
                    }
                    Err(e) => {
                        error!(slot = %slot, error = %e, "tearing down data channel");
                        continue 'target;
                    }
                },
                changed = target.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue 'target;
                }
            }
        }
    }
}
