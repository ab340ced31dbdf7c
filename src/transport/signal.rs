//! Producer side of the data plane.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::endpoint::SignalAddress;
use super::frame::{encode_value, TransportError};
use super::{prepare_uds_socket, UdsCleanupGuard};
use crate::client::{RegistryClient, Value, ValueType};

/// Subscribers of one signal plus the value a late joiner is caught up
/// with. Replay and fanout happen under the same lock, so a subscriber
/// accepted mid-publish sees each occurrence exactly once.
struct Fanout {
    last: Option<Bytes>,
    sinks: Vec<OwnedWriteHalf>,
}

/// Serves one signal's values to every connected slot.
///
/// Binds the socket derived from the producer identity and signal name,
/// replays the most recent value to each new subscriber, and writes each
/// published value to all of them. A subscriber whose socket has died is
/// dropped on the next publish.
pub struct SignalPublisher {
    name: String,
    value_type: ValueType,
    address: SignalAddress,
    fanout: Arc<Mutex<Fanout>>,
    accept_task: JoinHandle<()>,
    _cleanup: UdsCleanupGuard,
}

impl SignalPublisher {
    /// Bind the signal's socket and start accepting subscribers.
    pub fn bind(address: SignalAddress, value_type: ValueType) -> Result<Self, TransportError> {
        let socket_path = address.socket_path();
        let cleanup = prepare_uds_socket(&socket_path)?;
        let listener = UnixListener::bind(&socket_path)?;
        info!(signal = %address.signal, path = %socket_path.display(), "signal channel listening");

        let fanout = Arc::new(Mutex::new(Fanout {
            last: None,
            sinks: Vec::new(),
        }));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            address.signal.clone(),
            fanout.clone(),
        ));

        Ok(Self {
            name: address.signal.clone(),
            value_type,
            address,
            fanout,
            accept_task,
            _cleanup: cleanup,
        })
    }

    /// Register the signal with the registry, then bind its channel under
    /// the client's identity.
    pub async fn register(
        client: &RegistryClient,
        base_path: impl Into<PathBuf>,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Self, TransportError> {
        client.register_signal(name, value_type, description).await?;
        let address = SignalAddress::new(base_path, client.identity().clone(), name);
        Self::bind(address, value_type)
    }

    /// Publish one occurrence to every connected slot, stamped with the
    /// current time.
    pub async fn publish(&self, value: &Value) -> Result<(), TransportError> {
        if value.value_type() != self.value_type {
            return Err(TransportError::TypeMismatch {
                expected: self.value_type,
                actual: value.value_type(),
            });
        }
        let mut buf = BytesMut::new();
        encode_value(&mut buf, value, Utc::now())?;
        let frame = buf.freeze();

        let mut fanout = self.fanout.lock().await;
        fanout.last = Some(frame.clone());
        let mut alive = Vec::with_capacity(fanout.sinks.len());
        for mut sink in fanout.sinks.drain(..) {
            match sink.write_all(&frame).await {
                Ok(()) => alive.push(sink),
                Err(e) => debug!(signal = %self.name, error = %e, "dropping dead subscriber"),
            }
        }
        fanout.sinks = alive;
        Ok(())
    }

    /// Number of currently connected slots.
    pub async fn subscriber_count(&self) -> usize {
        self.fanout.lock().await.sinks.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &SignalAddress {
        &self.address
    }
}

impl Drop for SignalPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: UnixListener, signal: String, fanout: Arc<Mutex<Fanout>>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let (_, mut sink) = stream.into_split();
                let mut fanout = fanout.lock().await;
                if let Some(last) = fanout.last.clone() {
                    if let Err(e) = sink.write_all(&last).await {
                        debug!(signal = %signal, error = %e, "subscriber died during replay");
                        continue;
                    }
                }
                debug!(signal = %signal, subscribers = fanout.sinks.len() + 1, "slot subscribed");
                fanout.sinks.push(sink);
            }
            Err(e) => {
                warn!(signal = %signal, error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
