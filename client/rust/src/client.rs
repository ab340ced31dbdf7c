//! Default registry client speaking framed JSON over UDS or TCP.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::model::{Identity, Signal, Slot, ValueType};
use crate::traits::Registry;
use crate::wire::{
    self, Connection, Event, Outcome, Reply, Request, RequestEnvelope, ResponseEnvelope, Stream,
};

/// Backoff for connecting to the registry at startup: 100ms to 5s with
/// jitter, 30 attempts.
fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Asynchronous control-plane client.
///
/// Requests are serialized over one connection; each call resolves when
/// the registry replies. Dropping an unresolved call's future cancels its
/// completion but not the server-side mutation.
pub struct RegistryClient {
    io: Mutex<Box<dyn Stream>>,
    endpoint: String,
    identity: Identity,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Connect to the registry at the given endpoint.
    ///
    /// Supports both TCP (host:port) and Unix domain sockets (file paths).
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let io = wire::connect(endpoint)
            .await
            .map_err(|e| ClientError::Connection(format!("{endpoint}: {e}")))?;
        Ok(Self {
            io: Mutex::new(io),
            endpoint: endpoint.to_string(),
            identity: Identity::current(),
        })
    }

    /// Connect, retrying with exponential backoff while the registry
    /// comes up.
    pub async fn connect_with_retry(endpoint: &str) -> Result<Self> {
        (|| async { Self::connect(endpoint).await })
            .retry(connection_backoff())
            .notify(|err: &ClientError, dur: Duration| {
                warn!(endpoint = %endpoint, error = %err, delay = ?dur, "Registry unreachable, retrying");
            })
            .await
    }

    /// Connect using an endpoint from an environment variable with fallback.
    pub async fn from_env(env_var: &str, default: &str) -> Result<Self> {
        let endpoint = std::env::var(env_var).unwrap_or_else(|_| default.to_string());
        Self::connect(&endpoint).await
    }

    /// Override the identity recorded on mutations issued by this client.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// The endpoint this client is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The identity this client registers under.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn call(&self, request: Request) -> Result<Reply> {
        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            from: self.identity.to_string(),
            request,
        };
        let mut io = self.io.lock().await;
        wire::write_frame(&mut *io, &envelope).await?;
        let response: ResponseEnvelope = wire::read_frame(&mut *io)
            .await?
            .ok_or_else(|| ClientError::Connection("registry closed the connection".to_string()))?;
        if response.id != envelope.id {
            return Err(ClientError::Protocol(format!(
                "correlation id mismatch: sent {}, received {}",
                envelope.id, response.id
            )));
        }
        match response.outcome {
            Outcome::Ok(reply) => Ok(reply),
            Outcome::Err(error) => Err(ClientError::Registry(error)),
        }
    }

    /// Register (create-or-heartbeat) a signal.
    pub async fn register_signal(
        &self,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Signal> {
        match self
            .call(Request::RegisterSignal {
                name: name.to_string(),
                value_type,
                description: description.to_string(),
            })
            .await?
        {
            Reply::Signal(signal) => Ok(signal),
            other => Err(unexpected_reply("register_signal", &other)),
        }
    }

    /// Register (create-or-heartbeat) a slot.
    pub async fn register_slot(
        &self,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Slot> {
        match self
            .call(Request::RegisterSlot {
                name: name.to_string(),
                value_type,
                description: description.to_string(),
            })
            .await?
        {
            Reply::Slot(slot) => Ok(slot),
            other => Err(unexpected_reply("register_slot", &other)),
        }
    }

    /// Wire a slot to a signal of the same type.
    pub async fn connect_slot(&self, slot_name: &str, signal_name: &str) -> Result<Slot> {
        match self
            .call(Request::Connect {
                slot_name: slot_name.to_string(),
                signal_name: signal_name.to_string(),
            })
            .await?
        {
            Reply::Slot(slot) => Ok(slot),
            other => Err(unexpected_reply("connect", &other)),
        }
    }

    /// Clear a slot's wiring. Idempotent.
    pub async fn disconnect_slot(&self, slot_name: &str) -> Result<Slot> {
        match self
            .call(Request::Disconnect {
                slot_name: slot_name.to_string(),
            })
            .await?
        {
            Reply::Slot(slot) => Ok(slot),
            other => Err(unexpected_reply("disconnect", &other)),
        }
    }

    /// Snapshot of all registered signals.
    pub async fn list_signals(&self) -> Result<Vec<Signal>> {
        match self.call(Request::ListSignals).await? {
            Reply::Signals(signals) => Ok(signals),
            other => Err(unexpected_reply("list_signals", &other)),
        }
    }

    /// Snapshot of all registered slots.
    pub async fn list_slots(&self) -> Result<Vec<Slot>> {
        match self.call(Request::ListSlots).await? {
            Reply::Slots(slots) => Ok(slots),
            other => Err(unexpected_reply("list_slots", &other)),
        }
    }

    /// Current wiring as signal name to connected slot names.
    pub async fn list_connections(&self) -> Result<Vec<Connection>> {
        match self.call(Request::ListConnections).await? {
            Reply::Connections(connections) => Ok(connections),
            other => Err(unexpected_reply("list_connections", &other)),
        }
    }

    /// Subscribe to connection-change events.
    ///
    /// Opens a dedicated connection so events never interleave with
    /// request/response traffic on this client.
    pub async fn watch_connections(&self) -> Result<ConnectionChanges> {
        let mut io = wire::connect(&self.endpoint)
            .await
            .map_err(|e| ClientError::Connection(format!("{}: {e}", self.endpoint)))?;
        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            from: self.identity.to_string(),
            request: Request::WatchConnections,
        };
        wire::write_frame(&mut io, &envelope).await?;
        let ack: ResponseEnvelope = wire::read_frame(&mut io)
            .await?
            .ok_or_else(|| ClientError::Connection("registry closed the connection".to_string()))?;
        match ack.outcome {
            Outcome::Ok(Reply::Watching) => {}
            Outcome::Ok(other) => return Err(unexpected_reply("watch_connections", &other)),
            Outcome::Err(error) => return Err(ClientError::Registry(error)),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match wire::read_frame::<_, Event>(&mut io).await {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("watch stream closed by registry");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "watch stream failed");
                        break;
                    }
                }
            }
        });
        Ok(ConnectionChanges { rx })
    }
}

fn unexpected_reply(operation: &str, reply: &Reply) -> ClientError {
    ClientError::Protocol(format!("unexpected reply to {operation}: {reply:?}"))
}

/// Stream of connection-change events from
/// [`RegistryClient::watch_connections`].
///
/// Dropping it closes the watch connection.
pub struct ConnectionChanges {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl ConnectionChanges {
    /// Next event; `None` once the watch connection closes.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next change affecting the given slot.
    pub async fn recv_for(&mut self, slot_name: &str) -> Option<Option<String>> {
        while let Some(event) = self.recv().await {
            let Event::ConnectionChange {
                slot_name: changed,
                connected_to,
            } = event;
            if changed == slot_name {
                return Some(connected_to);
            }
        }
        None
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn register_signal(
        &self,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Signal> {
        RegistryClient::register_signal(self, name, value_type, description).await
    }

    async fn register_slot(
        &self,
        name: &str,
        value_type: ValueType,
        description: &str,
    ) -> Result<Slot> {
        RegistryClient::register_slot(self, name, value_type, description).await
    }

    async fn connect(&self, slot_name: &str, signal_name: &str) -> Result<Slot> {
        self.connect_slot(slot_name, signal_name).await
    }

    async fn disconnect(&self, slot_name: &str) -> Result<Slot> {
        self.disconnect_slot(slot_name).await
    }

    async fn list_signals(&self) -> Result<Vec<Signal>> {
        RegistryClient::list_signals(self).await
    }

    async fn list_slots(&self) -> Result<Vec<Slot>> {
        RegistryClient::list_slots(self).await
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        RegistryClient::list_connections(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ErrorKind, WireError};
    use chrono::Utc;
    use tokio::net::UnixListener;

    fn sample_slot(name: &str) -> Slot {
        Slot {
            name: name.to_string(),
            value_type: ValueType::Double,
            created_by: "test.def".to_string(),
            created_at: Utc::now(),
            last_registered: Utc::now(),
            last_modified: Utc::now(),
            modified_by: String::new(),
            connected_to: None,
            description: String::new(),
        }
    }

    /// One-shot fake registry: answers every request on a single accepted
    /// connection with the canned outcome.
    async fn fake_registry(listener: UnixListener, outcome: impl Fn(Request) -> Outcome + Send + 'static) {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Some(envelope) = wire::read_frame::<_, RequestEnvelope>(&mut stream)
            .await
            .unwrap()
        {
            let response = ResponseEnvelope {
                id: envelope.id,
                outcome: outcome(envelope.request),
            };
            wire::write_frame(&mut stream, &response).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_client_round_trip_over_uds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_registry(listener, |request| match request {
            Request::Disconnect { slot_name } => Outcome::Ok(Reply::Slot(sample_slot(&slot_name))),
            _ => Outcome::Err(WireError {
                kind: ErrorKind::Internal,
                message: "unexpected".to_string(),
            }),
        }));

        let client = RegistryClient::connect(path.to_str().unwrap()).await.unwrap();
        let slot = client.disconnect_slot("display").await.unwrap();
        assert_eq!(slot.name, "display");
    }

    #[tokio::test]
    async fn test_client_surfaces_registry_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_registry(listener, |_| {
            Outcome::Err(WireError {
                kind: ErrorKind::NotFound,
                message: "slot display not found".to_string(),
            })
        }));

        let client = RegistryClient::connect(path.to_str().unwrap()).await.unwrap();
        let err = client.disconnect_slot("display").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_client_rejects_mismatched_reply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_registry(listener, |_| Outcome::Ok(Reply::Watching)));

        let client = RegistryClient::connect(path.to_str().unwrap()).await.unwrap();
        let err = client.list_signals().await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let err = RegistryClient::connect(path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_from_env_endpoint_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_registry(listener, |_| {
            Outcome::Ok(Reply::Signals(Vec::new()))
        }));

        // Variable name is unique to this test; env vars are process-global.
        let var = "PATCHBAY_TEST_FROM_ENV_ENDPOINT";

        // Unset variable falls back to the default endpoint.
        let absent = dir.path().join("absent.sock");
        let err = RegistryClient::from_env(var, absent.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_connection_error());

        std::env::set_var(var, path.to_str().unwrap());
        let client = RegistryClient::from_env(var, absent.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(client.endpoint(), path.to_str().unwrap());
        assert!(client.list_signals().await.unwrap().is_empty());
    }
}
