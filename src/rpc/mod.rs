//! Control-plane server.
//!
//! Listens on a Unix domain socket or TCP, reads request envelopes off
//! each connection, applies them to the registry and writes the response
//! back. A `WatchConnections` request upgrades its connection: after the
//! ack it carries nothing but connection-change events until either side
//! hangs up.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::wire::{
    read_frame, write_frame, ErrorKind, Event, Reply, Request, RequestEnvelope, ResponseEnvelope,
    Stream, WireError,
};
use crate::config::ServerConfig;
use crate::registry::RegistryStore;
use crate::transport::prepare_uds_socket;

/// Errors that keep the server from coming up.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration: {0}")]
    Config(String),
}

/// Serves the registry over the control-plane protocol.
pub struct RegistryServer {
    store: Arc<RegistryStore>,
}

impl RegistryServer {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// Bind the transport named by `config` and serve until cancelled.
    pub async fn serve(&self, config: &ServerConfig) -> Result<(), ServeError> {
        match config.transport.as_str() {
            "uds" => self.serve_uds(&config.socket_path()).await,
            "tcp" => self.serve_tcp(&config.host, config.port).await,
            other => Err(ServeError::Config(format!(
                "unknown control-plane transport {other:?}, expected \"uds\" or \"tcp\""
            ))),
        }
    }

    /// Serve on a Unix domain socket. The socket file is removed again
    /// when the future is dropped.
    pub async fn serve_uds(&self, path: &Path) -> Result<(), ServeError> {
        let _cleanup = prepare_uds_socket(path)?;
        let listener = UnixListener::bind(path)?;
        info!(socket = %path.display(), "control plane listening");
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let store = self.store.clone();
                    tokio::spawn(handle_connection(stream, store));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Serve on TCP, for registries shared across hosts.
    pub async fn serve_tcp(&self, host: &str, port: u16) -> Result<(), ServeError> {
        let listener = TcpListener::bind((host, port)).await?;
        info!(address = %listener.local_addr()?, "control plane listening");
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "control connection accepted");
                    let store = self.store.clone();
                    tokio::spawn(handle_connection(stream, store));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection<S: Stream>(mut stream: S, store: Arc<RegistryStore>) {
    loop {
        let envelope: RequestEnvelope = match read_frame(&mut stream).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!("control connection closed");
                return;
            }
            Err(e) => {
                debug!(error = %e, "dropping control connection");
                return;
            }
        };

        if matches!(envelope.request, Request::WatchConnections) {
            watch_connections(stream, store, envelope.id, &envelope.from).await;
            return;
        }

        let response = match dispatch(&store, &envelope.from, envelope.request).await {
            Ok(reply) => ResponseEnvelope::ok(envelope.id, reply),
            Err(error) => ResponseEnvelope::err(envelope.id, error),
        };
        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!(error = %e, "dropping control connection");
            return;
        }
    }
}

/// Turn a connection into an event stream.
///
/// The subscription is taken before the ack goes out, so a watcher holds
/// every change made after it saw the ack. Watchers speak no further
/// requests; any inbound bytes, including EOF, end the watch.
async fn watch_connections<S: Stream>(stream: S, store: Arc<RegistryStore>, id: Uuid, from: &str) {
    let mut changes = store.subscribe_changes();
    let (mut reader, mut writer) = tokio::io::split(stream);
    if let Err(e) = write_frame(&mut writer, &ResponseEnvelope::ok(id, Reply::Watching)).await {
        debug!(watcher = from, error = %e, "watcher went away before the ack");
        return;
    }
    debug!(watcher = from, "connection watch started");

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    let event = Event::ConnectionChange {
                        slot_name: change.slot_name,
                        connected_to: change.connected_to,
                    };
                    if let Err(e) = write_frame(&mut writer, &event).await {
                        debug!(watcher = from, error = %e, "watcher went away");
                        return;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(watcher = from, missed, "watcher lagged, events were dropped");
                }
                Err(RecvError::Closed) => return,
            },
            _ = read_frame::<_, RequestEnvelope>(&mut reader) => {
                debug!(watcher = from, "watcher hung up");
                return;
            }
        }
    }
}

/// Apply one request to the registry and shape the reply.
async fn dispatch(store: &RegistryStore, from: &str, request: Request) -> Result<Reply, WireError> {
    match request {
        Request::RegisterSignal {
            name,
            value_type,
            description,
        } => store
            .upsert_signal(&name, value_type, from, &description)
            .await
            .map(Reply::Signal)
            .map_err(|e| e.to_wire()),
        Request::RegisterSlot {
            name,
            value_type,
            description,
        } => store
            .upsert_slot(&name, value_type, from, &description)
            .await
            .map(Reply::Slot)
            .map_err(|e| e.to_wire()),
        Request::Connect {
            slot_name,
            signal_name,
        } => store
            .connect(&slot_name, &signal_name, from)
            .await
            .map(Reply::Slot)
            .map_err(|e| e.to_wire()),
        Request::Disconnect { slot_name } => store
            .disconnect(&slot_name, from)
            .await
            .map(Reply::Slot)
            .map_err(|e| e.to_wire()),
        Request::ListSignals => Ok(Reply::Signals(store.list_signals().await)),
        Request::ListSlots => Ok(Reply::Slots(store.list_slots().await)),
        Request::ListConnections => Ok(Reply::Connections(store.list_connections().await)),
        // Intercepted in handle_connection; a watch cannot share a
        // request/response connection.
        Request::WatchConnections => Err(WireError {
            kind: ErrorKind::Internal,
            message: "watch_connections requires a dedicated connection".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::wire::Outcome;
    use crate::client::ValueType;
    use crate::storage::MemoryStore;
    use tokio::time::timeout;

    async fn open_store() -> Arc<RegistryStore> {
        Arc::new(
            RegistryStore::open(Arc::new(MemoryStore::default()))
                .await
                .unwrap(),
        )
    }

    fn envelope(from: &str, request: Request) -> RequestEnvelope {
        RequestEnvelope {
            id: Uuid::new_v4(),
            from: from.to_string(),
            request,
        }
    }

    #[tokio::test]
    async fn test_dispatch_records_caller_identity() {
        let store = open_store().await;
        let reply = dispatch(
            &store,
            "boiler.def",
            Request::RegisterSignal {
                name: "temperature".to_string(),
                value_type: ValueType::Double,
                description: "feed temp".to_string(),
            },
        )
        .await
        .unwrap();

        match reply {
            Reply::Signal(signal) => {
                assert_eq!(signal.name, "temperature");
                assert_eq!(signal.created_by, "boiler.def");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_maps_store_errors_to_wire_kinds() {
        let store = open_store().await;
        let err = dispatch(
            &store,
            "op.def",
            Request::Connect {
                slot_name: "display".to_string(),
                signal_name: "absent".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_request_response_over_a_stream() {
        let store = open_store().await;
        let (server_io, mut client_io) = tokio::io::duplex(4096);
        tokio::spawn(handle_connection(server_io, store));

        let register = envelope(
            "boiler.def",
            Request::RegisterSignal {
                name: "temperature".to_string(),
                value_type: ValueType::Double,
                description: String::new(),
            },
        );
        write_frame(&mut client_io, &register).await.unwrap();
        let response: ResponseEnvelope = read_frame(&mut client_io).await.unwrap().unwrap();
        assert_eq!(response.id, register.id);
        assert!(matches!(response.outcome, Outcome::Ok(Reply::Signal(_))));

        // Errors come back on the same connection, which stays usable
        let bad = envelope(
            "op.def",
            Request::Disconnect {
                slot_name: "absent".to_string(),
            },
        );
        write_frame(&mut client_io, &bad).await.unwrap();
        let response: ResponseEnvelope = read_frame(&mut client_io).await.unwrap().unwrap();
        match response.outcome {
            Outcome::Err(error) => assert_eq!(error.kind, ErrorKind::NotFound),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let list = envelope("op.def", Request::ListSignals);
        write_frame(&mut client_io, &list).await.unwrap();
        let response: ResponseEnvelope = read_frame(&mut client_io).await.unwrap().unwrap();
        match response.outcome {
            Outcome::Ok(Reply::Signals(signals)) => assert_eq!(signals.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_upgrade_streams_changes() {
        let store = open_store().await;
        let (server_io, mut client_io) = tokio::io::duplex(4096);
        tokio::spawn(handle_connection(server_io, store.clone()));

        let watch = envelope("panel.def", Request::WatchConnections);
        write_frame(&mut client_io, &watch).await.unwrap();
        let ack: ResponseEnvelope = read_frame(&mut client_io).await.unwrap().unwrap();
        assert!(matches!(ack.outcome, Outcome::Ok(Reply::Watching)));

        store
            .upsert_signal("temperature", ValueType::Double, "boiler.def", "")
            .await
            .unwrap();
        store
            .upsert_slot("display", ValueType::Double, "panel.def", "")
            .await
            .unwrap();
        store
            .connect("display", "temperature", "op.def")
            .await
            .unwrap();

        let event: Event = read_frame(&mut client_io).await.unwrap().unwrap();
        assert_eq!(
            event,
            Event::ConnectionChange {
                slot_name: "display".to_string(),
                connected_to: Some("temperature".to_string()),
            }
        );

        store.disconnect("display", "op.def").await.unwrap();
        let event: Event = read_frame(&mut client_io).await.unwrap().unwrap();
        assert_eq!(
            event,
            Event::ConnectionChange {
                slot_name: "display".to_string(),
                connected_to: None,
            }
        );
    }

    #[tokio::test]
    async fn test_watcher_hangup_ends_the_handler() {
        let store = open_store().await;
        let (server_io, mut client_io) = tokio::io::duplex(4096);
        let handler = tokio::spawn(handle_connection(server_io, store));

        write_frame(&mut client_io, &envelope("panel.def", Request::WatchConnections))
            .await
            .unwrap();
        let _ack: ResponseEnvelope = read_frame(&mut client_io).await.unwrap().unwrap();
        drop(client_io);

        timeout(Duration::from_secs(5), handler)
            .await
            .expect("handler kept running after the watcher hung up")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_transport_is_rejected() {
        let store = open_store().await;
        let server = RegistryServer::new(store);
        let config = ServerConfig {
            transport: "carrier-pigeon".to_string(),
            ..ServerConfig::default()
        };
        let err = server.serve(&config).await.unwrap_err();
        assert!(matches!(err, ServeError::Config(_)));
    }
}
