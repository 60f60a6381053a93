//! Server network layer: TCP accept loop and per-connection tasks
//!
//! The network layer knows nothing about logins or broadcast rules. It
//! registers accepted connections, forwards every inbound line to the engine
//! as a [`ServerEvent`] and writes whatever the engine queues on a
//! connection's outbound channel.

use crate::error::ServerError;
use crate::registry::{ConnectionId, Outbound, SessionRegistry};
use chat_shared::wire;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Messages sent from network tasks to the protocol engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ListenStarted {
        addr: SocketAddr,
    },
    ListenStopped,
    ClientConnected {
        id: ConnectionId,
        peer: SocketAddr,
    },
    /// Emitted only by the task that removed the connection from the registry
    ClientDisconnected {
        id: ConnectionId,
        login_id: Option<String>,
    },
    Message {
        id: ConnectionId,
        text: String,
    },
}

/// Accepts client connections while listening
///
/// Stopping the listener aborts the accept task, which drops the listening
/// socket. Connections that were already accepted keep running.
pub struct Listener {
    host: String,
    port: u16,
    registry: Arc<RwLock<SessionRegistry>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    pub fn new(
        host: &str,
        port: u16,
        registry: Arc<RwLock<SessionRegistry>>,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            registry,
            events,
            accept_task: None,
            local_addr: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Changes the port used by the next `start`
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn is_listening(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Address actually bound, while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds the configured address and spawns the accept loop
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_listening()) {
            return Ok(addr);
        }

        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        info!("Server listening on {}", local_addr);

        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        self.accept_task = Some(tokio::spawn(accept_loop(listener, registry, events)));
        self.local_addr = Some(local_addr);

        self.emit(ServerEvent::ListenStarted { addr: local_addr });
        Ok(local_addr)
    }

    /// Stops accepting new connections; returns false if not listening
    pub fn stop(&mut self) -> bool {
        let Some(task) = self.accept_task.take() else {
            return false;
        };

        task.abort();
        self.local_addr = None;
        info!("Server stopped listening");
        self.emit(ServerEvent::ListenStopped);
        true
    }

    fn emit(&self, event: ServerEvent) {
        if let Err(e) = self.events.send(event) {
            error!("Failed to queue server event: {}", e);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<RwLock<SessionRegistry>>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let registry = Arc::clone(&registry);
                let events = events.clone();
                tokio::spawn(async move {
                    run_connection(stream, peer, registry, events).await;
                });
            }
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
}

/// Drives one client connection until either side closes it
///
/// The connection is registered before `ClientConnected` is emitted. On exit
/// the write half is shut down and the connection is removed; whoever
/// removes it from the registry reports the disconnect.
pub async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RwLock<SessionRegistry>>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let id = registry.write().await.add(peer, outbound_tx);

    if events.send(ServerEvent::ClientConnected { id, peer }).is_err() {
        registry.write().await.remove(id);
        return;
    }

    let (reader, mut writer) = stream.into_split();
    let mut lines = wire::lines(reader);

    loop {
        tokio::select! {
            inbound = lines.next_line() => match inbound {
                Ok(Some(text)) => {
                    if events.send(ServerEvent::Message { id, text }).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Connection {} closed by peer", id);
                    break;
                }
                Err(e) => {
                    debug!("Error reading from connection {}: {}", id, e);
                    break;
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Line(line)) => {
                    if let Err(e) = wire::write_line(&mut writer, &line).await {
                        debug!("Error writing to connection {}: {}", id, e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing connection {}", id);
                    break;
                }
            },
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error shutting down connection {}: {}", id, e);
    }

    let removed = registry.write().await.remove(id);
    if let Some(connection) = removed {
        let login_id = connection.login_id().map(str::to_string);
        // The engine loop may already be gone during shutdown
        let _ = events.send(ServerEvent::ClientDisconnected { id, login_id });
    }
}
