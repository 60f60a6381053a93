//! Session registry: the set of live client connections
//!
//! This module tracks every accepted connection together with its login
//! state:
//! - Connection lifecycle (register on accept, remove on disconnect/close)
//! - The one-time login handshake state per connection
//! - Snapshots of the live set for broadcast fan-out
//!
//! The registry itself is plain data. The server shares it behind an
//! `Arc<RwLock<_>>` between the accept path, the per-connection tasks and
//! the protocol engine.

use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifier the registry assigns to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work queued for the task that owns a connection's socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write one line to the peer
    Line(String),
    /// Shut the connection down once everything queued before it is written
    Close,
}

/// A line could not be queued because the connection task has gone away
#[derive(Debug, Error)]
#[error("connection {0} is closed")]
pub struct SendError(pub ConnectionId);

/// Handle to one accepted client connection
///
/// Holds the sending side of the connection's outbound queue and the login
/// identifier announced on it. Cloning the handle does not clone the
/// connection; all clones feed the same socket.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Registry-assigned identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub peer: SocketAddr,
    login_id: Option<String>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            peer,
            login_id: None,
            outbound,
        }
    }

    pub fn login_id(&self) -> Option<&str> {
        self.login_id.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.login_id.is_some()
    }

    /// Queues `line` for delivery to the peer
    pub fn send(&self, line: impl Into<String>) -> Result<(), SendError> {
        self.outbound
            .send(Outbound::Line(line.into()))
            .map_err(|_| SendError(self.id))
    }

    /// Asks the connection task to close the socket
    ///
    /// Lines queued before the close are still written.
    pub fn close(&self) {
        if self.outbound.send(Outbound::Close).is_err() {
            debug!("Connection {} already closed", self.id);
        }
    }
}

/// Result of recording a login announcement on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The identifier was stored; the connection is now authenticated
    LoggedIn,
    /// The connection had already logged in; nothing was changed
    AlreadyLoggedIn { existing: String },
    /// No live connection has this id
    UnknownConnection,
}

/// All live connections indexed by their id
///
/// Ids start at 1 and are never reused during the lifetime of a registry.
#[derive(Debug)]
pub struct SessionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a newly accepted connection and returns its id
    pub fn add(&mut self, peer: SocketAddr, outbound: mpsc::UnboundedSender<Outbound>) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        info!("Connection {} registered from {}", id, peer);
        self.connections.insert(id, Connection::new(id, peer, outbound));
        id
    }

    /// Removes a connection, returning it if it was still registered
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            info!("Connection {} removed", id);
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Stores `login_id` on the connection unless it already has one
    ///
    /// Identifiers are not checked for uniqueness across connections.
    pub fn record_login(&mut self, id: ConnectionId, login_id: &str) -> LoginOutcome {
        let Some(connection) = self.connections.get_mut(&id) else {
            return LoginOutcome::UnknownConnection;
        };

        match &connection.login_id {
            Some(existing) => LoginOutcome::AlreadyLoggedIn {
                existing: existing.clone(),
            },
            None => {
                connection.login_id = Some(login_id.to_string());
                info!("Connection {} logged in as {:?}", id, login_id);
                LoginOutcome::LoggedIn
            }
        }
    }

    /// Returns a copy of the live set for iteration outside the lock
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections.values().cloned().collect()
    }

    /// Removes and returns every connection
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, connection)| connection).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
