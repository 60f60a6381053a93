//! # Chat Server Library
//!
//! This library provides the server side of the chat service. It accepts
//! TCP connections, enforces the one-time login handshake on each of them
//! and relays chat lines to every connected client with sender attribution.
//!
//! ## Core Responsibilities
//!
//! ### Login Handshake
//! Every connection starts unauthenticated. The first `#login <id>` line
//! stores the identifier on the connection; a second one is a protocol
//! violation and the connection is closed after an explanatory notice.
//! Identifiers are not required to be unique across connections.
//!
//! ### Broadcast
//! Any other line is relayed to all registered connections, the sender
//! included, as `>{id}:{text}`. Lines from connections that never logged in
//! are relayed with an empty identifier.
//!
//! ### Operator Console
//! Lines typed at the server console are either `#` commands (`#quit`,
//! `#stop`, `#close`, `#setport <n>`, `#start`, `#getport`) or text that is
//! broadcast as `<SERVER MSG> {text}`.
//!
//! ## Architecture Design
//!
//! ### Event Loop
//! Network tasks never run protocol logic. They turn socket activity into
//! [`ServerEvent`]s that a single loop hands to the [`ServerProtocol`],
//! together with operator input. Connect and disconnect notifications are
//! therefore processed one at a time.
//!
//! ### Shared Registry
//! The [`SessionRegistry`] lives behind an `Arc<RwLock<_>>`. Connection
//! tasks lock it to register and unregister themselves; broadcasts take a
//! snapshot under the read lock and deliver outside of it, so a disconnect
//! during a broadcast only costs that one recipient.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connection handles, their login state and the live set.
//!
//! ### Network Module (`network`)
//! TCP accept loop, per-connection tasks and the event type they emit.
//!
//! ### Protocol Module (`protocol`)
//! The login state machine, broadcast and console command execution.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use chat_server::{ChatServer, ServerConfig};
//! use chat_shared::{wire, ShutdownSignal, StdoutConsole};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shutdown = ShutdownSignal::new();
//!     let mut server = ChatServer::new(ServerConfig::default(), Arc::new(StdoutConsole), shutdown);
//!     server.listen().await?;
//!
//!     // Runs until `#quit` is typed at the console
//!     server.run(wire::lines(tokio::io::stdin())).await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;
pub mod protocol;
pub mod registry;

pub use error::ServerError;
pub use network::{Listener, ServerEvent};
pub use protocol::ServerProtocol;
pub use registry::{Connection, ConnectionId, LoginOutcome, SendError, SessionRegistry};

use chat_shared::{wire, Console, ShutdownSignal, DEFAULT_BIND_HOST, DEFAULT_PORT};
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, RwLock};

/// Startup settings for the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the listening socket to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Owns the protocol engine and the loop feeding it
pub struct ChatServer {
    protocol: ServerProtocol,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    console: Arc<dyn Console>,
    shutdown: ShutdownSignal,
}

impl ChatServer {
    pub fn new(config: ServerConfig, console: Arc<dyn Console>, shutdown: ShutdownSignal) -> Self {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listener = Listener::new(&config.host, config.port, Arc::clone(&registry), events_tx);
        let protocol = ServerProtocol::new(registry, listener, Arc::clone(&console), shutdown.clone());

        Self {
            protocol,
            events: events_rx,
            console,
            shutdown,
        }
    }

    /// Starts accepting connections
    pub async fn listen(&mut self) -> Result<SocketAddr, ServerError> {
        self.protocol.listen().await
    }

    /// Address bound while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.protocol.listener().local_addr()
    }

    pub fn registry(&self) -> Arc<RwLock<SessionRegistry>> {
        Arc::clone(self.protocol.registry())
    }

    /// Processes network events and console lines until shutdown
    ///
    /// When the console input ends the server keeps serving clients; only
    /// the shutdown signal stops the loop. Every connection is closed before
    /// returning.
    pub async fn run<R>(self, mut input: tokio::io::Lines<R>)
    where
        R: AsyncBufRead + Unpin,
    {
        let ChatServer {
            mut protocol,
            mut events,
            console,
            shutdown,
        } = self;
        let mut input_open = true;

        while !shutdown.is_triggered() {
            // Queued lifecycle events are shown before the next operator line
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                Some(event) = events.recv() => protocol.handle_event(event).await,
                line = input.next_line(), if input_open => match line {
                    Ok(Some(text)) => protocol.on_operator_message(&text).await,
                    Ok(None) => {
                        debug!("Console input closed");
                        input_open = false;
                    }
                    Err(e) => {
                        debug!("Console read failed: {}", e);
                        console.display("Unexpected error while reading from console!");
                        input_open = false;
                    }
                },
            }
        }

        info!("Server shutting down");
        protocol.close_all().await;

        // Display whatever closing everything has queued, e.g. ListenStopped
        while let Ok(event) = events.try_recv() {
            protocol.handle_event(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_shared::RecordingConsole;
    use std::io;
    use std::time::Duration;
    use tokio::time::timeout;

    fn server() -> (ChatServer, Arc<RecordingConsole>, ShutdownSignal) {
        let console = Arc::new(RecordingConsole::new());
        let shutdown = ShutdownSignal::new();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let server = ChatServer::new(config, Arc::clone(&console) as Arc<dyn Console>, shutdown.clone());
        (server, console, shutdown)
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5555);
    }

    #[tokio::test]
    async fn test_run_executes_console_commands_until_quit() {
        let (mut server, console, shutdown) = server();
        let addr = server.listen().await.unwrap();
        let input = tokio_test::io::Builder::new().read(b"#getport\n#quit\n").build();

        timeout(Duration::from_secs(2), server.run(wire::lines(input)))
            .await
            .expect("server loop did not finish");

        assert!(shutdown.is_triggered());
        assert!(console.contains(&addr.port().to_string()));
    }

    #[tokio::test]
    async fn test_lifecycle_notices_survive_immediate_quit() {
        for _ in 0..20 {
            let (mut server, console, _shutdown) = server();
            let addr = server.listen().await.unwrap();
            let input = tokio_test::io::Builder::new().read(b"#quit\n").build();

            timeout(Duration::from_secs(2), server.run(wire::lines(input)))
                .await
                .expect("server loop did not finish");

            assert_eq!(
                console.lines(),
                vec![
                    format!("Server listening for connections on port {}", addr.port()),
                    "Server has stopped listening for connections.".to_string(),
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_console_read_error_is_reported_and_server_keeps_running() {
        let (mut server, console, shutdown) = server();
        server.listen().await.unwrap();
        let input = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::Other, "console gone"))
            .build();

        let task = tokio::spawn(server.run(wire::lines(input)));
        timeout(Duration::from_secs(2), async {
            while !console.contains("Unexpected error while reading from console!") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("read error was never reported");
        assert!(!task.is_finished());

        shutdown.trigger();
        timeout(Duration::from_secs(2), task)
            .await
            .expect("server loop did not finish")
            .unwrap();
    }
}
