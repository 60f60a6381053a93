//! Server protocol engine: login handshake, broadcast and operator commands
//!
//! The engine consumes [`ServerEvent`]s one at a time, so connection
//! lifecycle notifications are serialized against each other and against
//! every broadcast the engine performs. Connection tasks only touch the
//! registry to add or remove themselves.

use crate::error::ServerError;
use crate::network::{Listener, ServerEvent};
use crate::registry::{ConnectionId, LoginOutcome, SessionRegistry};
use chat_shared::command::{self, ServerCommand};
use chat_shared::{wire, Console, ShutdownSignal};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Authoritative chat state machine for all connected clients
pub struct ServerProtocol {
    registry: Arc<RwLock<SessionRegistry>>,
    listener: Listener,
    console: Arc<dyn Console>,
    shutdown: ShutdownSignal,
}

impl ServerProtocol {
    pub fn new(
        registry: Arc<RwLock<SessionRegistry>>,
        listener: Listener,
        console: Arc<dyn Console>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            registry,
            listener,
            console,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<RwLock<SessionRegistry>> {
        &self.registry
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Starts accepting connections on the configured port
    pub async fn listen(&mut self) -> Result<SocketAddr, ServerError> {
        self.listener.start().await
    }

    /// Dispatches one event produced by the network layer
    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ListenStarted { addr } => self.on_listen_started(addr),
            ServerEvent::ListenStopped => self.on_listen_stopped(),
            ServerEvent::ClientConnected { id, peer } => self.on_client_connected(id, peer),
            ServerEvent::ClientDisconnected { id, login_id } => {
                self.on_client_disconnected(id, login_id.as_deref())
            }
            ServerEvent::Message { id, text } => self.on_client_message(id, &text).await,
        }
    }

    /// Handles a line received from a client connection
    pub async fn on_client_message(&mut self, id: ConnectionId, msg: &str) {
        let login_id = {
            let registry = self.registry.read().await;
            match registry.get(id) {
                Some(connection) => connection.login_id().map(str::to_string),
                None => {
                    debug!("Dropping message from closed connection {}", id);
                    return;
                }
            }
        };

        self.console.display(&format!(
            "Message received: <{}> from <{}>",
            msg,
            login_id.as_deref().unwrap_or_default()
        ));
        debug!("Connection {} ({:?}) sent {:?}", id, login_id, msg);

        if wire::is_login(msg) {
            self.handle_login(id, msg).await;
        } else {
            let line = wire::client_broadcast(login_id.as_deref(), msg);
            self.broadcast(&line).await;
        }
    }

    async fn handle_login(&mut self, id: ConnectionId, msg: &str) {
        let outcome = match command::argument(msg) {
            Ok(login_id) => {
                let outcome = self.registry.write().await.record_login(id, login_id);
                if outcome == LoginOutcome::LoggedIn {
                    self.console.display(&format!("<{}> has logged on.", login_id));
                    return;
                }
                outcome
            }
            Err(e) => {
                let registry = self.registry.read().await;
                let Some(connection) = registry.get(id) else {
                    return;
                };
                let existing = connection.login_id().map(str::to_string);
                match existing {
                    Some(existing) => LoginOutcome::AlreadyLoggedIn { existing },
                    None => {
                        warn!("Malformed login from connection {}: {}", id, e);
                        if connection.send(wire::MALFORMED_LOGIN).is_err() {
                            self.console.display("Error: cannot send message to client.");
                        }
                        return;
                    }
                }
            }
        };

        match outcome {
            LoginOutcome::AlreadyLoggedIn { existing } => {
                self.reject_second_login(id, &existing).await
            }
            LoginOutcome::UnknownConnection => {
                debug!("Login from connection {} that is no longer registered", id)
            }
            LoginOutcome::LoggedIn => {}
        }
    }

    /// Sends the rejection notice and closes a connection that logged in twice
    async fn reject_second_login(&mut self, id: ConnectionId, existing: &str) {
        warn!(
            "Connection {} attempted a second login while logged in as {:?}",
            id, existing
        );

        let removed = self.registry.write().await.remove(id);
        let Some(connection) = removed else {
            return;
        };

        if connection.send(wire::ALREADY_LOGGED_IN).is_err() {
            self.console.display("Error: cannot send message to client.");
        }
        connection.close();
        self.on_client_disconnected(id, Some(existing));
    }

    /// Handles a line typed at the server console
    pub async fn on_operator_message(&mut self, text: &str) {
        if command::is_command(text) {
            match ServerCommand::parse(text) {
                Ok(command) => self.execute(command).await,
                Err(e) => {
                    debug!("Rejected console command {:?}: {}", text, e);
                    self.console.display(&format!("Error: {}", e));
                }
            }
            return;
        }

        let line = wire::server_broadcast(text);
        self.console.display(&line);
        self.broadcast(&line).await;
    }

    async fn execute(&mut self, command: ServerCommand) {
        debug!("Executing console command {:?}", command);
        match command {
            ServerCommand::Quit => {
                self.close_all().await;
                self.shutdown.trigger();
            }
            ServerCommand::Stop => {
                self.listener.stop();
            }
            ServerCommand::Close => self.close_all().await,
            ServerCommand::SetPort(port) => {
                if self.listener.is_listening() {
                    self.console
                        .display("Cannot execute command #setport while the server is listening!");
                } else {
                    self.listener.set_port(port);
                    self.console.display("new port is set");
                }
            }
            ServerCommand::Start => {
                if self.listener.is_listening() {
                    self.console
                        .display("Cannot execute command #start while the server is listening!");
                } else if let Err(e) = self.listener.start().await {
                    error!("Failed to start listening: {:?}", e);
                    self.console
                        .display("Error! Server could not start listening for new clients.");
                }
            }
            ServerCommand::GetPort => {
                // The bound port differs from the configured one for port 0
                let port = self
                    .listener
                    .local_addr()
                    .map_or(self.listener.port(), |addr| addr.port());
                self.console.display(&port.to_string());
            }
        }
    }

    /// Stops listening and closes every connection
    pub async fn close_all(&mut self) {
        self.listener.stop();

        let connections = self.registry.write().await.drain();
        for connection in connections {
            connection.close();
            self.on_client_disconnected(connection.id, connection.login_id());
        }
    }

    /// Queues `line` on every registered connection
    ///
    /// The registry is only locked while taking the snapshot. A connection
    /// that went away in the meantime is skipped; the rest still receive
    /// the line. Returns the number of connections the line was queued on.
    pub async fn broadcast(&self, line: &str) -> usize {
        let recipients = {
            let registry = self.registry.read().await;
            registry.snapshot()
        };

        let mut delivered = 0;
        for connection in recipients {
            match connection.send(line) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to deliver broadcast: {}", e),
            }
        }
        delivered
    }

    fn on_listen_started(&self, addr: SocketAddr) {
        self.console.display(&format!(
            "Server listening for connections on port {}",
            addr.port()
        ));
    }

    fn on_listen_stopped(&self) {
        self.console
            .display("Server has stopped listening for connections.");
    }

    fn on_client_connected(&self, id: ConnectionId, peer: SocketAddr) {
        info!("Client {} connected from {}", id, peer);
        self.console.display("A new client has connected to the server.");
    }

    fn on_client_disconnected(&self, id: ConnectionId, login_id: Option<&str>) {
        info!("Client {} disconnected", id);
        self.console.display(&format!(
            "The client: <{}> has disconnected!",
            login_id.unwrap_or_default()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use chat_shared::RecordingConsole;
    use tokio::sync::mpsc;

    struct Harness {
        protocol: ServerProtocol,
        console: Arc<RecordingConsole>,
        shutdown: ShutdownSignal,
        _events: mpsc::UnboundedReceiver<ServerEvent>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listener = Listener::new("127.0.0.1", 0, Arc::clone(&registry), events_tx);
        let console = Arc::new(RecordingConsole::new());
        let shutdown = ShutdownSignal::new();
        let protocol = ServerProtocol::new(
            registry,
            listener,
            Arc::clone(&console) as Arc<dyn Console>,
            shutdown.clone(),
        );
        Harness {
            protocol,
            console,
            shutdown,
            _events: events_rx,
        }
    }

    async fn connect(protocol: &ServerProtocol) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        let id = protocol.registry().write().await.add(peer, tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn line(text: &str) -> Outbound {
        Outbound::Line(text.to_string())
    }

    async fn login_id(protocol: &ServerProtocol, id: ConnectionId) -> Option<String> {
        protocol
            .registry()
            .read()
            .await
            .get(id)
            .and_then(|c| c.login_id().map(str::to_string))
    }

    #[tokio::test]
    async fn test_login_sets_identifier_and_is_not_broadcast() {
        let mut h = harness();
        let (alice, mut alice_rx) = connect(&h.protocol).await;

        h.protocol.on_client_message(alice, "#login <alice>").await;

        assert_eq!(login_id(&h.protocol, alice).await.as_deref(), Some("alice"));
        assert!(h.console.contains("Message received: <#login <alice>> from <>"));
        assert!(h.console.contains("<alice> has logged on."));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_chat_is_broadcast_to_everyone_including_sender() {
        let mut h = harness();
        let (alice, mut alice_rx) = connect(&h.protocol).await;
        let (bob, mut bob_rx) = connect(&h.protocol).await;
        h.protocol.on_client_message(alice, "#login <alice>").await;
        h.protocol.on_client_message(bob, "#login <bob>").await;

        h.protocol.on_client_message(alice, "hello").await;

        assert_eq!(drain(&mut alice_rx), vec![line(">alice:hello")]);
        assert_eq!(drain(&mut bob_rx), vec![line(">alice:hello")]);
        assert!(h.console.contains("Message received: <hello> from <alice>"));
    }

    #[tokio::test]
    async fn test_unauthenticated_messages_are_broadcast_with_empty_tag() {
        let mut h = harness();
        let (anon, mut anon_rx) = connect(&h.protocol).await;
        let (_other, mut other_rx) = connect(&h.protocol).await;

        h.protocol.on_client_message(anon, "anyone there?").await;

        assert_eq!(drain(&mut anon_rx), vec![line(">:anyone there?")]);
        assert_eq!(drain(&mut other_rx), vec![line(">:anyone there?")]);
        assert_eq!(login_id(&h.protocol, anon).await, None);
    }

    #[tokio::test]
    async fn test_second_login_is_rejected_and_connection_closed() {
        let mut h = harness();
        let (alice, mut alice_rx) = connect(&h.protocol).await;
        let (bob, mut bob_rx) = connect(&h.protocol).await;
        h.protocol.on_client_message(alice, "#login <alice>").await;

        h.protocol.on_client_message(alice, "#login <mallory>").await;

        assert_eq!(
            drain(&mut alice_rx),
            vec![line(wire::ALREADY_LOGGED_IN), Outbound::Close]
        );
        assert!(!h.protocol.registry().read().await.contains(alice));
        assert!(h.console.contains("The client: <alice> has disconnected!"));
        assert!(!h.console.contains("<mallory> has logged on."));

        // The closed connection no longer receives broadcasts
        h.protocol.on_client_message(bob, "still here").await;
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![line(">:still here")]);
    }

    #[tokio::test]
    async fn test_second_login_without_delimiters_is_still_a_violation() {
        let mut h = harness();
        let (alice, mut alice_rx) = connect(&h.protocol).await;
        h.protocol.on_client_message(alice, "#login <alice>").await;

        h.protocol.on_client_message(alice, "#login").await;

        assert_eq!(
            drain(&mut alice_rx),
            vec![line(wire::ALREADY_LOGGED_IN), Outbound::Close]
        );
    }

    #[tokio::test]
    async fn test_messages_queued_after_close_are_dropped() {
        let mut h = harness();
        let (alice, _alice_rx) = connect(&h.protocol).await;
        let (_bob, mut bob_rx) = connect(&h.protocol).await;
        h.protocol.on_client_message(alice, "#login <alice>").await;
        h.protocol.on_client_message(alice, "#login <alice>").await;

        h.protocol.on_client_message(alice, "late message").await;

        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_login_keeps_connection_open() {
        let mut h = harness();
        let (anon, mut anon_rx) = connect(&h.protocol).await;

        h.protocol.on_client_message(anon, "#login alice").await;

        assert_eq!(drain(&mut anon_rx), vec![line(wire::MALFORMED_LOGIN)]);
        assert!(h.protocol.registry().read().await.contains(anon));
        assert_eq!(login_id(&h.protocol, anon).await, None);

        h.protocol.on_client_message(anon, "#login <alice>").await;
        assert_eq!(login_id(&h.protocol, anon).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_same_login_on_two_connections_is_allowed() {
        let mut h = harness();
        let (first, _rx1) = connect(&h.protocol).await;
        let (second, _rx2) = connect(&h.protocol).await;

        h.protocol.on_client_message(first, "#login <bob>").await;
        h.protocol.on_client_message(second, "#login <bob>").await;

        assert_eq!(login_id(&h.protocol, first).await.as_deref(), Some("bob"));
        assert_eq!(login_id(&h.protocol, second).await.as_deref(), Some("bob"));
        assert_eq!(h.protocol.registry().read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_operator_text_is_displayed_and_broadcast() {
        let mut h = harness();
        let (_alice, mut alice_rx) = connect(&h.protocol).await;

        h.protocol.on_operator_message("restarting soon").await;

        assert!(h.console.contains("<SERVER MSG> restarting soon"));
        assert_eq!(drain(&mut alice_rx), vec![line("<SERVER MSG> restarting soon")]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_failed_recipient() {
        let h = harness();
        let (_a, mut a_rx) = connect(&h.protocol).await;
        let (_b, b_rx) = connect(&h.protocol).await;
        let (_c, mut c_rx) = connect(&h.protocol).await;
        drop(b_rx);

        let delivered = h.protocol.broadcast("ping").await;

        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut a_rx), vec![line("ping")]);
        assert_eq!(drain(&mut c_rx), vec![line("ping")]);
    }

    #[tokio::test]
    async fn test_setport_then_getport_while_not_listening() {
        let mut h = harness();

        h.protocol.on_operator_message("#setport <9999>").await;
        assert!(h.console.contains("new port is set"));

        h.protocol.on_operator_message("#getport").await;
        assert_eq!(h.console.last().as_deref(), Some("9999"));
        assert_eq!(h.protocol.listener().port(), 9999);
    }

    #[tokio::test]
    async fn test_setport_is_rejected_while_listening() {
        let mut h = harness();
        let addr = h.protocol.listen().await.unwrap();

        h.protocol.on_operator_message("#setport <9999>").await;
        assert!(h
            .console
            .contains("Cannot execute command #setport while the server is listening!"));

        h.protocol.on_operator_message("#getport").await;
        assert_eq!(h.console.last(), Some(addr.port().to_string()));
    }

    #[tokio::test]
    async fn test_malformed_setport_has_no_effect() {
        let mut h = harness();

        h.protocol.on_operator_message("#setport 9999").await;
        h.protocol.on_operator_message("#setport <port>").await;

        assert_eq!(h.protocol.listener().port(), 0);
        assert!(!h.console.contains("new port is set"));
        assert_eq!(h.console.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_is_reported() {
        let mut h = harness();
        let (_alice, mut alice_rx) = connect(&h.protocol).await;

        h.protocol.on_operator_message("#reboot").await;

        assert!(h.console.last().unwrap().starts_with("Error: unknown command"));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_stop_keeps_existing_connections() {
        let mut h = harness();
        h.protocol.listen().await.unwrap();
        let (_alice, mut alice_rx) = connect(&h.protocol).await;

        h.protocol.on_operator_message("#stop").await;

        assert!(!h.protocol.listener().is_listening());
        assert_eq!(h.protocol.registry().read().await.len(), 1);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_start_after_stop_and_start_while_listening() {
        let mut h = harness();
        h.protocol.listen().await.unwrap();

        h.protocol.on_operator_message("#start").await;
        assert!(h
            .console
            .contains("Cannot execute command #start while the server is listening!"));

        h.protocol.on_operator_message("#stop").await;
        h.protocol.on_operator_message("#start").await;
        assert!(h.protocol.listener().is_listening());
    }

    #[tokio::test]
    async fn test_close_disconnects_everyone_and_stops_listening() {
        let mut h = harness();
        h.protocol.listen().await.unwrap();
        let (alice, mut alice_rx) = connect(&h.protocol).await;
        let (_anon, mut anon_rx) = connect(&h.protocol).await;
        h.protocol.on_client_message(alice, "#login <alice>").await;

        h.protocol.on_operator_message("#close").await;

        assert!(!h.protocol.listener().is_listening());
        assert!(h.protocol.registry().read().await.is_empty());
        assert_eq!(drain(&mut alice_rx), vec![Outbound::Close]);
        assert_eq!(drain(&mut anon_rx), vec![Outbound::Close]);
        assert!(h.console.contains("The client: <alice> has disconnected!"));
        assert!(!h.shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_quit_closes_everything_and_signals_shutdown() {
        let mut h = harness();
        let (_alice, mut alice_rx) = connect(&h.protocol).await;

        h.protocol.on_operator_message("#quit").await;

        assert!(h.shutdown.is_triggered());
        assert_eq!(drain(&mut alice_rx), vec![Outbound::Close]);
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_displayed() {
        let mut h = harness();
        let addr = SocketAddr::from(([0, 0, 0, 0], 5555));

        h.protocol.handle_event(ServerEvent::ListenStarted { addr }).await;
        h.protocol
            .handle_event(ServerEvent::ClientConnected {
                id: ConnectionId(7),
                peer: addr,
            })
            .await;
        h.protocol
            .handle_event(ServerEvent::ClientDisconnected {
                id: ConnectionId(7),
                login_id: Some("carol".to_string()),
            })
            .await;
        h.protocol.handle_event(ServerEvent::ListenStopped).await;

        assert_eq!(
            h.console.lines(),
            vec![
                "Server listening for connections on port 5555",
                "A new client has connected to the server.",
                "The client: <carol> has disconnected!",
                "Server has stopped listening for connections.",
            ]
        );
    }
}
