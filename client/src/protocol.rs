//! Client protocol engine: console input, control commands and connection lifecycle

use crate::error::ConnectionSetupError;
use crate::network::{ClientEvent, Transport};
use chat_shared::command::{self, ClientCommand};
use chat_shared::{wire, Console, ShutdownSignal, DEFAULT_HOST, DEFAULT_PORT};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Who to connect as and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub login_id: String,
    pub host: String,
    pub port: u16,
}

impl ClientConfig {
    pub fn new(login_id: impl Into<String>) -> Self {
        Self {
            login_id: login_id.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// One chat participant's session
///
/// The login identifier is fixed for the lifetime of the client. Host and
/// port may only change while disconnected, and every (re)connection
/// announces the identifier before anything else is sent.
pub struct ChatClient {
    login_id: String,
    host: String,
    port: u16,
    transport: Option<Transport>,
    epoch: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
    console: Arc<dyn Console>,
    shutdown: ShutdownSignal,
}

impl ChatClient {
    /// Connects to the server and announces the login identifier
    ///
    /// Returns the client together with the receiver of its transport
    /// events, which the caller feeds back through [`ChatClient::handle_event`].
    pub async fn connect(
        config: ClientConfig,
        console: Arc<dyn Console>,
        shutdown: ShutdownSignal,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ConnectionSetupError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut client = Self {
            login_id: config.login_id,
            host: config.host,
            port: config.port,
            transport: None,
            epoch: 0,
            events: events_tx,
            console,
            shutdown,
        };

        client.open_connection().await?;
        client
            .console
            .display(&format!("<{}> has logged on.", client.login_id));
        Ok((client, events_rx))
    }

    pub fn login_id(&self) -> &str {
        &self.login_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Signal triggered once the client has terminated
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub(crate) fn console(&self) -> &Arc<dyn Console> {
        &self.console
    }

    async fn open_connection(&mut self) -> Result<(), ConnectionSetupError> {
        self.epoch += 1;
        let mut transport =
            Transport::connect(&self.host, self.port, self.epoch, self.events.clone()).await?;

        if let Err(e) = transport.send(&wire::login_announcement(&self.login_id)).await {
            warn!("Failed to announce login to {}: {}", transport.peer(), e);
            self.console
                .display("Error, was not able to send loginID to server!");
        }
        self.transport = Some(transport);
        Ok(())
    }

    /// Handles one line typed by the user
    pub async fn submit(&mut self, text: &str) {
        if command::is_command(text) {
            match ClientCommand::parse(text) {
                Ok(command) => self.execute(command).await,
                Err(e) => {
                    debug!("Rejected console command {:?}: {}", text, e);
                    self.console.display(&format!("Error: {}", e));
                }
            }
            return;
        }

        let result = match self.transport.as_mut() {
            Some(transport) => transport.send(text).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        };

        if let Err(e) = result {
            warn!("Failed to send message: {}", e);
            self.console
                .display("Could not send message to server.  Terminating client.");
            self.terminate().await;
        }
    }

    async fn execute(&mut self, command: ClientCommand) {
        debug!("Executing console command {:?}", command);
        match command {
            ClientCommand::Quit => self.terminate().await,
            ClientCommand::Logoff => {
                if self.is_connected() {
                    self.close_connection().await;
                } else {
                    self.console
                        .display("cannot use command #logoff if client is not connected!");
                }
            }
            ClientCommand::SetHost(host) => {
                if self.is_connected() {
                    self.console
                        .display("cannot use command #sethost if client is already connected!");
                } else {
                    self.host = host;
                    self.console.display("new host is set");
                }
            }
            ClientCommand::SetPort(port) => {
                if self.is_connected() {
                    self.console
                        .display("cannot use command #setport if client is already connected!");
                } else {
                    self.port = port;
                    self.console.display("new port is set");
                }
            }
            ClientCommand::Login => {
                if self.is_connected() {
                    self.console
                        .display("cannot use command #login if client is already connected!");
                } else if let Err(e) = self.open_connection().await {
                    warn!("{:?}", e);
                    self.console
                        .display(&format!("Could not connect to {}:{}.", self.host, self.port));
                } else {
                    self.console
                        .display(&format!("<{}> has logged on.", self.login_id));
                }
            }
            ClientCommand::GetHost => self.console.display(&self.host),
            ClientCommand::GetPort => self.console.display(&self.port.to_string()),
        }
    }

    /// Dispatches an event from the transport reader
    ///
    /// Events from a transport that was closed or replaced are ignored.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        let current = self.transport.as_ref().map(Transport::epoch);
        if current != Some(event.epoch()) {
            debug!("Ignoring event from stale connection: {:?}", event);
            return;
        }

        match event {
            ClientEvent::ServerMessage { payload, .. } => self.on_server_message(&payload),
            ClientEvent::ClosedByPeer { .. } => self.on_transport_closed_by_peer().await,
        }
    }

    fn on_server_message(&self, payload: &str) {
        self.console.display(payload);
    }

    async fn on_transport_closed_by_peer(&mut self) {
        info!("Server closed the connection");
        self.console.display("The server has shut down!");
        self.terminate().await;
    }

    fn on_transport_closed_locally(&self) {
        self.console.display("Connection closed.");
    }

    async fn close_connection(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Error while closing connection: {}", e);
            }
            self.on_transport_closed_locally();
        }
    }

    /// Closes any open connection and signals the process to exit
    pub async fn terminate(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Error while closing connection: {}", e);
            }
        }
        self.shutdown.trigger();
    }
}
