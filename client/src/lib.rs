//! # Chat Client Library
//!
//! This library provides the client side of the chat service: a single
//! participant that connects to the server under a login identifier, sends
//! what the user types and shows what the server relays back.
//!
//! ## Core Responsibilities
//!
//! ### Login Announcement
//! Every time a connection is opened, `#login <id>` is the first line sent,
//! before any user input is processed. The identifier is fixed for the
//! lifetime of the client.
//!
//! ### Console Commands
//! Lines starting with `#` are handled locally and never transmitted:
//! `#quit`, `#logoff`, `#sethost <h>`, `#setport <n>`, `#login`,
//! `#gethost` and `#getport`. Host and port can only be changed while
//! logged off.
//!
//! ### Connection Loss
//! When the server closes the connection the client reports it and
//! terminates. Logging off with `#logoff` closes the connection locally and
//! is not reported as a server shutdown.
//!
//! ## Architecture Design
//!
//! The [`Transport`] owns the socket. A background task reads server lines
//! and forwards them as [`ClientEvent`]s tagged with the epoch of the
//! connection they came from. [`run`] multiplexes those events with the
//! console input and hands both to the [`ChatClient`] engine, one at a time.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! TCP connection setup, the reader task and the event type it emits.
//!
//! ### Protocol Module (`protocol`)
//! Command execution and connection lifecycle.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use chat_client::{run, ChatClient, ClientConfig};
//! use chat_shared::{wire, ShutdownSignal, StdoutConsole};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("alice");
//!     let (client, events) =
//!         ChatClient::connect(config, Arc::new(StdoutConsole), ShutdownSignal::new()).await?;
//!
//!     // Runs until `#quit`, end of input or the server going away
//!     run(client, events, wire::lines(tokio::io::stdin())).await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;
pub mod protocol;

pub use error::ConnectionSetupError;
pub use network::{ClientEvent, Transport};
pub use protocol::{ChatClient, ClientConfig};

use chat_shared::wire;
use log::{debug, info};
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

/// Processes console lines and transport events until the client terminates
///
/// End of console input terminates the client.
pub async fn run<R>(
    mut client: ChatClient,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    mut input: tokio::io::Lines<R>,
) where
    R: AsyncBufRead + Unpin,
{
    let shutdown = client.shutdown_signal();

    while !shutdown.is_triggered() {
        tokio::select! {
            _ = shutdown.triggered() => break,
            Some(event) = events.recv() => client.handle_event(event).await,
            line = input.next_line() => match line {
                Ok(Some(text)) => client.submit(&text).await,
                Ok(None) => {
                    debug!("Console input closed");
                    client.terminate().await;
                }
                Err(e) => {
                    debug!("Console read failed: {}", e);
                    client
                        .console()
                        .display("Unexpected error while reading from console!");
                    client.terminate().await;
                }
            },
        }
    }

    // Shutdown may have been triggered from outside, e.g. by Ctrl+C
    client.terminate().await;
    info!("Client terminated");
}
