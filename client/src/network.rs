//! Client transport: one TCP connection to the chat server
//!
//! Inbound lines are read by a background task and delivered to the client
//! engine as [`ClientEvent`]s. Every transport carries the epoch it was
//! opened in so the engine can tell events of the current connection from
//! leftovers of a connection it already closed.

use crate::error::ConnectionSetupError;
use chat_shared::wire;
use log::{debug, info};
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages sent from the transport reader task to the client engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ServerMessage { epoch: u64, payload: String },
    /// The server closed the connection or reading from it failed
    ClosedByPeer { epoch: u64 },
}

impl ClientEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            ClientEvent::ServerMessage { epoch, .. } | ClientEvent::ClosedByPeer { epoch } => *epoch,
        }
    }
}

pub struct Transport {
    epoch: u64,
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
}

impl Transport {
    /// Connects to `host:port` and starts forwarding inbound lines
    pub async fn connect(
        host: &str,
        port: u16,
        epoch: u64,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self, ConnectionSetupError> {
        let setup_error = |source| ConnectionSetupError {
            host: host.to_string(),
            port,
            source,
        };

        let stream = TcpStream::connect((host, port)).await.map_err(setup_error)?;
        let peer = stream.peer_addr().map_err(setup_error)?;
        info!("Connected to {} (epoch {})", peer, epoch);

        let (reader, writer) = stream.into_split();
        let reader_task = tokio::spawn(async move {
            let mut lines = wire::lines(reader);
            loop {
                match lines.next_line().await {
                    Ok(Some(payload)) => {
                        if events.send(ClientEvent::ServerMessage { epoch, payload }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Error reading from server: {}", e);
                        break;
                    }
                }
            }
            let _ = events.send(ClientEvent::ClosedByPeer { epoch });
        });

        Ok(Self {
            epoch,
            peer,
            writer,
            reader_task,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one line to the server
    pub async fn send(&mut self, line: &str) -> io::Result<()> {
        wire::write_line(&mut self.writer, line).await
    }

    /// Closes the connection without reporting it as a peer close
    pub async fn close(mut self) -> io::Result<()> {
        self.reader_task.abort();
        self.writer.shutdown().await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_failure_is_setup_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = Transport::connect("127.0.0.1", port, 1, tx).await.err().unwrap();
        assert_eq!(err.host, "127.0.0.1");
        assert_eq!(err.port, port);
    }

    #[tokio::test]
    async fn test_lines_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut transport = Transport::connect("127.0.0.1", port, 3, tx).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (server_reader, mut server_writer) = server_side.into_split();
        let mut server_lines = wire::lines(server_reader);

        transport.send("#login <alice>").await.unwrap();
        assert_eq!(
            server_lines.next_line().await.unwrap().as_deref(),
            Some("#login <alice>")
        );

        wire::write_line(&mut server_writer, ">alice:hi").await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            ClientEvent::ServerMessage {
                epoch: 3,
                payload: ">alice:hi".to_string()
            }
        );

        drop(server_writer);
        drop(server_lines);
        assert_eq!(next_event(&mut rx).await, ClientEvent::ClosedByPeer { epoch: 3 });
    }

    #[tokio::test]
    async fn test_local_close_does_not_report_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let transport = Transport::connect("127.0.0.1", port, 1, tx).await.unwrap();
        let (_server_side, _) = listener.accept().await.unwrap();

        transport.close().await.unwrap();

        let result = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(result, Ok(None)), "unexpected event {:?}", result);
    }
}
