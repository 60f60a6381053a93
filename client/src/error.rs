use thiserror::Error;

/// The client could not open a connection to the server
#[derive(Debug, Error)]
#[error("can't connect to {host}:{port}")]
pub struct ConnectionSetupError {
    pub host: String,
    pub port: u16,
    #[source]
    pub source: std::io::Error,
}
