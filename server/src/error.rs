use thiserror::Error;

/// Errors raised by the server's network layer
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not listen on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
