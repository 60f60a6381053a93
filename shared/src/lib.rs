//! # Chat Shared Library
//!
//! Pieces used by both the chat server and the chat client: the text
//! protocol spoken on the wire, the parser for local control commands, the
//! display capability handed to each protocol engine and the shutdown
//! signal used in place of direct process exits.
//!
//! ## Wire Protocol
//!
//! All traffic is newline-delimited UTF-8 text:
//!
//! | Direction | Shape |
//! |---|---|
//! | client → server, first line | `#login <loginID>` |
//! | client → server | raw chat text |
//! | server → client, relayed chat | `>{loginID}:{text}` |
//! | server → client, operator text | `<SERVER MSG> {text}` |
//! | server → client, second login | `Error: You are already logged in. Closing connection.` |
//!
//! ## Control Commands
//!
//! Lines typed at either console that start with `#` never reach the wire;
//! they are parsed into [`ClientCommand`] or [`ServerCommand`] and applied
//! locally. See the [`command`] module for the grammar.

pub mod command;
pub mod console;
pub mod shutdown;
pub mod wire;

pub use command::{ClientCommand, CommandError, ServerCommand};
pub use console::{Console, RecordingConsole, StdoutConsole};
pub use shutdown::ShutdownSignal;

/// Port used by both the client and the server when none is given
pub const DEFAULT_PORT: u16 = 5555;

/// Host the client connects to when none is given
pub const DEFAULT_HOST: &str = "localhost";

/// Address the server binds when none is given
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Parses a port given on the command line
pub fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse().ok()
}
