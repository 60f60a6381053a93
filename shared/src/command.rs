//! Parser for the `#`-prefixed control directives typed at a local console
//!
//! Both sides share the same small grammar. Commands without an argument
//! must match exactly, commands carrying an argument match by prefix and
//! take their value from between the first `<` and the last `>`:
//!
//! ```text
//! #setport <6000>
//! #sethost <chat.example.org>
//! ```

use std::num::ParseIntError;
use thiserror::Error;

/// Leading character that marks a line as a control command
pub const COMMAND_PREFIX: char = '#';

/// Returns true if `text` should be interpreted locally instead of sent
pub fn is_command(text: &str) -> bool {
    text.starts_with(COMMAND_PREFIX)
}

/// Reasons a control command could not be parsed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command {command:?}: expected an argument written as <value>")]
    MissingDelimiters { command: String },

    #[error("invalid port number {value:?}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("unknown command {command:?}")]
    Unknown { command: String },
}

/// Extracts the value strictly between the first `<` and the last `>`
pub fn argument(command: &str) -> Result<&str, CommandError> {
    match (command.find('<'), command.rfind('>')) {
        (Some(start), Some(end)) if start < end => Ok(&command[start + 1..end]),
        _ => Err(CommandError::MissingDelimiters {
            command: command.to_string(),
        }),
    }
}

fn port_argument(command: &str) -> Result<u16, CommandError> {
    let value = argument(command)?;
    value.parse().map_err(|source| CommandError::InvalidPort {
        value: value.to_string(),
        source,
    })
}

fn unknown(command: &str) -> CommandError {
    CommandError::Unknown {
        command: command.to_string(),
    }
}

/// Directives accepted by the client console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit,
    Logoff,
    SetHost(String),
    SetPort(u16),
    Login,
    GetHost,
    GetPort,
}

impl ClientCommand {
    pub fn parse(command: &str) -> Result<Self, CommandError> {
        match command {
            "#quit" => Ok(Self::Quit),
            "#logoff" => Ok(Self::Logoff),
            "#login" => Ok(Self::Login),
            "#gethost" => Ok(Self::GetHost),
            "#getport" => Ok(Self::GetPort),
            _ if command.starts_with("#sethost") => {
                Ok(Self::SetHost(argument(command)?.to_string()))
            }
            _ if command.starts_with("#setport") => Ok(Self::SetPort(port_argument(command)?)),
            _ => Err(unknown(command)),
        }
    }
}

/// Directives accepted by the server console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Quit,
    Stop,
    Close,
    SetPort(u16),
    Start,
    GetPort,
}

impl ServerCommand {
    pub fn parse(command: &str) -> Result<Self, CommandError> {
        match command {
            "#quit" => Ok(Self::Quit),
            "#stop" => Ok(Self::Stop),
            "#close" => Ok(Self::Close),
            "#start" => Ok(Self::Start),
            "#getport" => Ok(Self::GetPort),
            _ if command.starts_with("#setport") => Ok(Self::SetPort(port_argument(command)?)),
            _ => Err(unknown(command)),
        }
    }
}
