//! Line framing and the text shapes exchanged between client and server
//!
//! Every message on the wire is a single UTF-8 line terminated by `\n`.
//! Readers also accept `\r\n` so that the server can be driven from
//! telnet/netcat-style tools.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// Prefix of the login announcement a client sends right after connecting
pub const LOGIN_PREFIX: &str = "#login";

/// Tag put in front of every message originating from the server operator
pub const SERVER_MESSAGE_TAG: &str = "<SERVER MSG>";

/// Sent to a connection that attempts a second login, right before it is closed
pub const ALREADY_LOGGED_IN: &str = "Error: You are already logged in. Closing connection.";

/// Sent to an unauthenticated connection whose login announcement has no `<id>`
pub const MALFORMED_LOGIN: &str = "Error: Malformed login command.";

/// Builds the login announcement for `login_id`
pub fn login_announcement(login_id: &str) -> String {
    format!("{} <{}>", LOGIN_PREFIX, login_id)
}

/// Returns true if `message` is a login announcement
///
/// Matching is by prefix so the check stays independent of whether the
/// identifier part is well formed.
pub fn is_login(message: &str) -> bool {
    message.starts_with(LOGIN_PREFIX)
}

/// Formats a chat line relayed on behalf of a client
///
/// Connections that never logged in are relayed with an empty sender tag.
pub fn client_broadcast(login_id: Option<&str>, message: &str) -> String {
    format!(">{}:{}", login_id.unwrap_or_default(), message)
}

/// Formats a line originating from the server operator
pub fn server_broadcast(text: &str) -> String {
    format!("{} {}", SERVER_MESSAGE_TAG, text)
}

/// Wraps a reader into a cancel-safe line stream
///
/// `Lines::next_line` may be used inside `tokio::select!` without losing
/// partially read lines.
pub fn lines<R: AsyncRead>(reader: R) -> Lines<BufReader<R>> {
    BufReader::new(reader).lines()
}

/// Writes `line` followed by a newline and flushes the writer
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
