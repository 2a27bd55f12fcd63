//! Wire protocol definitions and transport contracts.
//!
//! The protocol is line-oriented UTF-8 text. A client frame is a trimmed
//! line tokenized on single spaces into a command name and arguments. The
//! server answers every command with `ok` or `error <message>`, and may
//! interleave unsolicited notification lines at any time.

use async_trait::async_trait;

use crate::types::ClientId;

/// Reply sent after a command the handler accepted.
pub const REPLY_OK: &str = "ok";
/// Prefix of the reply sent after a command the handler rejected.
pub const REPLY_ERROR_PREFIX: &str = "error ";
/// Notification enqueued to every live connection during graceful shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// A parsed client command
///
/// Produced by a connection's reader task from a single line and consumed
/// by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Connection the line arrived on
    pub client_id: ClientId,
    /// First token of the line
    pub name: String,
    /// Remaining tokens, in order
    pub args: Vec<String>,
}

impl Command {
    /// Tokenize a trimmed, non-empty line into a command.
    ///
    /// Splits on single ASCII spaces: the first token is the name, the rest
    /// are the arguments. Consecutive spaces yield empty argument tokens,
    /// matching a plain single-space split.
    pub fn parse(client_id: ClientId, line: &str) -> Self {
        let mut parts = line.split(' ');
        let name = parts.next().unwrap_or_default().to_string();
        let args = parts.map(str::to_string).collect();

        Self {
            client_id,
            name,
            args,
        }
    }
}

/// One-way message delivery from the server to a single client.
///
/// Implemented by the transport ([`crate::ServerHandle`]) and injected into
/// the application so it can reply and broadcast without knowing about
/// sockets. Sends to unknown client ids are silently dropped; sends to a
/// client whose outbound queue is full wait for queue space.
#[async_trait]
pub trait Unicast: Send + Sync {
    /// Enqueue `message` on the outbound queue of `client_id`.
    async fn send_to(&self, client_id: ClientId, message: &str);
}

/// Application plugged into the dispatch loop.
///
/// All three entry points are invoked from the single dispatcher task, one
/// at a time, so implementations need no internal locking.
#[async_trait]
pub trait CommandHandler: Send {
    /// Error type relayed to the originating client as `error <message>`.
    type Error: std::fmt::Display + Send;

    /// A client finished connecting and is reachable via unicast.
    async fn connected(&mut self, client_id: ClientId);

    /// A client's connection is gone; no further events reference its id.
    async fn disconnected(&mut self, client_id: ClientId);

    /// Handle one command from a connected client.
    async fn command(&mut self, command: Command) -> Result<(), Self::Error>;
}
