//! Error types for the chat server and client session.
//!
//! Uses thiserror for ergonomic error definitions. `ChatError` messages are
//! part of the wire protocol: they travel to the client verbatim in
//! `error <message>` replies, so they must stay stable.

use thiserror::Error;

/// Application-level command errors
///
/// Returned by the chat handler and relayed to the originating client only.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChatError {
    /// Another user already holds the requested name
    #[error("name is not unique")]
    NameNotUnique,

    /// `join`/`rename` called without exactly one name argument
    #[error("name required")]
    NameRequired,

    /// `say` called with no text
    #[error("message required")]
    MessageRequired,

    /// The client has no roster entry yet
    #[error("not joined")]
    NotJoined,

    /// Command name is not one of `join`, `say`, `rename`
    #[error("unknown command")]
    UnknownCommand,

    /// The client already has a roster entry
    #[error("already joined")]
    AlreadyJoined,
}

/// Client session errors
///
/// Terminal conditions of a [`crate::Session`]; once one of these is
/// returned the session is unusable.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The socket failed while reading or writing
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was closed while a command was in flight
    #[error("session closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_error_messages_match_the_wire_protocol() {
        assert_eq!(ChatError::NameNotUnique.to_string(), "name is not unique");
        assert_eq!(ChatError::NameRequired.to_string(), "name required");
        assert_eq!(ChatError::MessageRequired.to_string(), "message required");
        assert_eq!(ChatError::NotJoined.to_string(), "not joined");
        assert_eq!(ChatError::UnknownCommand.to_string(), "unknown command");
        assert_eq!(ChatError::AlreadyJoined.to_string(), "already joined");
    }
}
