//! Line-oriented multi-user TCP chat server and client.
//!
//! Clients connect over plain TCP, issue text commands (`join`, `rename`,
//! `say`), and receive broadcast notifications from other users and the
//! server. Every command is answered with `ok` or `error <reason>`.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - A single dispatch task owns all shared state and processes one event
//!   at a time, so the application handler needs no locks
//! - Each connection has a reader task and a writer task with a bounded
//!   outbound queue between server and socket
//! - Graceful shutdown notifies every client, then drains in-flight work
//!   until the last connection is gone
//!
//! # Example
//! ```ignore
//! use chatline::{Chat, Server};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let shutdown = CancellationToken::new();
//!     let server = Server::new();
//!     let chat = Chat::new(server.handle());
//!
//!     server.run(shutdown, "127.0.0.1:3000", chat).await
//! }
//! ```

pub mod chat;
mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use chat::Chat;
pub use error::{ChatError, SessionError};
pub use protocol::{Command, CommandHandler, Unicast, REPLY_ERROR_PREFIX, REPLY_OK, SHUTDOWN_MESSAGE};
pub use server::{Server, ServerHandle};
pub use session::Session;
pub use types::ClientId;
