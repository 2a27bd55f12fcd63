//! Chat server entry point.
//!
//! Binds the listener, wires the chat application into the dispatch loop,
//! and shuts down gracefully on Ctrl-C.

use std::env;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatline::{Chat, Server};

/// Default bind address
const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=chatline=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatline=info")),
        )
        .init();

    let address = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
                shutdown.cancel();
            }
        });
    }

    let server = Server::new();
    let chat = Chat::new(server.handle());

    server.run(shutdown, &address, chat).await
}
