//! Server transport and dispatch loop.
//!
//! The server owns one central dispatch task fed by an mpsc mailbox of
//! tagged events. The connection table and client count are written, and
//! every handler method is invoked, from that single task only, so
//! handlers see a strictly sequential world and need no locks. Concurrency
//! lives at the edges: the accept loop, one reader and one writer task per
//! connection, and unicast senders.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::connection::{deliver_messages, receive_commands, Connection};
use crate::protocol::{
    Command, CommandHandler, Unicast, REPLY_ERROR_PREFIX, REPLY_OK, SHUTDOWN_MESSAGE,
};
use crate::types::ClientId;

/// Capacity of the dispatcher's event mailbox.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Events multiplexed into the dispatch loop.
///
/// The dispatcher processes exactly one of these per iteration.
#[derive(Debug)]
pub(crate) enum Event {
    /// A socket was accepted; register it and spawn its I/O tasks.
    Connected {
        connection: Connection,
        stream: TcpStream,
        outbound: mpsc::Receiver<String>,
    },
    /// A connection's reader finished; deregister and notify the handler.
    Disconnected(ClientId),
    /// A parsed line from a connected client.
    Command(Command),
    /// Begin the graceful shutdown sequence.
    Shutdown,
}

/// Line-protocol TCP server.
///
/// Construct with [`Server::new`], grab a [`ServerHandle`] for unicast and
/// shutdown, then consume the server with [`Server::run`].
pub struct Server {
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    connections: Arc<DashMap<ClientId, Connection>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Server {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            events_tx,
            events_rx,
            connections: Arc::new(DashMap::new()),
            done_tx,
            done_rx,
        }
    }

    /// A cloneable handle for unicast sends and graceful shutdown.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
            connections: Arc::clone(&self.connections),
            done: self.done_rx.clone(),
        }
    }

    /// Bind `address` and serve until `shutdown` fires and the drain
    /// completes.
    ///
    /// Returns the bind error if the address is unavailable; otherwise
    /// returns only after every connection task has terminated.
    pub async fn run<H>(
        self,
        shutdown: CancellationToken,
        address: &str,
        handler: H,
    ) -> io::Result<()>
    where
        H: CommandHandler,
    {
        let listener = TcpListener::bind(address).await?;

        info!("Server listening on {}", address);

        let handle = self.handle();
        let Server {
            events_tx,
            events_rx,
            connections,
            done_tx,
            ..
        } = self;

        tokio::join!(
            dispatch(
                events_rx,
                events_tx.clone(),
                connections,
                handler,
                done_tx,
                handle.clone(),
            ),
            accept_connections(listener, shutdown, events_tx, handle),
        );

        info!("Shutdown completed");

        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle onto a running [`Server`].
///
/// Cheap to clone; safe to use from any task concurrently with the
/// dispatcher.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    events: mpsc::Sender<Event>,
    connections: Arc<DashMap<ClientId, Connection>>,
    done: watch::Receiver<bool>,
}

impl ServerHandle {
    /// Enqueue `message` on one client's outbound queue.
    ///
    /// Unknown client ids are silently dropped. Waits at most for space in
    /// the client's bounded queue, never for network progress.
    pub async fn send_to(&self, client_id: ClientId, message: &str) {
        let outbound = self
            .connections
            .get(&client_id)
            .map(|entry| entry.outbound.clone());

        if let Some(outbound) = outbound {
            let _ = outbound.send(message.to_string()).await;
        }
    }

    /// Trigger graceful shutdown and wait until the dispatcher has
    /// notified all clients and drained in-flight work.
    pub async fn close(&self) {
        let _ = self.events.send(Event::Shutdown).await;

        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

#[async_trait]
impl Unicast for ServerHandle {
    async fn send_to(&self, client_id: ClientId, message: &str) {
        ServerHandle::send_to(self, client_id, message).await;
    }
}

/// Accept loop: assign monotone client ids and mail `Connected` events.
///
/// On cancellation the listener is dropped and [`ServerHandle::close`]
/// runs the shutdown sequence.
async fn accept_connections(
    listener: TcpListener,
    shutdown: CancellationToken,
    events: mpsc::Sender<Event>,
    handle: ServerHandle,
) {
    let mut client_counter = 0u64;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(err) => {
                error!("Failed to accept connection: {}", err);
                continue;
            }
        };

        client_counter += 1;

        let (connection, outbound) = Connection::new(ClientId(client_counter));

        let event = Event::Connected {
            connection,
            stream,
            outbound,
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    drop(listener);
    handle.close().await;
}

/// The dispatch loop: the single serialization point of the server.
///
/// No two handler methods ever run concurrently; the connection table is
/// written only here.
async fn dispatch<H>(
    mut events: mpsc::Receiver<Event>,
    events_tx: mpsc::Sender<Event>,
    connections: Arc<DashMap<ClientId, Connection>>,
    mut handler: H,
    done: watch::Sender<bool>,
    unicast: ServerHandle,
) where
    H: CommandHandler,
{
    metrics::describe_gauge!("connected_clients", "Number of connected clients.");
    metrics::describe_histogram!("command_time", "Command duration in seconds.");

    let connected_clients = metrics::gauge!("connected_clients");
    let command_time = metrics::histogram!("command_time");

    let mut count: usize = 0;

    while let Some(event) = events.recv().await {
        match event {
            Event::Connected {
                connection,
                stream,
                outbound,
            } => {
                let client_id = connection.id;
                let closing = connection.closing();

                connections.insert(client_id, connection);
                count += 1;

                handler.connected(client_id).await;

                let (reader, writer) = stream.into_split();
                tokio::spawn(receive_commands(
                    client_id,
                    reader,
                    events_tx.clone(),
                    closing.clone(),
                ));
                tokio::spawn(deliver_messages(writer, outbound, closing));

                connected_clients.increment(1.0);
                info!("Client {} connected", client_id);
            }

            Event::Disconnected(client_id) => {
                let removed = connections.remove(&client_id);
                count = count.saturating_sub(1);

                handler.disconnected(client_id).await;

                if let Some((_, connection)) = removed {
                    connection.close();
                }

                connected_clients.decrement(1.0);
                info!("Client {} disconnected", client_id);
            }

            Event::Command(command) => {
                let client_id = command.client_id;
                let started = Instant::now();

                match handler.command(command).await {
                    Ok(()) => unicast.send_to(client_id, REPLY_OK).await,
                    Err(err) => {
                        unicast
                            .send_to(client_id, &format!("{REPLY_ERROR_PREFIX}{err}"))
                            .await
                    }
                }

                command_time.record(started.elapsed().as_secs_f64());
            }

            Event::Shutdown => {
                info!("Server shutting down, notifying {} clients", count);

                let live: Vec<Connection> = connections
                    .iter()
                    .map(|entry| entry.value().clone())
                    .collect();

                for connection in live {
                    // A full outbound queue skips the courtesy notice.
                    let _ = connection.outbound.try_send(SHUTDOWN_MESSAGE.to_string());
                    connection.close();
                }

                // Residual commands are discarded, not handled; reading
                // them unparks any reader blocked on the mailbox.
                while count > 0 {
                    match events.recv().await {
                        Some(Event::Disconnected(client_id)) => {
                            connections.remove(&client_id);
                            count -= 1;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }

                break;
            }
        }
    }

    let _ = done.send(true);
}
