//! Per-connection state and I/O tasks.
//!
//! Each accepted socket is driven by two cooperating tasks spawned from the
//! dispatch loop: a reader that turns inbound lines into [`Command`] events
//! and a writer that drains the connection's bounded outbound queue. The
//! shared closing token stops both; cancelling it twice is a no-op.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::Command;
use crate::server::Event;
use crate::types::ClientId;

/// Capacity of a connection's outbound message queue.
///
/// A full queue blocks the sender; this is the only back-pressure the
/// server applies to a slow client.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 8;

/// Live connection entry in the server's connection table.
#[derive(Debug, Clone)]
pub(crate) struct Connection {
    pub id: ClientId,
    pub outbound: mpsc::Sender<String>,
    closing: CancellationToken,
}

impl Connection {
    /// Create the connection state and the receiver half of its outbound
    /// queue, which the writer task will own.
    pub fn new(id: ClientId) -> (Self, mpsc::Receiver<String>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let connection = Self {
            id,
            outbound,
            closing: CancellationToken::new(),
        };

        (connection, outbound_rx)
    }

    /// Signal both I/O tasks to stop. Safe to call more than once.
    pub fn close(&self) {
        self.closing.cancel();
    }

    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }
}

/// Reader task: parse newline-terminated frames into command events.
///
/// Lines are trimmed and tokenized on single spaces; empty lines are
/// skipped. Terminates on read error, EOF, or the closing token, and always
/// enqueues a final `Disconnected` notification for this client.
pub(crate) async fn receive_commands<R>(
    id: ClientId,
    reader: R,
    events: mpsc::Sender<Event>,
    closing: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            _ = closing.cancelled() => break,
        };

        match read {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let text = line.trim();

        if text.is_empty() {
            continue;
        }

        let command = Command::parse(id, text);

        if events.send(Event::Command(command)).await.is_err() {
            break;
        }
    }

    let _ = events.send(Event::Disconnected(id)).await;
}

/// Writer task: drain the outbound queue onto the socket.
///
/// Messages produced in one dispatch step are coalesced: after the first
/// write, anything already queued is written too before a single flush.
/// The select is biased toward pending messages so a shutdown sentinel
/// enqueued just before the closing token fires still goes out.
pub(crate) async fn deliver_messages<W>(
    writer: W,
    mut outbound: mpsc::Receiver<String>,
    closing: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    loop {
        tokio::select! {
            biased;

            message = outbound.recv() => {
                let Some(message) = message else { break };

                if flush_batch(&mut writer, message, &mut outbound).await.is_err() {
                    // The reader follows via the closing token.
                    closing.cancel();
                    break;
                }
            }

            _ = closing.cancelled() => break,
        }
    }

    let _ = writer.shutdown().await;
}

async fn flush_batch<W>(
    writer: &mut BufWriter<W>,
    first: String,
    outbound: &mut mpsc::Receiver<String>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, &first).await?;

    while let Ok(message) = outbound.try_recv() {
        write_line(writer, &message).await?;
    }

    writer.flush().await
}

async fn write_line<W>(writer: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.as_bytes()).await?;
    writer.write_all(b"\n").await
}
