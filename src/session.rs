//! Client-side session over the line protocol.
//!
//! A session duplexes one TCP connection: a receive task classifies every
//! inbound line as a command reply (`ok` / `error …`) or a server
//! notification, and a send task writes outgoing command lines. The caller
//! sees a request/response interface while notifications flow out on a
//! separate channel at any time.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::protocol::REPLY_ERROR_PREFIX;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One client connection to a chat server.
///
/// Commands are strictly request/response from the caller's point of view;
/// server-initiated notifications are delivered on the events channel
/// supplied at connect time, unmodified and with their trailing newline.
pub struct Session {
    input: mpsc::Sender<String>,
    replies: mpsc::Receiver<bool>,
    failures: mpsc::Receiver<io::Error>,
    closing: CancellationToken,
}

impl Session {
    /// Dial `address`, retrying up to three times with one-second pauses.
    ///
    /// Non-reply lines from the server are forwarded to `events`.
    pub async fn connect(address: &str, events: mpsc::Sender<String>) -> io::Result<Self> {
        let stream = dial(address).await?;
        let (read_half, write_half) = stream.into_split();

        let (input, input_rx) = mpsc::channel(1);
        let (replies_tx, replies) = mpsc::channel(2);
        // One failure per task at most, so capacity two never blocks.
        let (failures_tx, failures) = mpsc::channel(2);
        let closing = CancellationToken::new();

        tokio::spawn(receive_lines(
            read_half,
            replies_tx,
            events,
            failures_tx.clone(),
            closing.clone(),
        ));
        tokio::spawn(send_lines(
            write_half,
            input_rx,
            failures_tx,
            closing.clone(),
        ));

        Ok(Self {
            input,
            replies,
            failures,
            closing,
        })
    }

    /// Send one command and wait for its reply.
    ///
    /// Returns `Ok(true)` on an `ok` reply, `Ok(false)` on an `error …`
    /// reply, and `Err` once the connection is gone.
    pub async fn send_command(&mut self, name: &str, args: &[&str]) -> Result<bool, SessionError> {
        let line = format!("{} {}", name, args.join(" "));

        self.input
            .send(line)
            .await
            .map_err(|_| SessionError::Closed)?;

        tokio::select! {
            reply = self.replies.recv() => reply.ok_or(SessionError::Closed),
            failure = self.failures.recv() => match failure {
                Some(err) => Err(SessionError::Io(err)),
                None => Err(SessionError::Closed),
            },
        }
    }

    /// Tear down both I/O tasks and the socket. Safe to call repeatedly.
    pub fn close(&self) {
        self.closing.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closing.cancel();
    }
}

async fn dial(address: &str) -> io::Result<TcpStream> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        match TcpStream::connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(err) if attempt >= CONNECT_ATTEMPTS => return Err(err),
            Err(_) => tokio::time::sleep(CONNECT_RETRY_DELAY).await,
        }
    }
}

/// Receive task: classify every line from the server.
async fn receive_lines(
    reader: OwnedReadHalf,
    replies: mpsc::Sender<bool>,
    events: mpsc::Sender<String>,
    failures: mpsc::Sender<io::Error>,
    closing: CancellationToken,
) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            _ = closing.cancelled() => return,
        };

        match read {
            Ok(0) => {
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection");
                let _ = failures.send(eof).await;
                return;
            }
            Err(err) => {
                let _ = failures.send(err).await;
                return;
            }
            Ok(_) => {}
        }

        if line == "ok\n" {
            let _ = replies.send(true).await;
        } else if line.starts_with(REPLY_ERROR_PREFIX) {
            let _ = replies.send(false).await;
        } else if events.send(line.clone()).await.is_err() {
            return;
        }
    }
}

/// Send task: write command lines, one flush per command.
async fn send_lines(
    writer: OwnedWriteHalf,
    mut input: mpsc::Receiver<String>,
    failures: mpsc::Sender<io::Error>,
    closing: CancellationToken,
) {
    let mut writer = BufWriter::new(writer);

    loop {
        let message = tokio::select! {
            message = input.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = closing.cancelled() => break,
        };

        if let Err(err) = write_command(&mut writer, &message).await {
            let _ = failures.send(err).await;
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn write_command(
    writer: &mut BufWriter<OwnedWriteHalf>,
    line: &str,
) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
