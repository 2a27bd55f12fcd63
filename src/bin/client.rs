//! Interactive chat client.
//!
//! Reads commands from stdin (`join <name>`, `say <text>`, `rename <name>`),
//! sends them through a [`chatline::Session`], and prints replies and
//! interleaved server notifications.

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chatline::{Session, SessionError};

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let address = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let (events_tx, mut events) = mpsc::channel(100);
    let mut session = Session::connect(&address, events_tx).await?;

    // Notifications arrive with their newline already attached.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print!("{event}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        let mut parts = line.split(' ');
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match session.send_command(name, &args).await {
            Ok(true) => println!("ok"),
            Ok(false) => println!("rejected"),
            Err(SessionError::Io(err)) => {
                eprintln!("connection lost: {err}");
                break;
            }
            Err(err) => {
                eprintln!("{err}");
                break;
            }
        }
    }

    session.close();

    Ok(())
}
