//! Chat application handler.
//!
//! Maintains the user roster and the name-uniqueness invariant. Every
//! entry point runs on the server's dispatch loop, so the roster needs no
//! synchronization: between two dispatch steps no other code can observe
//! or mutate it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::protocol::{Command, CommandHandler, Unicast};
use crate::types::ClientId;

const COMMAND_JOIN: &str = "join";
const COMMAND_SAY: &str = "say";
const COMMAND_RENAME: &str = "rename";

/// Greeting unicast to every client on connect, before any join.
const WELCOME_MESSAGE: &str = "Welcome!";

/// A joined user: roster entry keyed by connection id.
#[derive(Debug)]
struct User {
    id: ClientId,
    name: String,
}

/// The chat state machine plugged into the dispatch loop.
///
/// `join` claims a free name, `rename` swaps it, `say` broadcasts text to
/// everyone including the sender. A disconnect removes the entry and
/// announces the departure to the users left behind.
pub struct Chat<U> {
    users: HashMap<ClientId, User>,
    unicast: U,
}

impl<U: Unicast> Chat<U> {
    pub fn new(unicast: U) -> Self {
        Self {
            users: HashMap::with_capacity(128),
            unicast,
        }
    }

    async fn send_to_all(&self, message: &str) {
        for user_id in self.users.keys() {
            self.unicast.send_to(*user_id, message).await;
        }
    }

    async fn join(&mut self, user_id: ClientId, args: Vec<String>) -> Result<(), ChatError> {
        let name = single_name(args)?;

        if self.users.contains_key(&user_id) {
            return Err(ChatError::AlreadyJoined);
        }

        if self.users.values().any(|existing| existing.name == name) {
            return Err(ChatError::NameNotUnique);
        }

        let announcement = format!("User {} joined", name);

        self.users.insert(user_id, User { id: user_id, name });
        self.send_to_all(&announcement).await;

        Ok(())
    }

    async fn rename(&mut self, user_id: ClientId, args: Vec<String>) -> Result<(), ChatError> {
        let name = single_name(args)?;

        let previous = match self.users.get(&user_id) {
            Some(user) => user.name.clone(),
            None => return Err(ChatError::NotJoined),
        };

        // The scan excludes the renaming user so renaming to one's own
        // current name succeeds.
        let collision = self
            .users
            .values()
            .any(|existing| existing.id != user_id && existing.name == name);

        if collision {
            return Err(ChatError::NameNotUnique);
        }

        let announcement = format!("User {} changed his name to {}", previous, name);

        self.users.insert(user_id, User { id: user_id, name });
        self.send_to_all(&announcement).await;

        Ok(())
    }

    async fn say(&mut self, user_id: ClientId, args: Vec<String>) -> Result<(), ChatError> {
        if args.is_empty() {
            return Err(ChatError::MessageRequired);
        }

        let Some(user) = self.users.get(&user_id) else {
            return Err(ChatError::NotJoined);
        };

        let message = format!("{}: {}", user.name, args.join(" "));

        self.send_to_all(&message).await;

        Ok(())
    }

    async fn leave(&mut self, user_id: ClientId) {
        let Some(user) = self.users.remove(&user_id) else {
            return;
        };

        // Removal happens first: the departing user never sees its own
        // leave message.
        self.send_to_all(&format!("User {} left", user.name)).await;
    }
}

/// Extract the single name argument of `join`/`rename`.
fn single_name(args: Vec<String>) -> Result<String, ChatError> {
    let mut args = args.into_iter();

    match (args.next(), args.next()) {
        (Some(name), None) => Ok(name),
        _ => Err(ChatError::NameRequired),
    }
}

#[async_trait]
impl<U: Unicast> CommandHandler for Chat<U> {
    type Error = ChatError;

    async fn connected(&mut self, client_id: ClientId) {
        self.unicast.send_to(client_id, WELCOME_MESSAGE).await;
    }

    async fn disconnected(&mut self, client_id: ClientId) {
        self.leave(client_id).await;
    }

    async fn command(&mut self, command: Command) -> Result<(), ChatError> {
        match command.name.as_str() {
            COMMAND_JOIN => self.join(command.client_id, command.args).await,
            COMMAND_SAY => self.say(command.client_id, command.args).await,
            COMMAND_RENAME => self.rename(command.client_id, command.args).await,
            _ => Err(ChatError::UnknownCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct TestUnicast {
        messages: mpsc::UnboundedSender<(ClientId, String)>,
    }

    #[async_trait]
    impl Unicast for TestUnicast {
        async fn send_to(&self, client_id: ClientId, message: &str) {
            let _ = self.messages.send((client_id, message.to_string()));
        }
    }

    fn test_chat() -> (
        Chat<TestUnicast>,
        mpsc::UnboundedReceiver<(ClientId, String)>,
    ) {
        let (messages, received) = mpsc::unbounded_channel();

        (Chat::new(TestUnicast { messages }), received)
    }

    async fn execute(
        chat: &mut Chat<TestUnicast>,
        client_id: u64,
        name: &str,
        args: &[&str],
    ) -> Result<(), ChatError> {
        chat.command(Command {
            client_id: ClientId(client_id),
            name: name.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        })
        .await
    }

    /// All unicasts complete before this runs, so a plain drain suffices.
    fn assert_message_sent(
        received: &mut mpsc::UnboundedReceiver<(ClientId, String)>,
        client_id: u64,
        expected: &str,
    ) {
        let mut seen = Vec::new();

        while let Ok(message) = received.try_recv() {
            if message == (ClientId(client_id), expected.to_string()) {
                return;
            }
            seen.push(message);
        }

        panic!("client {client_id} never received {expected:?}, saw {seen:?}");
    }

    fn drain(received: &mut mpsc::UnboundedReceiver<(ClientId, String)>) -> Vec<(ClientId, String)> {
        let mut messages = Vec::new();
        while let Ok(message) = received.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn sends_greeting_when_connected() {
        let (mut chat, mut received) = test_chat();

        chat.connected(ClientId(1)).await;

        assert_message_sent(&mut received, 1, "Welcome!");
    }

    #[tokio::test]
    async fn notifies_everyone_after_user_joined() {
        let (mut chat, mut received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();

        assert_message_sent(&mut received, 1, "User john joined");
    }

    #[tokio::test]
    async fn notifies_remaining_users_after_user_left() {
        let (mut chat, mut received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();
        execute(&mut chat, 2, "join", &["alex"]).await.unwrap();
        drain(&mut received);

        chat.disconnected(ClientId(1)).await;

        let messages = drain(&mut received);
        assert_eq!(messages, vec![(ClientId(2), "User john left".to_string())]);
    }

    #[tokio::test]
    async fn rejects_join_when_name_is_taken() {
        let (mut chat, _received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();

        assert_eq!(
            execute(&mut chat, 2, "join", &["john"]).await,
            Err(ChatError::NameNotUnique)
        );
    }

    #[tokio::test]
    async fn rejects_second_join_from_same_client() {
        let (mut chat, _received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();

        assert_eq!(
            execute(&mut chat, 1, "join", &["johnny"]).await,
            Err(ChatError::AlreadyJoined)
        );
    }

    #[tokio::test]
    async fn rejects_rename_when_name_is_taken() {
        let (mut chat, _received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();
        execute(&mut chat, 2, "join", &["alex"]).await.unwrap();

        assert_eq!(
            execute(&mut chat, 1, "rename", &["alex"]).await,
            Err(ChatError::NameNotUnique)
        );
    }

    #[tokio::test]
    async fn allows_rename_to_own_current_name() {
        let (mut chat, mut received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();

        execute(&mut chat, 1, "rename", &["john"]).await.unwrap();

        assert_message_sent(&mut received, 1, "User john changed his name to john");
    }

    #[tokio::test]
    async fn notifies_everyone_after_user_changed_his_name() {
        let (mut chat, mut received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();
        execute(&mut chat, 2, "join", &["alex"]).await.unwrap();

        execute(&mut chat, 1, "rename", &["tom"]).await.unwrap();

        assert_message_sent(&mut received, 2, "User john changed his name to tom");
    }

    #[tokio::test]
    async fn delivers_user_messages_to_everyone_including_sender() {
        let (mut chat, mut received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();
        execute(&mut chat, 2, "join", &["alex"]).await.unwrap();
        drain(&mut received);

        execute(&mut chat, 1, "say", &["hello", "world"]).await.unwrap();

        let messages = drain(&mut received);
        assert!(messages.contains(&(ClientId(1), "john: hello world".to_string())));
        assert!(messages.contains(&(ClientId(2), "john: hello world".to_string())));
    }

    #[tokio::test]
    async fn join_requires_exactly_one_name() {
        let (mut chat, _received) = test_chat();

        assert_eq!(
            execute(&mut chat, 1, "join", &[]).await,
            Err(ChatError::NameRequired)
        );
        assert_eq!(
            execute(&mut chat, 1, "join", &["john", "doe"]).await,
            Err(ChatError::NameRequired)
        );
    }

    #[tokio::test]
    async fn rename_requires_exactly_one_name() {
        let (mut chat, _received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();

        assert_eq!(
            execute(&mut chat, 1, "rename", &[]).await,
            Err(ChatError::NameRequired)
        );
    }

    #[tokio::test]
    async fn say_requires_text() {
        let (mut chat, _received) = test_chat();

        execute(&mut chat, 1, "join", &["john"]).await.unwrap();

        assert_eq!(
            execute(&mut chat, 1, "say", &[]).await,
            Err(ChatError::MessageRequired)
        );
    }

    #[tokio::test]
    async fn say_and_rename_require_join() {
        let (mut chat, _received) = test_chat();

        assert_eq!(
            execute(&mut chat, 1, "say", &["hello"]).await,
            Err(ChatError::NotJoined)
        );
        assert_eq!(
            execute(&mut chat, 1, "rename", &["tom"]).await,
            Err(ChatError::NotJoined)
        );
    }

    #[tokio::test]
    async fn rejects_unknown_commands() {
        let (mut chat, _received) = test_chat();

        assert_eq!(
            execute(&mut chat, 1, "shout", &["hello"]).await,
            Err(ChatError::UnknownCommand)
        );
    }

    #[tokio::test]
    async fn disconnect_of_unjoined_client_is_silent() {
        let (mut chat, mut received) = test_chat();

        execute(&mut chat, 2, "join", &["alex"]).await.unwrap();
        drain(&mut received);

        chat.disconnected(ClientId(1)).await;

        assert!(drain(&mut received).is_empty());
    }
}
