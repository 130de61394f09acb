use std::{collections::HashMap, sync::Arc};

use log::info;
use thiserror::Error;

use crate::{
    auth::Authorizer,
    clients::{Client, ClientError, ClientRegistry},
    rooms::{QueueError, RoomError, RoomManager, TimerError},
    streams::StreamStore,
};

mod builtin;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}; try /help")]
    UnknownCommand(String),

    #[error("you are not authorized to run {0:?}")]
    Unauthorized(&'static str),

    #[error("usage: {0}")]
    BadArguments(&'static str),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Everything a command implementation may touch, injected per invocation.
pub struct CommandContext<'a> {
    pub client: &'a Arc<Client>,
    pub clients: &'a Arc<ClientRegistry>,
    pub rooms: &'a Arc<RoomManager>,
    pub streams: &'a Arc<StreamStore>,
}

type CommandRun = fn(&CommandContext, &[&str]) -> Result<String, CommandError>;

/// One registered chat command.
pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    /// Commands that only read the invoker's own state carry no permission
    /// and skip the authorizer entirely.
    pub permission: Option<&'static str>,
    run: CommandRun,
}

/// Splits a chat message into a command name and arguments. Returns `None`
/// for ordinary chat. Anything after the leading slash is fair game,
/// including further slashes.
pub fn parse(message: &str) -> Option<(&str, Vec<&str>)> {
    let body = message.strip_prefix('/')?;
    let mut segments = body.split(' ');
    let name = segments.next().unwrap_or("");

    Some((name, segments.filter(|s| !s.is_empty()).collect()))
}

/// Routes parsed commands to their implementations, checking the invoker's
/// permissions first. A missing authorizer permits everything.
pub struct CommandDispatcher {
    commands: HashMap<&'static str, Command>,
    authorizer: Option<Arc<Authorizer>>,
}

impl CommandDispatcher {
    pub fn new(authorizer: Option<Arc<Authorizer>>) -> Self {
        let mut commands = HashMap::new();

        for command in builtin::all() {
            commands.insert(command.name, command);
        }

        Self {
            commands,
            authorizer,
        }
    }

    pub fn authorizer(&self) -> Option<&Arc<Authorizer>> {
        self.authorizer.as_ref()
    }

    /// Runs a command for a client. The non-empty result string is meant to
    /// be sent back to the invoker as a system message.
    pub fn execute(
        &self,
        name: &str,
        args: &[&str],
        context: &CommandContext,
    ) -> Result<String, CommandError> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;

        if let Some(permission) = command.permission {
            let permitted = self
                .authorizer
                .as_ref()
                .map(|a| a.check(context.client.id, permission))
                .unwrap_or(true);

            if !permitted {
                return Err(CommandError::Unauthorized(command.name));
            }
        }

        info!(
            "client {} runs /{name} {}",
            context.client.id,
            args.join(" ")
        );

        (command.run)(context, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_chat_is_not_a_command() {
        assert!(parse("hello there").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn splits_name_and_arguments() {
        let (name, args) = parse("/stream set https://youtu.be/abc").expect("parses");

        assert_eq!(name, "stream");
        assert_eq!(args, vec!["set", "https://youtu.be/abc"]);
    }

    #[test]
    fn later_slashes_are_ordinary_text() {
        let (name, args) = parse("/queue add movies/night.mp4").expect("parses");

        assert_eq!(name, "queue");
        assert_eq!(args, vec!["add", "movies/night.mp4"]);
    }

    #[test]
    fn a_bare_slash_parses_to_an_empty_name() {
        let (name, args) = parse("/").expect("parses");

        assert_eq!(name, "");
        assert!(args.is_empty());
    }

    #[test]
    fn the_token_ends_at_the_first_space() {
        let (name, args) = parse("/ help").expect("parses");

        assert_eq!(name, "", "a leading space leaves an empty token");
        assert_eq!(args, vec!["help"]);
    }
}
