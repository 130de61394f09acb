use std::sync::Arc;

use log::error;

use super::{Command, CommandContext, CommandError};
use crate::{events::ServerEvent, rooms::Playback};

pub fn all() -> Vec<Command> {
    vec![
        Command {
            name: "help",
            usage: "help",
            summary: "list the available commands",
            permission: None,
            run: help,
        },
        Command {
            name: "user",
            usage: "user <name>",
            summary: "claim a username in this room",
            permission: None,
            run: user,
        },
        Command {
            name: "whoami",
            usage: "whoami",
            summary: "show your current identity",
            permission: None,
            run: whoami,
        },
        Command {
            name: "stream",
            usage: "stream <set|play|pause|stop|skip> [url]",
            summary: "control the room's playback",
            permission: Some("stream.control"),
            run: stream,
        },
        Command {
            name: "queue",
            usage: "queue add <url>",
            summary: "append media to your queue stack",
            permission: Some("queue.add"),
            run: queue,
        },
    ]
}

fn help(_context: &CommandContext, _args: &[&str]) -> Result<String, CommandError> {
    let mut lines: Vec<_> = all()
        .iter()
        .map(|c| format!("/{} - {}", c.usage, c.summary))
        .collect();

    lines.sort();
    Ok(lines.join("\n"))
}

fn whoami(context: &CommandContext, _args: &[&str]) -> Result<String, CommandError> {
    Ok(context.client.display_name())
}

fn user(context: &CommandContext, args: &[&str]) -> Result<String, CommandError> {
    let name = *args.first().ok_or(CommandError::BadArguments("user <name>"))?;

    context.clients.update_username(context.client, name)?;

    if let Ok(playback) = context.rooms.get(&context.client.room) {
        playback.refresh_info_from_client(context.client)?;
    }

    Ok(format!("you are now known as {name}"))
}

fn stream(context: &CommandContext, args: &[&str]) -> Result<String, CommandError> {
    const USAGE: &str = "stream <set|play|pause|stop|skip> [url]";

    let playback = context.rooms.get_or_create(&context.client.room);

    match args {
        ["set", url] => {
            let stream = context.streams.resolve(url);
            playback.load_stream(stream, context.client);

            broadcast_status(context, &playback, true);
            Ok(String::new())
        }
        ["play"] => {
            playback.play();
            playback.update_started_by(context.client);

            broadcast_status(context, &playback, false);
            Ok(String::new())
        }
        ["pause"] => {
            playback.pause()?;

            broadcast_status(context, &playback, false);
            Ok(String::new())
        }
        ["stop"] => {
            playback.stop();

            broadcast_status(context, &playback, false);
            Ok(String::new())
        }
        ["skip"] => {
            playback.advance_queue()?;

            broadcast_status(context, &playback, true);
            Ok(String::new())
        }
        _ => Err(CommandError::BadArguments(USAGE)),
    }
}

fn queue(context: &CommandContext, args: &[&str]) -> Result<String, CommandError> {
    match args {
        ["add", url] => {
            let stream = context.streams.resolve(url);
            let playback = context.rooms.get_or_create(&context.client.room);

            playback.push_to_queue(context.client.id, stream);
            broadcast_queue(context, &playback);

            Ok(format!("queued {url}"))
        }
        _ => Err(CommandError::BadArguments("queue add <url>")),
    }
}

/// Emits the room's current status to every member, preceded by a
/// `streamload` when a new stream was just made current.
fn broadcast_status(context: &CommandContext, playback: &Arc<Playback>, loaded: bool) {
    let status = playback.status();
    let id = Some(context.client.id.to_string());

    if loaded {
        match ServerEvent::stream_load(id.clone(), &status) {
            Ok(event) => context.clients.broadcast_all(&context.client.room, &event),
            Err(e) => error!("skipping streamload for room {}: {e}", context.client.room),
        }
    }

    match ServerEvent::stream_sync(id, &status) {
        Ok(event) => context.clients.broadcast_all(&context.client.room, &event),
        Err(e) => error!("skipping streamsync for room {}: {e}", context.client.room),
    }
}

fn broadcast_queue(context: &CommandContext, playback: &Arc<Playback>) {
    let response = crate::events::Response::with_extra(
        Some(context.client.id.to_string()),
        &playback.queue_status(),
    );

    match response {
        Ok(response) => context.clients.broadcast_all(
            &context.client.room,
            &ServerEvent::Queuesync(response.from_system()),
        ),
        Err(e) => error!("skipping queuesync for room {}: {e}", context.client.room),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::Authorizer,
        clients::ClientRegistry,
        commands::CommandDispatcher,
        rooms::{RoomManager, TimerState},
        streams::StreamStore,
    };
    use std::{path::PathBuf, time::Duration};
    use tokio::sync::mpsc;

    struct Fixture {
        clients: Arc<ClientRegistry>,
        rooms: Arc<RoomManager>,
        streams: Arc<StreamStore>,
        dispatcher: CommandDispatcher,
    }

    impl Fixture {
        fn new(authorizer: Option<Arc<Authorizer>>) -> Self {
            let clients = ClientRegistry::new();
            let rooms = RoomManager::new(&clients, Duration::from_secs(300));
            let streams = StreamStore::new(PathBuf::from("./media"));

            Self {
                clients,
                rooms,
                streams,
                dispatcher: CommandDispatcher::new(authorizer),
            }
        }

        fn join(&self, room: &str) -> (Arc<crate::clients::Client>, mpsc::UnboundedReceiver<ServerEvent>) {
            let (sender, receiver) = mpsc::unbounded_channel();
            (self.clients.create(room.to_string(), sender), receiver)
        }

        fn run(
            &self,
            client: &Arc<crate::clients::Client>,
            name: &str,
            args: &[&str],
        ) -> Result<String, CommandError> {
            self.dispatcher.execute(
                name,
                args,
                &CommandContext {
                    client,
                    clients: &self.clients,
                    rooms: &self.rooms,
                    streams: &self.streams,
                },
            )
        }
    }

    #[tokio::test]
    async fn whoami_falls_back_to_the_id() {
        let fixture = Fixture::new(None);
        let (client, _rx) = fixture.join("lobby");

        let result = fixture.run(&client, "whoami", &[]).expect("whoami succeeds");
        assert_eq!(result, client.id.to_string());

        fixture.run(&client, "user", &["alice"]).expect("rename succeeds");

        let result = fixture.run(&client, "whoami", &[]).expect("whoami succeeds");
        assert_eq!(result, "alice");
    }

    #[tokio::test]
    async fn unknown_commands_are_rejected() {
        let fixture = Fixture::new(None);
        let (client, _rx) = fixture.join("lobby");

        assert!(matches!(
            fixture.run(&client, "dance", &[]),
            Err(CommandError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn help_lists_every_command() {
        let fixture = Fixture::new(None);
        let (client, _rx) = fixture.join("lobby");

        let text = fixture.run(&client, "help", &[]).expect("help succeeds");

        for command in all() {
            assert!(
                text.contains(command.name),
                "help mentions {}",
                command.name
            );
        }
    }

    #[tokio::test]
    async fn stream_set_loads_and_announces() {
        let fixture = Fixture::new(None);
        let (client, mut rx) = fixture.join("lobby");

        fixture
            .run(&client, "stream", &["set", "https://youtu.be/ABC"])
            .expect("set succeeds");

        let playback = fixture.rooms.get("lobby").expect("room exists now");
        assert_eq!(playback.stream().unwrap().url, "https://youtu.be/ABC");

        let event = rx.try_recv().expect("an event arrived");
        match event {
            ServerEvent::Streamload(response) => {
                assert_eq!(response.extra["streamUrl"], "https://youtu.be/ABC");
            }
            other => panic!("expected a streamload first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_play_and_pause_drive_the_timer() {
        let fixture = Fixture::new(None);
        let (client, _rx) = fixture.join("lobby");

        fixture.run(&client, "stream", &["set", "a.mp4"]).unwrap();
        fixture.run(&client, "stream", &["play"]).unwrap();

        let playback = fixture.rooms.get("lobby").unwrap();
        assert_eq!(playback.status().playback.state, TimerState::Playing);

        fixture.run(&client, "stream", &["pause"]).unwrap();
        assert_eq!(playback.status().playback.state, TimerState::Paused);

        let error = fixture
            .run(&client, "stream", &["pause"])
            .expect_err("pausing twice fails");
        assert!(matches!(error, CommandError::Timer(_)));
    }

    #[tokio::test]
    async fn skip_on_an_empty_queue_is_user_visible() {
        let fixture = Fixture::new(None);
        let (client, _rx) = fixture.join("lobby");

        let error = fixture
            .run(&client, "stream", &["skip"])
            .expect_err("skipping nothing fails");

        assert!(matches!(error, CommandError::Queue(_)));
        assert!(!error.to_string().is_empty());
    }

    #[tokio::test]
    async fn four_skips_interleave_two_queuers() {
        let fixture = Fixture::new(None);
        let (a, _rx_a) = fixture.join("lobby");
        let (b, _rx_b) = fixture.join("lobby");

        fixture.run(&a, "queue", &["add", "a1.mp4"]).unwrap();
        fixture.run(&a, "queue", &["add", "a2.mp4"]).unwrap();
        fixture.run(&b, "queue", &["add", "b1.mp4"]).unwrap();
        fixture.run(&b, "queue", &["add", "b2.mp4"]).unwrap();

        let playback = fixture.rooms.get("lobby").unwrap();
        let mut order = Vec::new();

        for _ in 0..4 {
            fixture.run(&a, "stream", &["skip"]).expect("skip succeeds");
            order.push(playback.stream().unwrap().url.clone());
        }

        assert_eq!(order, vec!["a1.mp4", "b1.mp4", "a2.mp4", "b2.mp4"]);
    }

    #[tokio::test]
    async fn commands_respect_the_authorizer() {
        let authorizer = Arc::new(Authorizer::new());
        let fixture = Fixture::new(Some(authorizer.clone()));
        let (client, _rx) = fixture.join("lobby");

        let error = fixture
            .run(&client, "stream", &["play"])
            .expect_err("unbound subjects are refused");
        assert!(matches!(error, CommandError::Unauthorized(_)));

        // whoami carries no permission and works regardless.
        fixture.run(&client, "whoami", &[]).expect("whoami is always allowed");

        authorizer.add_binding(
            crate::auth::Role::new("dj", ["stream.control"]),
            client.id,
        );

        fixture.run(&client, "stream", &["play"]).expect("bound subjects succeed");
    }
}
