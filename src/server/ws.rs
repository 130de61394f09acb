use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use super::ServerContext;
use crate::{
    clients::Client,
    commands::{self, CommandContext, CommandError},
    events::{Incoming, Response, ServerEvent, UserList, UserListEntry},
    rooms::{Playback, StackStatus},
    util,
};

/// Upgrades `/v/:room` connections into room membership. The room name is
/// the path segment; a blank name is refused before the upgrade.
pub async fn gateway(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(context): State<ServerContext>,
) -> HttpResponse {
    let room = room.trim().to_string();

    if room.is_empty() {
        return (StatusCode::BAD_REQUEST, "a room name is required").into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, room, context))
}

async fn handle_connection(socket: WebSocket, room: String, context: ServerContext) {
    let (mut outgoing, mut incoming) = socket.split();
    let (sender, mut queued) = mpsc::unbounded_channel::<ServerEvent>();

    // Drains this client's outbound queue in order.
    let writer = tokio::spawn(async move {
        while let Some(event) = queued.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("skipping an unserializable event: {e}");
                    continue;
                }
            };

            if outgoing.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let client = context.clients.create(room, sender);

    info!(
        "client {} has connected; {} clients registered",
        client.id,
        context.clients.len()
    );

    register_client(&context, &client);

    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(&context, &client, &text),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    handle_disconnect(&context, &client);
    writer.abort();
}

/// Announces the new member and attaches them to the room's playback,
/// creating it on first join. A room that is already mid-stream replays a
/// `streamload` to the newcomer so they catch up immediately.
fn register_client(context: &ServerContext, client: &Arc<Client>) {
    context.clients.broadcast_from(
        client,
        &ServerEvent::InfoClientjoined(Response {
            id: Some(client.id.to_string()),
            ..Default::default()
        }),
    );

    let playback = context.rooms.get_or_create(&client.room);
    playback.touch();

    if playback.stream().is_some() {
        match ServerEvent::stream_load(Some(client.id.to_string()), &playback.status()) {
            Ok(event) => client.send(event),
            Err(e) => error!("skipping streamload replay for client {}: {e}", client.id),
        }
    }
}

fn handle_disconnect(context: &ServerContext, client: &Arc<Client>) {
    info!("client {} has disconnected", client.id);

    context.clients.broadcast_from(
        client,
        &ServerEvent::InfoClientleft(Response {
            id: Some(client.id.to_string()),
            from: Some(client.display_name()),
            ..Default::default()
        }),
    );

    let authorizer = context.dispatcher.authorizer().map(|a| a.as_ref());

    match context.rooms.get(&client.room) {
        Ok(playback) => playback.handle_disconnection(client.id, authorizer),
        // The room may already be reaped; binding hygiene still applies.
        Err(_) => {
            if let Some(authorizer) = authorizer {
                authorizer.remove_subject(client.id);
            }
        }
    }

    if let Err(e) = context.clients.destroy(client.id) {
        warn!("could not deregister client: {e}");
    }
}

fn handle_frame(context: &ServerContext, client: &Arc<Client>, raw: &str) {
    let incoming: Incoming = match serde_json::from_str(raw) {
        Ok(incoming) => incoming,
        Err(e) => {
            // Possibly malicious; drop it without a reply.
            warn!("client {} sent an unparseable frame: {e}", client.id);
            return;
        }
    };

    match incoming {
        Incoming::RequestUpdateusername { user } => on_update_username(context, client, &user),
        Incoming::RequestChatmessage { user, message } => {
            on_chat_message(context, client, user, message)
        }
        Incoming::RequestAuthorization => on_authorization(client),
        Incoming::RequestQueuesync => on_queue_sync(context, client),
        Incoming::RequestStacksync => on_stack_sync(context, client),
        Incoming::RequestStreamsync => on_stream_sync(context, client),
        Incoming::RequestUserlist => on_user_list(context, client),
        Incoming::Streamdata(data) => on_stream_data(context, client, data),
    }
}

fn on_update_username(context: &ServerContext, client: &Arc<Client>, name: &str) {
    if let Err(e) = context.clients.update_username(client, name) {
        warn!("client {} could not claim username {name:?}: {e}", client.id);
        client.send_error(&e);
        return;
    }

    info!("client {} is now known as {name:?}", client.id);

    if let Ok(playback) = context.rooms.get(&client.room) {
        if let Err(e) = playback.refresh_info_from_client(client) {
            error!("could not refresh playback attribution: {e}");
        }
    }
}

fn on_chat_message(
    context: &ServerContext,
    client: &Arc<Client>,
    user: Option<String>,
    message: String,
) {
    if let Some(user) = user {
        info!("client {} ({user}) requested a chat broadcast", client.id);
    }

    if let Some((name, args)) = commands::parse(&message) {
        run_command(context, client, name, &args);
        return;
    }

    let (text, images) = util::extract_images(&message);

    let mut response = Response {
        id: Some(client.id.to_string()),
        from: Some(client.display_name()),
        message: Some(text),
        ..Default::default()
    };

    if !images.is_empty() {
        response.extra.insert("images".to_string(), images.into());
    }

    context
        .clients
        .broadcast_all(&client.room, &ServerEvent::Chatmessage(response));
}

fn run_command(context: &ServerContext, client: &Arc<Client>, name: &str, args: &[&str]) {
    let command_context = CommandContext {
        client,
        clients: &context.clients,
        rooms: &context.rooms,
        streams: &context.streams,
    };

    match context.dispatcher.execute(name, args, &command_context) {
        Ok(result) if !result.is_empty() => client.send_system_message(result),
        Ok(_) => {}
        Err(e) => {
            warn!("client {} command /{name} failed: {e}", client.id);

            match &e {
                // Lookup and validation failures surface as client errors;
                // dispatch failures read better as chat.
                CommandError::Client(_) | CommandError::Queue(_) | CommandError::Room(_) => {
                    client.send_error(&e)
                }
                _ => client.send_system_message(e.to_string()),
            }
        }
    }
}

fn on_authorization(client: &Arc<Client>) {
    let mut response = Response {
        id: Some(client.id.to_string()),
        ..Default::default()
    }
    .from_system();

    response.extra.insert("kind".to_string(), "init".into());
    response
        .extra
        .insert("endpoint".to_string(), "/v1/authorize".into());

    client.send(ServerEvent::Httprequest(response));
}

fn on_queue_sync(context: &ServerContext, client: &Arc<Client>) {
    let Some(playback) = room_playback(context, client) else {
        return;
    };

    match Response::with_extra(Some(client.id.to_string()), &playback.queue_status()) {
        Ok(response) => client.send(ServerEvent::Queuesync(response.from_system())),
        Err(e) => error!("skipping queuesync for client {}: {e}", client.id),
    }
}

fn on_stack_sync(context: &ServerContext, client: &Arc<Client>) {
    let Some(playback) = room_playback(context, client) else {
        return;
    };

    // A user who never queued anything gets an empty stack view.
    let status = playback
        .stack_status(client.id)
        .unwrap_or_else(|_| StackStatus::empty(client.id));

    match Response::with_extra(Some(client.id.to_string()), &status) {
        Ok(response) => client.send(ServerEvent::Stacksync(response.from_system())),
        Err(e) => error!("skipping stacksync for client {}: {e}", client.id),
    }
}

fn on_stream_sync(context: &ServerContext, client: &Arc<Client>) {
    let Some(playback) = room_playback(context, client) else {
        return;
    };

    match ServerEvent::stream_sync(Some(client.id.to_string()), &playback.status()) {
        Ok(event) => client.send(event),
        Err(e) => error!("skipping streamsync for client {}: {e}", client.id),
    }
}

fn on_user_list(context: &ServerContext, client: &Arc<Client>) {
    let bindings = context
        .dispatcher
        .authorizer()
        .map(|a| a.bindings())
        .unwrap_or_default();

    let clients = context
        .clients
        .by_room(&client.room)
        .into_iter()
        .map(|member| {
            let roles = bindings
                .iter()
                .filter(|b| b.subjects().any(|s| s == member.id))
                .map(|b| b.role().name().to_string())
                .collect();

            UserListEntry {
                username: member.username().unwrap_or_default(),
                id: member.id.to_string(),
                room: member.room.clone(),
                roles,
            }
        })
        .collect();

    client.send(ServerEvent::Userlist(UserList { clients }));
}

fn on_stream_data(context: &ServerContext, client: &Arc<Client>, data: Value) {
    let Some(playback) = room_playback(context, client) else {
        return;
    };

    let Some(stream) = playback.stream() else {
        warn!(
            "client {} sent streamdata but no stream is loaded in room {}",
            client.id, client.room
        );
        return;
    };

    info!("client {} updated stream info for {}", client.id, stream.url);
    stream.set_info(data);
}

/// Resolves the playback of the client's room, surfacing the lookup failure
/// to the client. Rooms are created on join, so a miss here means the room
/// was reaped out from under the request.
fn room_playback(context: &ServerContext, client: &Arc<Client>) -> Option<Arc<Playback>> {
    match context.rooms.get(&client.room) {
        Ok(playback) => Some(playback),
        Err(e) => {
            warn!("client {} has no playback: {e}", client.id);
            client.send_error(&e);
            None
        }
    }
}
