use std::{fmt::Display, sync::Arc};

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::{Response, ServerEvent};

static CLIENT_COUNTER: AtomicCell<u64> = AtomicCell::new(1);

/// Identifies one connection for its whole lifetime. Doubles as the subject
/// identity for role bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn next() -> Self {
        Self(CLIENT_COUNTER.fetch_add(1))
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type ConnectionSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Default)]
struct Names {
    username: Option<String>,
    previous: Option<String>,
}

/// A connected user. Created on socket connect, destroyed on disconnect.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    /// The room this client lives in, derived from the connection url
    pub room: String,
    names: RwLock<Names>,
    sender: ConnectionSender,
}

impl Client {
    fn new(room: String, sender: ConnectionSender) -> Self {
        Self {
            id: ClientId::next(),
            room,
            names: Default::default(),
            sender,
        }
    }

    pub fn username(&self) -> Option<String> {
        self.names.read().username.clone()
    }

    pub fn previous_username(&self) -> Option<String> {
        self.names.read().previous.clone()
    }

    /// The username when one is set, otherwise the id string.
    pub fn display_name(&self) -> String {
        self.username().unwrap_or_else(|| self.id.to_string())
    }

    /// Queues an event for this client alone. Delivery order matches call
    /// order. A closed connection swallows the event.
    pub fn send(&self, event: ServerEvent) {
        self.sender.send(event).ok();
    }

    /// Emits a chat-shaped message from "system" to this client alone.
    pub fn send_system_message(&self, text: impl Into<String>) {
        self.send(ServerEvent::Chatmessage(
            Response {
                id: Some(self.id.to_string()),
                message: Some(text.into()),
                ..Default::default()
            }
            .from_system(),
        ));
    }

    /// Surfaces an error to this client as an `info_clienterror` event.
    pub fn send_error(&self, error: &dyn Display) {
        self.send(ServerEvent::InfoClienterror(
            Response {
                id: Some(self.id.to_string()),
                message: Some(error.to_string()),
                ..Default::default()
            }
            .from_system(),
        ));
    }

    #[cfg(test)]
    pub fn mock(room: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self::new(room.to_string(), sender)), receiver)
    }

    #[cfg(test)]
    pub fn force_names(&self, username: Option<&str>, previous: Option<&str>) {
        let mut names = self.names.write();
        names.username = username.map(str::to_string);
        names.previous = previous.map(str::to_string);
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no client is registered for connection {0}")]
    NoSuchClient(ClientId),

    #[error("the username {0:?} is already taken in this room")]
    NameTaken(String),

    #[error("usernames cannot be empty")]
    InvalidName,
}

/// Every connected client, indexed by connection id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
}

impl ClientRegistry {
    pub fn new() -> Arc<Self> {
        Default::default()
    }

    pub fn create(&self, room: String, sender: ConnectionSender) -> Arc<Client> {
        let client = Arc::new(Client::new(room, sender));
        self.clients.insert(client.id, client.clone());
        client
    }

    pub fn destroy(&self, id: ClientId) -> Result<(), ClientError> {
        self.clients
            .remove(&id)
            .map(|_| ())
            .ok_or(ClientError::NoSuchClient(id))
    }

    pub fn get(&self, id: ClientId) -> Result<Arc<Client>, ClientError> {
        self.clients
            .get(&id)
            .map(|c| c.clone())
            .ok_or(ClientError::NoSuchClient(id))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn by_room(&self, room: &str) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .filter(|c| c.room == room)
            .map(|c| c.clone())
            .collect()
    }

    /// Applies a username change, enforcing per-room uniqueness. The prior
    /// name, if any, is kept as the client's previous username.
    pub fn update_username(&self, client: &Client, name: &str) -> Result<(), ClientError> {
        let name = name.trim();

        if name.is_empty() {
            return Err(ClientError::InvalidName);
        }

        let taken = self.clients.iter().any(|c| {
            c.id != client.id && c.room == client.room && c.username().as_deref() == Some(name)
        });

        if taken {
            return Err(ClientError::NameTaken(name.to_string()));
        }

        let mut names = client.names.write();
        names.previous = names.username.take();
        names.username = Some(name.to_string());

        Ok(())
    }

    /// Sends an event to every member of the room, the sender included.
    pub fn broadcast_all(&self, room: &str, event: &ServerEvent) {
        for client in self.by_room(room) {
            client.send(event.clone());
        }
    }

    /// Sends an event to every peer of the client in its room.
    pub fn broadcast_from(&self, client: &Client, event: &ServerEvent) {
        for peer in self.by_room(&client.room) {
            if peer.id != client.id {
                peer.send(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_with(room: &str, count: usize) -> (Arc<ClientRegistry>, Vec<Arc<Client>>) {
        let registry = ClientRegistry::new();
        let clients = (0..count)
            .map(|_| {
                let (sender, _receiver) = mpsc::unbounded_channel();
                registry.create(room.to_string(), sender)
            })
            .collect();

        (registry, clients)
    }

    #[test]
    fn usernames_are_unique_per_room() {
        let (registry, clients) = registry_with("lobby", 2);

        registry
            .update_username(&clients[0], "alice")
            .expect("first claim succeeds");

        let error = registry
            .update_username(&clients[1], "alice")
            .expect_err("second claim fails");

        assert!(matches!(error, ClientError::NameTaken(_)));
        assert_eq!(clients[1].username(), None, "loser keeps id-based identity");
    }

    #[test]
    fn same_name_is_fine_across_rooms() {
        let registry = ClientRegistry::new();
        let (sender, _r1) = mpsc::unbounded_channel();
        let a = registry.create("lobby".to_string(), sender);
        let (sender, _r2) = mpsc::unbounded_channel();
        let b = registry.create("den".to_string(), sender);

        registry.update_username(&a, "alice").expect("claim in lobby");
        registry.update_username(&b, "alice").expect("claim in den");
    }

    #[test]
    fn rejects_blank_usernames() {
        let (registry, clients) = registry_with("lobby", 1);

        let error = registry
            .update_username(&clients[0], "   ")
            .expect_err("whitespace names fail");

        assert!(matches!(error, ClientError::InvalidName));
    }

    #[test]
    fn tracks_the_previous_username() {
        let (registry, clients) = registry_with("lobby", 1);

        registry.update_username(&clients[0], "alice").unwrap();
        assert_eq!(clients[0].previous_username(), None);

        registry.update_username(&clients[0], "alicia").unwrap();
        assert_eq!(clients[0].previous_username().as_deref(), Some("alice"));
        assert_eq!(clients[0].username().as_deref(), Some("alicia"));
    }

    #[test]
    fn destroy_removes_the_record() {
        let (registry, clients) = registry_with("lobby", 1);
        let id = clients[0].id;

        registry.destroy(id).expect("destroy succeeds");
        assert!(matches!(registry.get(id), Err(ClientError::NoSuchClient(_))));
        assert!(matches!(registry.destroy(id), Err(ClientError::NoSuchClient(_))));
    }

    #[test]
    fn broadcast_from_skips_the_sender() {
        let registry = ClientRegistry::new();

        let (sender, mut self_rx) = mpsc::unbounded_channel();
        let sender_client = registry.create("lobby".to_string(), sender);

        let (peer_sender, mut peer_rx) = mpsc::unbounded_channel();
        registry.create("lobby".to_string(), peer_sender);

        let event = ServerEvent::InfoClientjoined(Response {
            id: Some(sender_client.id.to_string()),
            ..Default::default()
        });

        registry.broadcast_from(&sender_client, &event);

        assert!(peer_rx.try_recv().is_ok(), "peer receives the event");
        assert!(self_rx.try_recv().is_err(), "sender does not");
    }
}
