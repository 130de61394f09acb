use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rooms::StatusRecord;

/// A frame received from a client.
///
/// Every known event is an explicit variant; anything else fails to parse and
/// is dropped at the gateway.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Incoming {
    RequestUpdateusername {
        user: String,
    },
    RequestChatmessage {
        #[serde(default)]
        user: Option<String>,
        message: String,
    },
    RequestAuthorization,
    RequestQueuesync,
    RequestStacksync,
    RequestStreamsync,
    RequestUserlist,
    Streamdata(Value),
}

/// A frame sent to one or more clients. The variant name is the event name
/// on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    InfoClientjoined(Response),
    InfoClientleft(Response),
    InfoClienterror(Response),
    Chatmessage(Response),
    Streamload(Response),
    Streamsync(Response),
    Queuesync(Response),
    Stacksync(Response),
    Userlist(UserList),
    Httprequest(Response),
}

/// The common payload shape of most outgoing events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Response {
    /// A payload carrying a serialized record in `extra`, attributed to a
    /// client id when one applies.
    pub fn with_extra<T>(id: Option<String>, record: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self {
            id,
            extra: crate::util::extra_from(record)?,
            ..Default::default()
        })
    }

    pub fn from_system(mut self) -> Self {
        self.from = Some("system".to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserList {
    pub clients: Vec<UserListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserListEntry {
    pub username: String,
    pub id: String,
    pub room: String,
    pub roles: Vec<String>,
}

impl ServerEvent {
    /// A playback status event. `streamload` announces a newly set stream,
    /// `streamsync` reconciles members to the current timeline.
    pub fn stream_load(id: Option<String>, status: &StatusRecord) -> Result<Self, serde_json::Error> {
        Ok(Self::Streamload(Response::with_extra(id, status)?.from_system()))
    }

    pub fn stream_sync(id: Option<String>, status: &StatusRecord) -> Result<Self, serde_json::Error> {
        Ok(Self::Streamsync(Response::with_extra(id, status)?))
    }
}
