//! Event taxonomy, transport envelopes, and socket wire-format messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use super::rooms::Room;

// ---------------------------------------------------------------------------
// Event taxonomy
// ---------------------------------------------------------------------------

/// The closed catalog of realtime events. Each name doubles as its transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "post:new")]
    PostNew,
    #[serde(rename = "post:update")]
    PostUpdate,
    #[serde(rename = "post:destroy")]
    PostDestroy,
    #[serde(rename = "post:hide")]
    PostHide,
    #[serde(rename = "post:unhide")]
    PostUnhide,
    #[serde(rename = "post:save")]
    PostSave,
    #[serde(rename = "post:unsave")]
    PostUnsave,
    #[serde(rename = "comment:new")]
    CommentNew,
    #[serde(rename = "comment:update")]
    CommentUpdate,
    #[serde(rename = "comment:destroy")]
    CommentDestroy,
    #[serde(rename = "like:new")]
    LikeNew,
    #[serde(rename = "like:remove")]
    LikeRemove,
    #[serde(rename = "comment_like:new")]
    CommentLikeNew,
    #[serde(rename = "comment_like:remove")]
    CommentLikeRemove,
    #[serde(rename = "user:update")]
    UserUpdate,
    #[serde(rename = "global:user:update")]
    GlobalUserUpdate,
    #[serde(rename = "group:times:update")]
    GroupTimesUpdate,
    #[serde(rename = "event:new")]
    EventNew,
}

/// How an event is routed and filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Visible wherever the post is visible.
    Post,
    /// A post action only the acting user may observe (hide, save, ...).
    PersonalPost,
    /// Comment traffic on a post; subject to the banned-author policy.
    Comment,
    /// Likes on posts or comments; hidden when the viewer bans the actor.
    Like,
    /// Profile changes, delivered on the user's own room.
    User,
    /// "Something changed, re-fetch" signals without private content.
    Global,
    /// A notification for exactly one recipient.
    Notification,
}

impl EventName {
    pub const ALL: [EventName; 18] = [
        Self::PostNew,
        Self::PostUpdate,
        Self::PostDestroy,
        Self::PostHide,
        Self::PostUnhide,
        Self::PostSave,
        Self::PostUnsave,
        Self::CommentNew,
        Self::CommentUpdate,
        Self::CommentDestroy,
        Self::LikeNew,
        Self::LikeRemove,
        Self::CommentLikeNew,
        Self::CommentLikeRemove,
        Self::UserUpdate,
        Self::GlobalUserUpdate,
        Self::GroupTimesUpdate,
        Self::EventNew,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostNew => "post:new",
            Self::PostUpdate => "post:update",
            Self::PostDestroy => "post:destroy",
            Self::PostHide => "post:hide",
            Self::PostUnhide => "post:unhide",
            Self::PostSave => "post:save",
            Self::PostUnsave => "post:unsave",
            Self::CommentNew => "comment:new",
            Self::CommentUpdate => "comment:update",
            Self::CommentDestroy => "comment:destroy",
            Self::LikeNew => "like:new",
            Self::LikeRemove => "like:remove",
            Self::CommentLikeNew => "comment_like:new",
            Self::CommentLikeRemove => "comment_like:remove",
            Self::UserUpdate => "user:update",
            Self::GlobalUserUpdate => "global:user:update",
            Self::GroupTimesUpdate => "group:times:update",
            Self::EventNew => "event:new",
        }
    }

    /// Transport channel the event is published on.
    pub fn channel(self) -> &'static str {
        self.as_str()
    }

    pub fn class(self) -> EventClass {
        match self {
            Self::PostNew | Self::PostUpdate | Self::PostDestroy => EventClass::Post,
            Self::PostHide | Self::PostUnhide | Self::PostSave | Self::PostUnsave => {
                EventClass::PersonalPost
            }
            Self::CommentNew | Self::CommentUpdate | Self::CommentDestroy => EventClass::Comment,
            Self::LikeNew | Self::LikeRemove | Self::CommentLikeNew | Self::CommentLikeRemove => {
                EventClass::Like
            }
            Self::UserUpdate => EventClass::User,
            Self::GlobalUserUpdate | Self::GroupTimesUpdate => EventClass::Global,
            Self::EventNew => EventClass::Notification,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name {0:?}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventName {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Transport envelope
// ---------------------------------------------------------------------------

/// Ids the read side needs to route and authorize an event without parsing its payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    /// Subject user: the profile owner, the notification recipient, or the user who
    /// hid/saved a post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Feeds the post is (or was) posted to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feed_ids: Vec<String>,
    /// Author of the post, comment or like that triggered the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl TargetRefs {
    pub fn post(post_id: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            ..Self::default()
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_feeds<I, S>(mut self, feed_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feed_ids = feed_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_comment(mut self, comment_id: impl Into<String>) -> Self {
        self.comment_id = Some(comment_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

/// A published event. Immutable once built; the payload is already-serialized JSON
/// that the realtime path never inspects.
#[derive(Debug, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,
    #[serde(default)]
    pub refs: TargetRefs,
    pub payload: Box<RawValue>,
}

impl Event {
    /// Fails only if `payload` is not valid JSON.
    pub fn new(
        name: EventName,
        refs: TargetRefs,
        payload: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name,
            refs,
            payload: RawValue::from_string(payload.into())?,
        })
    }

    /// Rooms whose members are candidates for this event.
    pub fn rooms(&self) -> Vec<Room> {
        let refs = &self.refs;
        let timelines = || refs.feed_ids.iter().map(|id| Room::timeline(id.clone()));
        let post = || refs.post_id.iter().map(|id| Room::post(id.clone()));
        let user = || refs.user_id.iter().map(|id| Room::user(id.clone()));

        match self.name {
            EventName::PostNew => timelines().collect(),
            EventName::PostUpdate | EventName::PostDestroy => timelines().chain(post()).collect(),
            EventName::PostHide
            | EventName::PostUnhide
            | EventName::PostSave
            | EventName::PostUnsave => user().collect(),
            EventName::CommentNew
            | EventName::CommentUpdate
            | EventName::CommentDestroy
            | EventName::LikeNew
            | EventName::LikeRemove
            | EventName::CommentLikeNew
            | EventName::CommentLikeRemove => post().chain(timelines()).collect(),
            EventName::UserUpdate | EventName::EventNew => user().collect(),
            EventName::GlobalUserUpdate | EventName::GroupTimesUpdate => vec![Room::global_users()],
        }
    }

    /// The socket frame for this event, serialized once and shared by every recipient.
    pub fn frame(&self) -> String {
        ServerMessage::Event {
            t: self.name.as_str(),
            d: &*self.payload,
        }
        .to_json()
    }

    /// Frame for a comment whose author the recipient bans, matching the REST
    /// placeholder for hidden comments.
    pub fn hidden_comment_frame(&self) -> String {
        let data = serde_json::json!({
            "comments": {
                "id": self.refs.comment_id,
                "postId": self.refs.post_id,
                "hideType": HIDE_TYPE_BANNED,
                "body": HIDDEN_BANNED_BODY,
                "createdBy": Value::Null,
            }
        });
        serde_json::json!({ "op": "event", "t": self.name.as_str(), "d": data }).to_string()
    }
}

/// `hideType` of a comment hidden because the viewer bans its author.
pub const HIDE_TYPE_BANNED: &str = "HIDDEN_BANNED";
/// Placeholder body shown instead of a banned author's comment.
pub const HIDDEN_BANNED_BODY: &str = "Comment from blocked user";

/// Control channel: ask every broker to re-authorize its sockets.
pub const REAUTHORIZE_CHANNEL: &str = ":reauthorize";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReauthorizeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage<'a> {
    /// Acknowledgement of a client command, echoing its `ref`.
    Reply {
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        reference: Option<u64>,
        d: Value,
    },
    /// A broadcast event.
    Event { t: &'a str, d: &'a RawValue },
    /// First frame on a new socket: connection id and heartbeat interval.
    Hello { d: Value },
}

impl ServerMessage<'_> {
    pub fn reply(reference: Option<u64>, data: Value) -> Self {
        ServerMessage::Reply { reference, d: data }
    }

    pub fn hello(connection_id: &str, heartbeat_interval_ms: u64) -> Self {
        ServerMessage::Hello {
            d: serde_json::json!({
                "connectionId": connection_id,
                "heartbeatInterval": heartbeat_interval_ms,
            }),
        }
    }

    pub fn to_json(&self) -> String {
        // Neither variant contains non-string map keys or failing Serialize impls.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A command received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: String,
    #[serde(default, rename = "ref")]
    pub reference: Option<u64>,
    #[serde(default)]
    pub d: Value,
}

pub const OP_AUTH: &str = "auth";
pub const OP_SUBSCRIBE: &str = "subscribe";
pub const OP_UNSUBSCRIBE: &str = "unsubscribe";
pub const OP_STATUS: &str = "status";
pub const OP_HEARTBEAT: &str = "heartbeat";

// ---------------------------------------------------------------------------
// AUTH payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthPayload {
    #[serde(rename = "authToken")]
    pub auth_token: String,
}

// ---------------------------------------------------------------------------
// SUBSCRIBE / UNSUBSCRIBE payload
// ---------------------------------------------------------------------------

/// Room ids grouped by kind. Unknown kinds are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomsPayload {
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub post: Vec<String>,
    #[serde(default)]
    pub user: Vec<String>,
    #[serde(default)]
    pub global: Vec<String>,
}
