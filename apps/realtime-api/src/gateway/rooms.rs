//! Rooms and the broker-local room → connection index.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::CommandError;

use super::events::RoomsPayload;

/// The only global room: cross-cutting user and group metadata changes.
pub const GLOBAL_USERS: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomKind {
    Timeline,
    Post,
    User,
    Global,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::Post => "post",
            Self::User => "user",
            Self::Global => "global",
        }
    }
}

/// A subscription target, e.g. `timeline:<feed id>` or `global:users`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Room {
    pub kind: RoomKind,
    pub id: String,
}

impl Room {
    pub fn timeline(feed_id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Timeline,
            id: feed_id.into(),
        }
    }

    pub fn post(post_id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Post,
            id: post_id.into(),
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::User,
            id: user_id.into(),
        }
    }

    pub fn global_users() -> Self {
        Self {
            kind: RoomKind::Global,
            id: GLOBAL_USERS.to_string(),
        }
    }

    /// Validate a `subscribe`/`unsubscribe` payload into rooms.
    pub fn from_payload(payload: RoomsPayload) -> Result<Vec<Room>, CommandError> {
        let mut rooms = Vec::new();
        let groups = [
            (RoomKind::Timeline, payload.timeline),
            (RoomKind::Post, payload.post),
            (RoomKind::User, payload.user),
            (RoomKind::Global, payload.global),
        ];
        for (kind, ids) in groups {
            for id in ids {
                if id.is_empty() {
                    return Err(CommandError::InvalidRoom(format!("{}:", kind.as_str())));
                }
                if kind == RoomKind::Global && id != GLOBAL_USERS {
                    return Err(CommandError::InvalidRoom(format!("global:{id}")));
                }
                rooms.push(Room { kind, id });
            }
        }
        Ok(rooms)
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Render rooms as `{ "timeline": [...], "post": [...] }` for command replies.
pub fn rooms_json(rooms: &BTreeSet<Room>) -> Value {
    let mut grouped: BTreeMap<&'static str, Vec<&str>> = BTreeMap::new();
    for room in rooms {
        grouped.entry(room.kind.as_str()).or_default().push(&room.id);
    }
    serde_json::to_value(grouped).unwrap_or_default()
}

/// Room → subscribed connection ids.
///
/// Holds ids only; each connection owns its own room set. Rooms are created on first
/// subscribe and dropped as soon as their last subscriber leaves.
pub struct RoomTable {
    rooms: DashMap<Room, HashSet<String>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add an edge. Returns `false` if it already existed.
    pub fn insert(&self, room: Room, connection_id: &str) -> bool {
        self.rooms
            .entry(room)
            .or_default()
            .insert(connection_id.to_string())
    }

    /// Remove an edge, pruning the room if it became empty.
    pub fn remove(&self, room: &Room, connection_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut subscribers) => subscribers.remove(connection_id),
            None => false,
        };
        self.rooms.remove_if(room, |_, subscribers| subscribers.is_empty());
        removed
    }

    /// Remove a connection from every room it belonged to.
    pub fn remove_all<'a>(&self, rooms: impl IntoIterator<Item = &'a Room>, connection_id: &str) {
        for room in rooms {
            self.remove(room, connection_id);
        }
    }

    pub fn connections_for(&self, room: &Room) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new()
    }
}
