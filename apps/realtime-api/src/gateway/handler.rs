//! Client command dispatch: auth, subscribe, unsubscribe, status, heartbeat.

use serde_json::{Map, Value};

use crate::error::CommandError;
use crate::AppState;

use super::events::{
    AuthPayload, ClientMessage, RoomsPayload, ServerMessage, OP_AUTH, OP_HEARTBEAT, OP_STATUS,
    OP_SUBSCRIBE, OP_UNSUBSCRIBE,
};
use super::rooms::{rooms_json, Room, RoomKind};
use super::session::Connection;

/// Run one command and render its reply frame. Failures become
/// `{ "success": false, "message": ... }`; the connection stays open.
pub async fn handle_command(
    state: &AppState,
    conn: &Connection,
    msg: ClientMessage,
) -> String {
    let result = match msg.op.as_str() {
        OP_AUTH => handle_auth(state, conn, msg.d).await,
        OP_SUBSCRIBE => handle_subscribe(state, conn, msg.d),
        OP_UNSUBSCRIBE => handle_unsubscribe(state, conn, msg.d),
        OP_STATUS => Ok(status(state, conn)),
        OP_HEARTBEAT => Ok(Map::new()),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    };
    render_reply(msg.reference, result)
}

pub fn render_reply(
    reference: Option<u64>,
    result: Result<Map<String, Value>, CommandError>,
) -> String {
    let data = match result {
        Ok(mut data) => {
            data.insert("success".into(), Value::Bool(true));
            Value::Object(data)
        }
        Err(err) => serde_json::json!({ "success": false, "message": err.to_string() }),
    };
    ServerMessage::reply(reference, data).to_json()
}

async fn handle_auth(
    state: &AppState,
    conn: &Connection,
    data: Value,
) -> Result<Map<String, Value>, CommandError> {
    let payload: AuthPayload =
        serde_json::from_value(data).map_err(|e| CommandError::Malformed(e.to_string()))?;

    let authenticate = state.broker.authenticator().authenticate(
        &payload.auth_token,
        conn.remote_addr,
        conn.origin.as_deref(),
    );
    // On any failure the previous principal stays in place.
    let principal = tokio::time::timeout(state.config.authz_timeout, authenticate)
        .await
        .map_err(|_| CommandError::Timeout)??;

    tracing::info!(
        connection_id = %conn.id,
        user_id = principal.user_id().unwrap_or_default(),
        principal = principal.kind(),
        "socket authenticated"
    );
    let mut reply = Map::new();
    reply.insert("userId".into(), principal.user_id().into());
    conn.set_principal(principal);
    Ok(reply)
}

fn handle_subscribe(
    state: &AppState,
    conn: &Connection,
    data: Value,
) -> Result<Map<String, Value>, CommandError> {
    let rooms = parse_rooms(data)?;
    state.broker.subscribe(conn, &rooms)?;
    tracing::debug!(connection_id = %conn.id, rooms = rooms.len(), "subscribed");
    Ok(rooms_reply(conn))
}

fn handle_unsubscribe(
    state: &AppState,
    conn: &Connection,
    data: Value,
) -> Result<Map<String, Value>, CommandError> {
    let rooms = parse_rooms(data)?;
    state.broker.unsubscribe(conn, &rooms);
    Ok(rooms_reply(conn))
}

fn status(state: &AppState, conn: &Connection) -> Map<String, Value> {
    let mut reply = rooms_reply(conn);
    reply.insert("userId".into(), conn.user_id().into());
    reply.insert("apiVersion".into(), state.config.api_version.into());
    reply
}

fn rooms_reply(conn: &Connection) -> Map<String, Value> {
    let mut reply = Map::new();
    reply.insert("rooms".into(), rooms_json(&conn.rooms()));
    reply
}

fn parse_rooms(data: Value) -> Result<Vec<Room>, CommandError> {
    if let Value::Object(fields) = &data {
        let known = [RoomKind::Timeline, RoomKind::Post, RoomKind::User, RoomKind::Global];
        if let Some(kind) = fields
            .keys()
            .find(|key| !known.iter().any(|kind| kind.as_str() == key.as_str()))
        {
            return Err(CommandError::UnknownRoomKind(kind.clone()));
        }
    }
    let payload: RoomsPayload =
        serde_json::from_value(data).map_err(|e| CommandError::Malformed(e.to_string()))?;
    Room::from_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_room_kind_is_named() {
        let err = parse_rooms(serde_json::json!({ "post": ["p1"], "channel": ["c"] })).unwrap_err();
        assert_eq!(err, CommandError::UnknownRoomKind("channel".into()));
    }

    #[test]
    fn rooms_parse_by_kind() {
        let rooms = parse_rooms(serde_json::json!({ "timeline": ["f1"], "user": ["luna"] })).unwrap();
        assert_eq!(rooms, vec![Room::timeline("f1"), Room::user("luna")]);
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert!(matches!(
            parse_rooms(serde_json::json!(["post"])),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn failure_reply_shape() {
        let reply = render_reply(Some(3), Err(CommandError::InsufficientScope));
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["op"], "reply");
        assert_eq!(v["ref"], 3);
        assert_eq!(v["d"], serde_json::json!({ "success": false, "message": "Insufficient scope" }));
    }

    #[test]
    fn success_reply_carries_data() {
        let mut data = Map::new();
        data.insert("userId".into(), "luna".into());
        let v: Value = serde_json::from_str(&render_reply(None, Ok(data))).unwrap();
        assert_eq!(v["d"], serde_json::json!({ "success": true, "userId": "luna" }));
        assert!(v.get("ref").is_none());
    }
}
