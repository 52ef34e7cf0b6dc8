//! The per-process broker: room membership, connection registry and event dispatch.
//!
//! One broker is built at startup and shared through `AppState`. A single listener task
//! drives [`Broker::dispatch`] in transport order. Each dispatch reserves an outbound
//! slot on every candidate connection before any authorization check starts, so
//! delivery order per connection matches transport order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::auth::tokens::Authenticator;
use crate::db::store::VisibilityStore;
use crate::error::{CommandError, TransportError};

use super::events::{Event, EventClass, ReauthorizeRequest, REAUTHORIZE_CHANNEL};
use super::fanout::{Transport, TransportMessage};
use super::filter::{AuthorizationFilter, Decision};
use super::rooms::{Room, RoomTable};
use super::scope::check_subscribe;
use super::session::Connection;

const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(250);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct Broker {
    rooms: RoomTable,
    connections: DashMap<String, Arc<Connection>>,
    filter: AuthorizationFilter,
    pub(super) auth: Arc<Authenticator>,
    pub(super) timeout: Duration,
}

impl Broker {
    pub fn new(
        store: Arc<dyn VisibilityStore>,
        auth: Arc<Authenticator>,
        timeout: Duration,
    ) -> Self {
        Self {
            rooms: RoomTable::new(),
            connections: DashMap::new(),
            filter: AuthorizationFilter::new(store, timeout),
            auth,
            timeout,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    // -- connections ----------------------------------------------------------

    pub fn register(&self, conn: Arc<Connection>) {
        tracing::debug!(connection_id = %conn.id, "connection registered");
        self.connections.insert(conn.id.clone(), conn);
    }

    /// Release every room the connection held and forget it. Idempotent.
    pub fn disconnect(&self, conn: &Connection) {
        let rooms = conn.close();
        self.rooms.remove_all(&rooms, &conn.id);
        self.connections.remove(&conn.id);
        tracing::debug!(
            connection_id = %conn.id,
            released = rooms.len(),
            "connection released"
        );
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub(super) fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    // -- rooms ----------------------------------------------------------------

    /// Join every room or none: all rooms are checked before any edge is added.
    pub fn subscribe(&self, conn: &Connection, rooms: &[Room]) -> Result<(), CommandError> {
        if conn.is_closed() {
            return Ok(());
        }
        let principal = conn.principal();
        for room in rooms {
            check_subscribe(&principal, room)?;
        }
        for room in rooms {
            if conn.add_room(room.clone()) {
                self.rooms.insert(room.clone(), &conn.id);
            }
        }
        Ok(())
    }

    pub fn unsubscribe(&self, conn: &Connection, rooms: &[Room]) {
        for room in rooms {
            if conn.remove_room(room) {
                self.rooms.remove(room, &conn.id);
            }
        }
    }

    pub fn subscribers(&self, room: &Room) -> Vec<String> {
        self.rooms.connections_for(room)
    }

    // -- dispatch -------------------------------------------------------------

    /// Route one transport message. Never blocks on authorization checks.
    pub fn dispatch(&self, message: &TransportMessage) {
        if message.channel == REAUTHORIZE_CHANNEL {
            self.dispatch_reauthorize(&message.body);
            return;
        }

        let event = match serde_json::from_str::<Event>(&message.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(channel = %message.channel, error = %e, "dropping malformed event");
                return;
            }
        };
        if event.name.channel() != message.channel {
            tracing::warn!(
                channel = %message.channel,
                event = %event.name,
                "event arrived on the wrong channel, dropping"
            );
            return;
        }

        let candidates = self.candidates(&event);
        if candidates.is_empty() {
            return;
        }

        let frame: Arc<str> = Arc::from(event.frame());
        let hidden: Option<Arc<str>> = (event.name.class() == EventClass::Comment)
            .then(|| Arc::from(event.hidden_comment_frame()));
        let event = Arc::new(event);

        tracing::trace!(event = %event.name, candidates = candidates.len(), "dispatching");

        for conn in candidates {
            // Reserved here, in transport order; resolved whenever the check finishes.
            let Some(slot) = conn.reserve_slot() else {
                continue;
            };
            let filter = self.filter.clone();
            let event = event.clone();
            let frame = frame.clone();
            let hidden = hidden.clone();
            tokio::spawn(async move {
                let principal = conn.principal();
                let result = match filter.decide(&event, &principal).await {
                    Decision::Allow => Some(frame),
                    Decision::AllowRedacted => hidden,
                    Decision::Deny => None,
                };
                // The receiver is gone only if the socket closed meanwhile.
                let _ = slot.send(result);
            });
        }
    }

    /// Members of every room the event targets, each connection once.
    fn candidates(&self, event: &Event) -> Vec<Arc<Connection>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for room in event.rooms() {
            for id in self.rooms.connections_for(&room) {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(conn) = self.connections.get(&id) {
                    candidates.push(conn.value().clone());
                }
            }
        }
        candidates
    }

    fn dispatch_reauthorize(&self, body: &str) {
        let request = match serde_json::from_str::<ReauthorizeRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed reauthorize request");
                return;
            }
        };
        let connections = self.snapshot();
        let auth = self.auth.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            super::reauth::reauthorize(
                &connections,
                &auth,
                timeout,
                request.user_id.as_deref(),
            )
            .await;
        });
    }

    // -- transport listener ---------------------------------------------------

    /// Subscribe to the transport and spawn the dispatch loop. The first subscription
    /// happens before this returns, so nothing published afterwards is missed.
    pub async fn listen(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
    ) -> Result<JoinHandle<()>, TransportError> {
        let messages = transport.subscribe().await?;
        let broker = self.clone();
        Ok(tokio::spawn(async move {
            broker.run(transport, messages).await;
        }))
    }

    async fn run(
        &self,
        transport: Arc<dyn Transport>,
        mut messages: BoxStream<'static, TransportMessage>,
    ) {
        loop {
            while let Some(message) = messages.next().await {
                self.dispatch(&message);
            }
            tracing::warn!("transport stream ended, resubscribing");

            let mut backoff = RECONNECT_BACKOFF_MIN;
            messages = loop {
                tokio::time::sleep(backoff).await;
                match transport.subscribe().await {
                    Ok(messages) => {
                        tracing::info!("transport resubscribed");
                        break messages;
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "transport resubscribe failed"
                        );
                        backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                    }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::Principal;
    use crate::db::memory::MemoryStore;
    use crate::gateway::events::{EventName, TargetRefs};
    use crate::gateway::session::next_frame;

    fn broker(store: Arc<MemoryStore>) -> Broker {
        let auth = Arc::new(Authenticator::new("secret", store.clone()));
        Broker::new(store, auth, Duration::from_millis(200))
    }

    fn message(name: EventName, refs: TargetRefs, payload: &str) -> TransportMessage {
        let event = Event::new(name, refs, payload).unwrap();
        TransportMessage {
            channel: name.channel().to_string(),
            body: serde_json::to_string(&event).unwrap(),
        }
    }

    #[test]
    fn subscribe_is_all_or_nothing() {
        let broker = broker(Arc::new(MemoryStore::new()));
        let (conn, _rx) = Connection::new(None, None);
        conn.set_principal(Principal::session("luna"));
        broker.register(conn.clone());

        let err = broker
            .subscribe(&conn, &[Room::post("p1"), Room::user("mars")])
            .unwrap_err();
        assert_eq!(err, CommandError::Forbidden);
        assert!(conn.rooms().is_empty());
        assert_eq!(broker.room_count(), 0);
    }

    #[test]
    fn disconnect_releases_rooms() {
        let broker = broker(Arc::new(MemoryStore::new()));
        let (conn, _rx) = Connection::new(None, None);
        broker.register(conn.clone());
        broker
            .subscribe(&conn, &[Room::post("p1"), Room::global_users()])
            .unwrap();
        assert_eq!(broker.room_count(), 2);

        broker.disconnect(&conn);
        assert_eq!(broker.room_count(), 0);
        assert_eq!(broker.connection_count(), 0);
        assert!(broker.subscribers(&Room::post("p1")).is_empty());
    }

    #[tokio::test]
    async fn connection_in_two_target_rooms_gets_one_frame() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("venus");
        store.add_feed("venus:posts", "venus", "Posts");
        store.add_post("p1", "venus", &["venus:posts"]);
        let broker = broker(store);

        let (conn, mut rx) = Connection::new(None, None);
        broker.register(conn.clone());
        broker
            .subscribe(&conn, &[Room::post("p1"), Room::timeline("venus:posts")])
            .unwrap();

        broker.dispatch(&message(
            EventName::CommentNew,
            TargetRefs::post("p1").with_feeds(["venus:posts"]),
            r#"{"n":1}"#,
        ));
        broker.dispatch(&message(
            EventName::CommentNew,
            TargetRefs::post("p1").with_feeds(["venus:posts"]),
            r#"{"n":2}"#,
        ));

        let first = next_frame(&mut rx).await.unwrap().unwrap();
        let second = next_frame(&mut rx).await.unwrap().unwrap();
        assert!(first.contains(r#"{"n":1}"#));
        assert!(second.contains(r#"{"n":2}"#));
    }

    #[tokio::test]
    async fn mismatched_channel_is_dropped() {
        let broker = broker(Arc::new(MemoryStore::new()));
        let (conn, mut rx) = Connection::new(None, None);
        broker.register(conn.clone());
        broker.subscribe(&conn, &[Room::global_users()]).unwrap();

        let mut msg = message(EventName::GlobalUserUpdate, TargetRefs::user("u"), "{}");
        msg.channel = "post:new".into();
        broker.dispatch(&msg);
        broker.dispatch(&message(EventName::GlobalUserUpdate, TargetRefs::user("u"), "{}"));

        // Only the well-formed event reserved a slot.
        let frame = next_frame(&mut rx).await.unwrap().unwrap();
        assert!(frame.contains("global:user:update"));
        assert!(rx.try_recv().is_err());
    }
}
