#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use realtime_api::auth::principal::{Scope, ScopeSet};
use realtime_api::auth::restrictions::Restrictions;
use realtime_api::auth::tokens::{sign, Claims};
use realtime_api::config::Config;
use realtime_api::db::memory::MemoryStore;
use realtime_api::db::store::AppTokenRecord;
use realtime_api::gateway::events::{EventName, TargetRefs};
use realtime_api::gateway::fanout::LocalTransport;
use realtime_api::AppState;

pub const SECRET: &str = "realtime-test-secret";

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A running server on 127.0.0.1 backed by an in-memory store and the local transport.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Config::for_local(SECRET)).await
    }

    pub async fn start_with(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(LocalTransport::new());
        let (state, _listener) =
            AppState::start(config, store.clone(), store.clone(), transport)
                .await
                .expect("start broker");

        let app = realtime_api::app(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { addr, state, store }
    }

    pub async fn connect(&self) -> Client {
        Client::connect(self.addr).await
    }

    /// Connect and authenticate with a session token for `user_id`.
    pub async fn connect_as(&self, user_id: &str) -> Client {
        let mut client = self.connect().await;
        let reply = client
            .command("auth", serde_json::json!({ "authToken": session_token(user_id) }))
            .await;
        assert_eq!(reply["success"], true, "auth failed: {reply}");
        client
    }

    pub async fn publish(&self, name: EventName, refs: TargetRefs, payload: Value) {
        self.state
            .publisher
            .publish(name, refs, payload.to_string())
            .await;
    }

    /// Three users, each with a `Posts` and a `Directs` feed named `<user>:posts` and
    /// `<user>:directs`.
    pub fn seed_users(&self) {
        for user in ["luna", "mars", "venus"] {
            self.store.add_user(user);
            self.store.add_feed(&format!("{user}:posts"), user, "Posts");
            self.store.add_feed(&format!("{user}:directs"), user, "Directs");
        }
    }

    pub fn put_app_token(&self, token_id: &str, user_id: &str, scopes: &[Scope]) {
        self.put_restricted_app_token(token_id, user_id, scopes, &[]);
    }

    /// Issue 1 of an active app token usable only from `netmasks`.
    pub fn put_restricted_app_token(
        &self,
        token_id: &str,
        user_id: &str,
        scopes: &[Scope],
        netmasks: &[&str],
    ) {
        self.store.put_app_token(AppTokenRecord {
            id: token_id.to_string(),
            user_id: user_id.to_string(),
            issue: 1,
            is_active: true,
            scopes: ScopeSet::new(scopes.iter().copied()),
            restrictions: Restrictions::parse(netmasks, &[]),
        });
    }
}

pub fn session_token(user_id: &str) -> String {
    sign(
        &Claims::Session {
            user_id: user_id.to_string(),
        },
        SECRET,
    )
    .expect("sign session token")
}

pub fn app_token(token_id: &str, issue: i32, user_id: &str) -> String {
    sign(
        &Claims::AppToken {
            token_id: token_id.to_string(),
            issue,
            user_id: user_id.to_string(),
        },
        SECRET,
    )
    .expect("sign app token")
}

/// A socket client that separates command replies from pushed events.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_ref: u64,
    events: VecDeque<Value>,
    pub hello: Value,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{addr}/socket");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");
        let mut client = Self {
            ws,
            next_ref: 1,
            events: VecDeque::new(),
            hello: Value::Null,
        };
        let hello = client.read_frame().await;
        assert_eq!(hello["op"], "hello");
        client.hello = hello;
        client
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("ws send");
    }

    /// Send a command and wait for its reply's `d`. Events read meanwhile are kept.
    pub async fn command(&mut self, op: &str, d: Value) -> Value {
        let reference = self.next_ref;
        self.next_ref += 1;
        let frame = serde_json::json!({ "op": op, "ref": reference, "d": d });
        self.send_raw(&frame.to_string()).await;
        self.reply_for(Some(reference)).await
    }

    /// Wait for the reply with the given `ref`.
    pub async fn reply_for(&mut self, reference: Option<u64>) -> Value {
        loop {
            let frame = self.read_frame().await;
            match frame["op"].as_str() {
                Some("reply") if frame["ref"].as_u64() == reference => return frame["d"].clone(),
                Some("event") => self.events.push_back(frame),
                _ => panic!("unexpected frame: {frame}"),
            }
        }
    }

    pub async fn subscribe(&mut self, rooms: Value) -> Value {
        let reply = self.command("subscribe", rooms).await;
        assert_eq!(reply["success"], true, "subscribe failed: {reply}");
        reply
    }

    /// Next pushed event as `(t, d)`.
    pub async fn next_event(&mut self) -> (String, Value) {
        let frame = match self.events.pop_front() {
            Some(frame) => frame,
            None => loop {
                let frame = self.read_frame().await;
                if frame["op"] == "event" {
                    break frame;
                }
                panic!("unexpected frame while waiting for event: {frame}");
            },
        };
        let name = frame["t"].as_str().expect("event name").to_string();
        (name, frame["d"].clone())
    }

    pub async fn read_frame(&mut self) -> Value {
        loop {
            let msg = time::timeout(READ_TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for frame")
                .expect("stream ended")
                .expect("ws read error");
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).expect("parse frame"),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    /// Read until the server closes the socket; returns the close code.
    pub async fn closed_with(&mut self) -> Option<u16> {
        loop {
            let msg = time::timeout(READ_TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for close");
            match msg {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }
}
