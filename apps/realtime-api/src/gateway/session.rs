//! Per-connection state: principal, owned rooms, and the ordered outbound queue.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_common::id::{prefix, prefixed_ulid};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use crate::auth::principal::Principal;

use super::rooms::Room;

/// Frames buffered per connection before new events are dropped for it.
pub const OUTBOUND_CAPACITY: usize = 1024;

/// A decided frame, or `None` when the recipient was filtered out.
pub type SlotResult = Option<Arc<str>>;

/// An entry in a connection's outbound queue.
///
/// Pending slots are queued in transport order when an event arrives and resolved
/// later by its authorization check, so the writer drains frames in arrival order no
/// matter which checks finish first.
#[derive(Debug)]
pub enum Outbound {
    Frame(Arc<str>),
    Pending(oneshot::Receiver<SlotResult>),
}

/// State for a single realtime socket.
pub struct Connection {
    /// Unique connection identifier (`sck_` prefixed ULID).
    pub id: String,
    /// Peer address, used for app-token netmask restrictions.
    pub remote_addr: Option<IpAddr>,
    /// `Origin` header presented on upgrade.
    pub origin: Option<String>,
    principal: RwLock<Principal>,
    rooms: Mutex<BTreeSet<Room>>,
    outbound: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl Connection {
    /// Create an anonymous connection and the receiving half of its outbound queue.
    pub fn new(
        remote_addr: Option<IpAddr>,
        origin: Option<String>,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let conn = Self {
            id: prefixed_ulid(prefix::CONNECTION),
            remote_addr,
            origin,
            principal: RwLock::new(Principal::Anonymous),
            rooms: Mutex::new(BTreeSet::new()),
            outbound,
            closed: AtomicBool::new(false),
        };
        (Arc::new(conn), rx)
    }

    /// Snapshot of the current principal.
    pub fn principal(&self) -> Principal {
        self.principal.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.principal.read().user_id().map(str::to_string)
    }

    pub fn set_principal(&self, principal: Principal) {
        *self.principal.write() = principal;
    }

    /// Demote to anonymous, but only if the principal is still `expected`; a concurrent
    /// `auth` that already replaced it wins.
    pub fn demote_if(&self, expected: &Principal) -> bool {
        let mut current = self.principal.write();
        if *current == *expected && !current.is_anonymous() {
            *current = Principal::Anonymous;
            true
        } else {
            false
        }
    }

    pub fn rooms(&self) -> BTreeSet<Room> {
        self.rooms.lock().clone()
    }

    pub fn in_room(&self, room: &Room) -> bool {
        self.rooms.lock().contains(room)
    }

    pub(crate) fn add_room(&self, room: Room) -> bool {
        self.rooms.lock().insert(room)
    }

    pub(crate) fn remove_room(&self, room: &Room) -> bool {
        self.rooms.lock().remove(room)
    }

    /// Mark closed and hand back every room for release.
    pub(crate) fn close(&self) -> BTreeSet<Room> {
        self.closed.store(true, Ordering::SeqCst);
        std::mem::take(&mut *self.rooms.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue a ready frame (command replies). Returns `false` if it was dropped.
    pub fn send_frame(&self, frame: Arc<str>) -> bool {
        self.push(Outbound::Frame(frame))
    }

    /// Reserve the next position in the outbound queue for a frame that is still being
    /// authorized. `None` if the connection is closed or its queue is full.
    pub fn reserve_slot(&self) -> Option<oneshot::Sender<SlotResult>> {
        let (tx, rx) = oneshot::channel();
        self.push(Outbound::Pending(rx)).then_some(tx)
    }

    fn push(&self, item: Outbound) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbound.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Resolve the next outbound entry to a frame, waiting for its check if needed.
pub async fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Option<SlotResult> {
    let item = rx.recv().await?;
    Some(match item {
        Outbound::Frame(frame) => Some(frame),
        // A dropped sender means the check was abandoned: deliver nothing.
        Outbound::Pending(slot) => slot.await.unwrap_or(None),
    })
}
