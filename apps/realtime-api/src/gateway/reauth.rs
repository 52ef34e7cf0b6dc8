//! Eager demotion of sockets whose credentials stopped being valid.
//!
//! Delivery is filtered against the current principal anyway; this pass only makes
//! sure a revoked or superseded token stops acting as its user without waiting for a
//! reconnect. Room membership is left alone.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::tokens::Authenticator;

use super::broker::Broker;
use super::session::Connection;

impl Broker {
    /// Re-check every authenticated socket, or only those of `affected_user_id`.
    /// Returns the number of sockets demoted to anonymous. Idempotent.
    pub async fn reauthorize_sockets(&self, affected_user_id: Option<&str>) -> usize {
        let connections = self.snapshot();
        reauthorize(&connections, &self.auth, self.timeout, affected_user_id).await
    }
}

pub(super) async fn reauthorize(
    connections: &[Arc<Connection>],
    auth: &Authenticator,
    timeout: Duration,
    affected_user_id: Option<&str>,
) -> usize {
    let mut demoted = 0;
    for conn in connections {
        if conn.is_closed() {
            continue;
        }
        let principal = conn.principal();
        let Some(user_id) = principal.user_id() else {
            continue;
        };
        if affected_user_id.is_some_and(|affected| affected != user_id) {
            continue;
        }

        let check = auth.still_valid(&principal, conn.remote_addr, conn.origin.as_deref());
        let valid = match tokio::time::timeout(timeout, check).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(err)) => {
                tracing::warn!(
                    connection_id = %conn.id,
                    error = %err,
                    "re-authorization lookup failed"
                );
                false
            }
            Err(_elapsed) => {
                tracing::warn!(connection_id = %conn.id, "re-authorization timed out");
                false
            }
        };
        if valid {
            continue;
        }

        // Skipped if the socket sent a fresh `auth` while we were checking.
        if conn.demote_if(&principal) {
            demoted += 1;
            tracing::info!(
                connection_id = %conn.id,
                user_id = %user_id,
                principal = principal.kind(),
                "socket demoted to anonymous"
            );
        }
    }
    demoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::{AppTokenPrincipal, Principal, Scope, ScopeSet};
    use crate::auth::restrictions::Restrictions;
    use crate::db::memory::MemoryStore;
    use crate::db::store::AppTokenRecord;
    use crate::gateway::rooms::Room;

    fn setup() -> (Arc<MemoryStore>, Broker) {
        let store = Arc::new(MemoryStore::new());
        for user in ["luna", "mars"] {
            store.add_user(user);
        }
        store.put_app_token(AppTokenRecord {
            id: "apt_1".into(),
            user_id: "luna".into(),
            issue: 1,
            is_active: true,
            scopes: ScopeSet::new([Scope::ReadRealtime]),
            restrictions: Restrictions::default(),
        });
        let auth = Arc::new(Authenticator::new("secret", store.clone()));
        let broker = Broker::new(store.clone(), auth, Duration::from_millis(200));
        (store, broker)
    }

    fn token_principal(issue: i32) -> Principal {
        Principal::AppTokenUser(AppTokenPrincipal {
            user_id: "luna".into(),
            token_id: "apt_1".into(),
            issue,
            scopes: ScopeSet::new([Scope::ReadRealtime]),
            restrictions: Restrictions::default(),
        })
    }

    fn connect(broker: &Broker, principal: Principal) -> Arc<Connection> {
        let (conn, _rx) = Connection::new(None, None);
        conn.set_principal(principal);
        broker.register(conn.clone());
        conn
    }

    #[tokio::test]
    async fn reissue_demotes_in_place_and_keeps_rooms() {
        let (store, broker) = setup();
        let conn = connect(&broker, token_principal(1));
        broker.subscribe(&conn, &[Room::post("p1")]).unwrap();

        assert_eq!(broker.reauthorize_sockets(None).await, 0);
        store.reissue_app_token("apt_1");
        assert_eq!(broker.reauthorize_sockets(None).await, 1);

        assert_eq!(conn.principal(), Principal::Anonymous);
        assert!(conn.in_room(&Room::post("p1")));
        // Idempotent.
        assert_eq!(broker.reauthorize_sockets(None).await, 0);
    }

    #[tokio::test]
    async fn scoped_to_affected_user() {
        let (store, broker) = setup();
        let token = connect(&broker, token_principal(1));
        let session = connect(&broker, Principal::session("mars"));
        store.deactivate_app_token("apt_1");
        store.set_active("mars", false);

        assert_eq!(broker.reauthorize_sockets(Some("mars")).await, 1);
        assert_eq!(session.principal(), Principal::Anonymous);
        assert_eq!(token.principal(), token_principal(1));

        assert_eq!(broker.reauthorize_sockets(Some("luna")).await, 1);
        assert_eq!(token.principal(), Principal::Anonymous);
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let (store, broker) = setup();
        let conn = connect(&broker, Principal::session("luna"));
        store.set_failing(true);
        assert_eq!(broker.reauthorize_sockets(None).await, 1);
        assert!(conn.principal().is_anonymous());
    }

    #[tokio::test]
    async fn valid_sessions_are_untouched() {
        let (_store, broker) = setup();
        let conn = connect(&broker, Principal::session("luna"));
        assert_eq!(broker.reauthorize_sockets(None).await, 0);
        assert_eq!(conn.principal(), Principal::session("luna"));
    }
}
