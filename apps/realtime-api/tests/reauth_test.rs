mod common;

use std::time::Duration;

use serde_json::json;

use common::{app_token, session_token, TestServer};
use realtime_api::auth::principal::Scope;
use realtime_api::config::Config;
use realtime_api::gateway::events::{EventName, TargetRefs};

async fn wait_for_anonymous(client: &mut common::Client) {
    for _ in 0..50 {
        let status = client.command("status", json!({})).await;
        if status["userId"].is_null() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("socket was not demoted");
}

#[tokio::test]
async fn app_token_without_realtime_scope_is_rejected() {
    let server = TestServer::start().await;
    server.seed_users();
    server.put_app_token("apt_feeds", "luna", &[Scope::ReadFeeds]);

    let mut client = server.connect().await;
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_feeds", 1, "luna") }))
        .await;
    assert_eq!(reply, json!({ "success": false, "message": "Insufficient scope" }));

    // The previous (anonymous) principal stays in place.
    let status = client.command("status", json!({})).await;
    assert!(status["userId"].is_null());
}

#[tokio::test]
async fn app_token_with_realtime_scope_can_subscribe() {
    let server = TestServer::start().await;
    server.seed_users();
    server.put_app_token("apt_rt", "luna", &[Scope::ReadRealtime]);

    let mut client = server.connect().await;
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_rt", 1, "luna") }))
        .await;
    assert_eq!(reply, json!({ "success": true, "userId": "luna" }));
    client.subscribe(json!({ "user": ["luna"] })).await;
}

#[tokio::test]
async fn token_reissue_demotes_in_place_and_new_token_resumes() {
    let server = TestServer::start().await;
    server.seed_users();
    server.put_app_token("apt_1", "luna", &[Scope::ReadRealtime]);

    let mut client = server.connect().await;
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_1", 1, "luna") }))
        .await;
    assert_eq!(reply["success"], true);
    client
        .subscribe(json!({ "user": ["luna"], "global": ["users"] }))
        .await;

    let issue = server.store.reissue_app_token("apt_1").unwrap();
    server
        .state
        .publisher
        .request_reauthorization(Some("luna"))
        .await;
    wait_for_anonymous(&mut client).await;

    // Demoted: rooms are kept, but the private stream is filtered.
    let status = client.command("status", json!({})).await;
    assert_eq!(status["rooms"], json!({ "global": ["users"], "user": ["luna"] }));
    server
        .publish(EventName::EventNew, TargetRefs::user("luna"), json!({ "n": 1 }))
        .await;
    server
        .publish(EventName::GlobalUserUpdate, TargetRefs::user("venus"), json!({ "n": 2 }))
        .await;
    assert_eq!(client.next_event().await.1, json!({ "n": 2 }));

    // The old issue is refused; the new one restores delivery.
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_1", 1, "luna") }))
        .await;
    assert_eq!(reply, json!({ "success": false, "message": "Token is not active" }));
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_1", issue, "luna") }))
        .await;
    assert_eq!(reply["success"], true);

    server
        .publish(EventName::EventNew, TargetRefs::user("luna"), json!({ "n": 3 }))
        .await;
    assert_eq!(client.next_event().await.1, json!({ "n": 3 }));
}

#[tokio::test]
async fn deactivated_token_is_filtered_even_before_reauthorization() {
    let server = TestServer::start().await;
    server.seed_users();
    server.put_app_token("apt_1", "luna", &[Scope::ReadRealtime]);

    let mut client = server.connect().await;
    client
        .command("auth", json!({ "authToken": app_token("apt_1", 1, "luna") }))
        .await;
    client.subscribe(json!({ "global": ["users"] })).await;

    server.store.deactivate_app_token("apt_1");
    assert_eq!(server.state.broker.reauthorize_sockets(None).await, 1);
    assert_eq!(server.state.broker.reauthorize_sockets(None).await, 0);

    let status = client.command("status", json!({})).await;
    assert!(status["userId"].is_null());
}

#[tokio::test]
async fn suspended_session_user_is_demoted() {
    let server = TestServer::start().await;
    server.seed_users();
    let mut client = server.connect_as("mars").await;

    server.store.set_active("mars", false);
    server.state.publisher.request_reauthorization(None).await;
    wait_for_anonymous(&mut client).await;

    let reply = client
        .command("auth", json!({ "authToken": common::session_token("mars") }))
        .await;
    assert_eq!(reply, json!({ "success": false, "message": "Token is not active" }));
}

#[tokio::test]
async fn timed_out_auth_keeps_previous_principal() {
    let mut config = Config::for_local(common::SECRET);
    config.authz_timeout = Duration::from_millis(150);
    let server = TestServer::start_with(config).await;
    server.seed_users();
    let mut client = server.connect_as("luna").await;

    server.store.set_latency(Some(Duration::from_millis(600)));
    let reply = client
        .command("auth", json!({ "authToken": session_token("mars") }))
        .await;
    assert_eq!(reply, json!({ "success": false, "message": "Authentication timed out" }));
    server.store.set_latency(None);

    let status = client.command("status", json!({})).await;
    assert_eq!(status["userId"], "luna");
}

#[tokio::test]
async fn netmask_change_demotes_on_reauthorization() {
    let server = TestServer::start().await;
    server.seed_users();
    server.put_restricted_app_token("apt_net", "luna", &[Scope::ReadRealtime], &["127.0.0.0/8"]);

    let mut client = server.connect().await;
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_net", 1, "luna") }))
        .await;
    assert_eq!(reply, json!({ "success": true, "userId": "luna" }));

    // Still allowed from loopback: nothing to demote.
    assert_eq!(server.state.broker.reauthorize_sockets(Some("luna")).await, 0);

    server.put_restricted_app_token("apt_net", "luna", &[Scope::ReadRealtime], &["10.0.0.0/8"]);
    assert_eq!(server.state.broker.reauthorize_sockets(Some("luna")).await, 1);

    let status = client.command("status", json!({})).await;
    assert!(status["userId"].is_null());
}

#[tokio::test]
async fn malformed_netmask_refuses_token() {
    let server = TestServer::start().await;
    server.seed_users();
    server.put_restricted_app_token("apt_bad", "luna", &[Scope::ReadRealtime], &["10.0.0.0/33"]);

    let mut client = server.connect().await;
    let reply = client
        .command("auth", json!({ "authToken": app_token("apt_bad", 1, "luna") }))
        .await;
    assert_eq!(
        reply,
        json!({
            "success": false,
            "message": "Token is not allowed from this address or origin"
        })
    );
}
