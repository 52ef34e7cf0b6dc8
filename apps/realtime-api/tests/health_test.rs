mod common;

use axum_test::TestServer as HttpServer;

#[tokio::test]
async fn health_reports_broker_counts() {
    let server = common::TestServer::start().await;
    let mut client = server.connect().await;
    client
        .subscribe(serde_json::json!({ "post": ["p1"] }))
        .await;

    let http = HttpServer::new(realtime_api::app(server.state.clone())).unwrap();
    let resp = http.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["rooms"], 1);
}
