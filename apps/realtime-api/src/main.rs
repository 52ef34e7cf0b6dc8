use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_api::config::Config;
use realtime_api::db::postgres::PgStore;
use realtime_api::gateway::fanout::{LocalTransport, RedisTransport, Transport};
use realtime_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let db = realtime_api::db::pool::connect(&config.database_url);
    let store = Arc::new(PgStore::new(db));

    let transport: Arc<dyn Transport> = match &config.redis_url {
        Some(url) => {
            let redis = RedisTransport::connect(url)
                .await
                .expect("failed to connect to redis");
            tracing::info!("using redis transport");
            Arc::new(redis)
        }
        None => {
            tracing::info!("REDIS_URL not set, events fan out in-process only");
            Arc::new(LocalTransport::new())
        }
    };

    tracing::info!(
        authz_timeout_ms = config.authz_timeout.as_millis() as u64,
        strict_event_names = config.strict_event_names,
        "realtime-api configured"
    );

    let (state, _listener) = AppState::start(config, store.clone(), store, transport)
        .await
        .expect("failed to subscribe to transport");

    let app = realtime_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "realtime-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(?e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
