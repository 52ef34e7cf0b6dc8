pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::tokens::Authenticator;
use config::Config;
use db::store::{TokenStore, VisibilityStore};
use error::TransportError;
use gateway::broker::Broker;
use gateway::fanout::Transport;
use gateway::publisher::Publisher;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: Arc<Broker>,
    pub publisher: Publisher,
}

impl AppState {
    /// Wire the broker to its stores and start listening on `transport`.
    ///
    /// Returns the listener task alongside the state; the broker is subscribed by the
    /// time this returns.
    pub async fn start(
        config: Config,
        visibility: Arc<dyn VisibilityStore>,
        tokens: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, JoinHandle<()>), TransportError> {
        let auth = Arc::new(Authenticator::new(&config.jwt_secret, tokens));
        let broker = Arc::new(Broker::new(visibility, auth, config.authz_timeout));
        let listener = broker.listen(transport.clone()).await?;
        let publisher = Publisher::new(transport, config.strict_event_names);

        let state = Self {
            config: Arc::new(config),
            broker,
            publisher,
        };
        Ok((state, listener))
    }
}

/// The full HTTP application: routes plus CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
