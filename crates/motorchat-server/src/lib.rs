pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use motorchat_api::AppStateInner;
use motorchat_db::MessageStore;
use motorchat_gateway::Dispatcher;
use motorchat_gateway::auth::{AuthError, Authenticator, JwtAuthenticator};
use motorchat_gateway::connection;

pub use config::Config;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Wire the gateway and the read API onto one router.
pub fn build_app(config: &Config, store: Arc<dyn MessageStore>) -> (Router, Dispatcher) {
    let authenticator: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new(&config.jwt_secret));
    let dispatcher = Dispatcher::new(store.clone(), authenticator.clone(), config.gateway.clone());
    dispatcher.spawn_presence_sweeper();

    let api = motorchat_api::router(Arc::new(AppStateInner { store, authenticator }));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(dispatcher.clone());

    let app = Router::new()
        .merge(api)
        .merge(ws_route)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    (app, dispatcher)
}

/// The token may arrive as `?token=` or as a bearer header. It is checked
/// before the upgrade, so a bad credential never gets a socket.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Dispatcher>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
) -> Response {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    });

    let identity = match token
        .ok_or(AuthError::MissingToken)
        .and_then(|token| dispatcher.authenticate(&token))
    {
        Ok(identity) => identity,
        Err(e) => {
            debug!("Rejected gateway upgrade: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let (session, outbound) = dispatcher.open_session(identity);
        connection::run_connection(socket, dispatcher, session, outbound).await;
    })
}
