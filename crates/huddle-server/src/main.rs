mod config;
mod handshake;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_db::Database;
use huddle_gateway::{ChatGateway, connection};

use crate::config::ServerConfig;

#[derive(Clone)]
struct ServerState {
    gateway: ChatGateway<Database>,
    jwt_secret: Arc<str>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let state = ServerState {
        gateway: ChatGateway::new(db, config.gateway_config()),
        jwt_secret: config.jwt_secret.as_str().into(),
    };

    let app = Router::new()
        .route("/ws/chat", get(ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Huddle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Verify the token before upgrading; the gateway closes unauthenticated
/// sockets itself so the client sees a proper close code.
async fn ws_upgrade(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = handshake::identity_from_headers(&headers, &state.jwt_secret);
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway, identity))
}
