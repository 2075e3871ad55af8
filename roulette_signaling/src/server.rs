//! HTTP and WebSocket surface

use crate::connection::FrameSink;
use crate::error::SignalingError;
use crate::handler;
use crate::ice::IceServerProvider;
use crate::state::ServerState;
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::header::CACHE_CONTROL;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use roulette_protocol::IceServer;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub signaling: ServerState,
    pub ice: Arc<IceServerProvider>,
}

impl AppState {
    pub fn new(signaling: ServerState, ice: IceServerProvider) -> Self {
        Self {
            signaling,
            ice: Arc::new(ice),
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/active-users", get(active_users))
        .route("/api/turn-config", get(turn_config))
        .route("/health", get(|| async { "OK" }))
        .route("/ping", get(|| async { "pong" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Write half of an upgraded socket.
struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<(), SignalingError> {
        self.0.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            debug!(error = %e, "websocket close failed");
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CACHE_CONTROL, "no-cache, no-store, must-revalidate")],
        ws.on_upgrade(move |socket| handle_socket(socket, state)),
    )
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let handle = match state.signaling.connect(WsSink(sink)) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "refusing websocket");
            return;
        }
    };
    let id = handle.id();

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handler::handle_message(&state.signaling, id, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %id, error = %e, "websocket read failed");
                break;
            }
        }
    }

    state.signaling.disconnect(id);
}

#[derive(Serialize)]
struct ActiveUsers {
    count: usize,
}

async fn active_users(State(state): State<AppState>) -> Json<ActiveUsers> {
    Json(ActiveUsers {
        count: state.signaling.active_connections(),
    })
}

async fn turn_config(State(state): State<AppState>) -> Json<Vec<IceServer>> {
    let servers = state.ice.ice_servers().await;
    info!(servers = servers.len(), "serving ICE configuration");
    Json(servers.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_router_creates_routes() {
        let state = AppState::new(ServerState::default(), IceServerProvider::stun_only());
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn turn_config_without_credentials_is_public_stun() {
        let state = AppState::new(ServerState::default(), IceServerProvider::stun_only());
        let Json(servers) = turn_config(State(state)).await;
        assert_eq!(servers, vec![IceServer::public_stun()]);
    }

    #[tokio::test]
    async fn active_users_counts_connections() {
        let state = AppState::new(ServerState::default(), IceServerProvider::stun_only());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state
            .signaling
            .connect(crate::connection::ChannelSink(tx))
            .unwrap();
        let Json(users) = active_users(State(state)).await;
        assert_eq!(users.count, 1);
    }
}
