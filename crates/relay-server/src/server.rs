use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use relay_core::{ParticipantId, RelayError, Role};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerSettings;
use crate::health::HealthResponse;
use crate::relay::Relay;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub started: Instant,
}

impl AppState {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            relay,
            started: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/patient/{id}/chat", get(patient_chat))
        .route("/doctor/{id}/chat", get(doctor_chat))
        .route("/chat/sessions", post(start_chat_session))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(
    settings: &ServerSettings,
    relay: Arc<Relay>,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState::new(relay.clone()));
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let token = CancellationToken::new();
    let shutdown = token.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    info!(%local_addr, "relay server started");

    Ok(ServerHandle {
        port: local_addr.port(),
        relay,
        token,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    relay: Arc<Relay>,
    token: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Close every participant connection, stop accepting, and wait for
    /// the server task to finish.
    pub async fn shutdown(self) {
        let closed = self.relay.shutdown();
        self.token.cancel();
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task failed");
        }
        info!(closed, "relay server stopped");
    }
}

async fn patient_chat(
    ws: WebSocketUpgrade,
    Path(id): Path<ParticipantId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, id, Role::Requester))
}

async fn doctor_chat(
    ws: WebSocketUpgrade,
    Path(id): Path<ParticipantId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, id, Role::Responder))
}

async fn handle_socket(socket: WebSocket, state: AppState, id: ParticipantId, role: Role) {
    let (sink, stream) = socket.split();
    state.relay.serve(id, role, sink, stream).await;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest {
    requester_id: ParticipantId,
    responder_id: ParticipantId,
}

async fn start_chat_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Response {
    let (requester, responder) = (req.requester_id, req.responder_id);
    match state.relay.start_session(requester, responder).await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => {
            warn!(
                requester = %requester,
                responder = %responder,
                error_kind = e.error_kind(),
                error = %e,
                "chat session not started"
            );
            error_response(&e)
        }
    }
}

fn error_response(err: &RelayError) -> Response {
    let status = match err {
        RelayError::PeerNotConnected { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "error": {
            "code": err.error_kind().to_ascii_uppercase(),
            "message": err.to_string(),
        }
    });
    (status, Json(body)).into_response()
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.relay.hub().stats();
    Json(HealthResponse::report(state.started, stats))
}
