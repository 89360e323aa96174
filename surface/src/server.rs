//! Axum routes and the WebSocket feed.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use prometheus::{Encoder, TextEncoder};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use keybridge_background::{ApprovalGate, PipelineMetrics};
use keybridge_messages::ApprovalDecision;
use keybridge_store::{EventStore, Queue};
use keybridge_types::{EventId, Timestamp};

/// Shared state for every surface route.
pub struct SurfaceState {
    pub store: Arc<dyn EventStore>,
    pub gate: Arc<ApprovalGate>,
    pub metrics: Arc<PipelineMetrics>,
    /// Completed records older than this are purged on read.
    pub retention_ms: u64,
}

/// The approval surface server.
pub struct SurfaceServer {
    pub port: u16,
    pub state: Arc<SurfaceState>,
}

impl SurfaceServer {
    pub fn new(port: u16, state: Arc<SurfaceState>) -> Self {
        Self { port, state }
    }

    /// Build the route table. Exposed separately so tests can drive the
    /// router without binding a socket.
    pub fn router(state: Arc<SurfaceState>) -> Router {
        Router::new()
            .route("/queue/:name", get(list_queue))
            .route("/event/:id", get(get_event))
            .route("/decision", post(post_decision))
            .route("/surface-closed", post(post_surface_closed))
            .route("/metrics", get(metrics_text))
            .route("/ws", get(ws_handler))
            .layer(tower_http::cors::CorsLayer::permissive())
            .with_state(state)
    }

    /// Start listening. Runs until the process shuts down.
    pub async fn start(&self) -> Result<(), crate::SurfaceError> {
        let app = Self::router(self.state.clone());
        let addr = format!("127.0.0.1:{}", self.port);
        info!("approval surface listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn list_queue(
    State(state): State<Arc<SurfaceState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let queue: Queue = match name.parse() {
        Ok(q) => q,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("unknown queue: {name}") })),
            )
        }
    };

    if queue == Queue::Completed {
        match state
            .store
            .purge_completed_older_than(state.retention_ms, Timestamp::now())
        {
            Ok(purged) if purged > 0 => debug!(purged, "purged aged-out completed records"),
            Ok(_) => {}
            Err(e) => warn!("retention purge failed: {e}"),
        }
    }

    match state.store.get_all(queue) {
        Ok(records) => (StatusCode::OK, Json(serde_json::json!({ "records": records }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn get_event(
    State(state): State<Arc<SurfaceState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.locate(&EventId::from_string(id)) {
        Ok(Some((queue, record))) => (
            StatusCode::OK,
            Json(serde_json::json!({ "queue": queue, "record": record })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no such event" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn post_decision(
    State(state): State<Arc<SurfaceState>>,
    Json(decision): Json<ApprovalDecision>,
) -> impl IntoResponse {
    let event_id = decision.event_id.clone();
    if state.gate.decide(decision) {
        (StatusCode::OK, Json(serde_json::json!({ "delivered": true })))
    } else {
        // Already resolved, timed out, or never existed.
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "delivered": false,
                "error": format!("no pending approval for {event_id}"),
            })),
        )
    }
}

async fn post_surface_closed(State(state): State<Arc<SurfaceState>>) -> impl IntoResponse {
    state.gate.surface_closed();
    StatusCode::NO_CONTENT
}

async fn metrics_text(State(state): State<Arc<SurfaceState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        );
    }
    (
        StatusCode::OK,
        String::from_utf8(buf).unwrap_or_default(),
    )
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SurfaceState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Stream store changes and approval prompts to one client until it
/// disconnects. A lagging client skips missed events rather than stalling
/// the feed.
async fn handle_socket(socket: WebSocket, state: Arc<SurfaceState>) {
    let mut feed = state.store.feed().subscribe();
    let mut prompts = state.gate.subscribe_prompts();
    let (mut sender, mut receiver) = socket.split();

    debug!("surface client connected");
    loop {
        tokio::select! {
            change = feed.recv() => match change {
                Ok(change) => {
                    let msg = serde_json::json!({ "kind": "change", "change": change });
                    if sender.send(Message::Text(msg.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "surface client lagged behind the change feed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            prompt = prompts.recv() => match prompt {
                Ok(prompt) => {
                    let msg = serde_json::json!({ "kind": "prompt", "prompt": prompt });
                    if sender.send(Message::Text(msg.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("surface client receive error: {e}");
                    break;
                }
                _ => {}
            },
        }
    }
    debug!("surface client disconnected");
}
