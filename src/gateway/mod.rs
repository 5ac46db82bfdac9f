// src/gateway/mod.rs

//! HTTP and WebSocket surface.
//!
//! - `GET /ws` upgrades the connection into a hub observer. Every hub message
//!   becomes one frame, with no envelope and no history.
//! - `GET /` returns a small JSON status document.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::errors::{HotrunError, Result};
use crate::hub::{HubHandle, Observer};
use crate::supervisor::SupervisorStatus;

/// State shared across handlers.
pub struct GatewayState {
    pub hub: HubHandle,
    pub status: watch::Receiver<SupervisorStatus>,
}

/// Create the router with all routes.
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` fires.
///
/// On shutdown the hub is closed, which ends every websocket forwarder, so
/// the graceful drain does not wait on idle observers.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let hub = state.hub.clone();
    let app = create_router(state);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "gateway listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("gateway shutting down; closing hub");
            hub.close();
        })
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let status = *state.status.borrow();
    let stats = state.hub.stats().await;

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "state": status.state.as_str(),
        "generation": status.generation,
        "last_generation_status": status.last_status.map(|s| s.as_str()),
        "observers": stats.observers,
    }))
}

/// Register before upgrading so a closed hub is reported as 503 instead of
/// an immediately closed socket.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    match state.hub.register().await {
        Ok(observer) => {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| forward_to_socket(socket, observer, hub))
        }
        Err(HotrunError::HubClosed) => {
            (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
        }
        Err(err) => {
            warn!(error = %err, "failed to register observer");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn forward_to_socket(socket: WebSocket, mut observer: Observer, hub: HubHandle) {
    let id = observer.id();
    let (mut sender, mut receiver) = socket.split();
    debug!(observer = id, "websocket observer attached");

    loop {
        tokio::select! {
            msg = observer.recv() => match msg {
                Some(bytes) => {
                    if sender.send(frame_for(bytes)).await.is_err() {
                        debug!(observer = id, "websocket send failed; detaching");
                        break;
                    }
                }
                None => {
                    debug!(observer = id, "hub closed observer queue");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(observer = id, error = %e, "websocket error");
                    break;
                }
                // Observers have nothing to say; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unregister(id);
    if observer.skipped() > 0 {
        info!(observer = id, skipped = observer.skipped(), "observer detached after losing messages");
    } else {
        debug!(observer = id, "websocket observer detached");
    }
}

/// Text frame when the payload is UTF-8, binary frame otherwise.
pub fn frame_for(msg: Bytes) -> Message {
    match std::str::from_utf8(&msg) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(msg),
    }
}
