//! HTTP routes and the per-connection WebSocket task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use scrawl_core::protocol::text_from_binary;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::relay::{RelayHandle, RelayStats};

/// Time a writer gets to flush queued frames and the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    relay: RelayHandle,
    public: Option<ServeDir>,
}

/// Build the application router.
///
/// WebSocket upgrades are accepted at `/ws` and at `/`, since pages open the
/// socket on their own origin. With `public_dir` set, other requests are
/// served from that directory so the drawing client and the relay share one
/// origin.
pub fn router(relay: RelayHandle, public_dir: Option<PathBuf>) -> Router {
    let public = public_dir.map(|dir| {
        info!(dir = %dir.display(), "Serving static files");
        ServeDir::new(dir)
    });

    let mut app = Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats));

    if let Some(public) = &public {
        app = app.fallback_service(public.clone());
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { relay, public })
}

/// Upgrade when asked to, otherwise serve the index page.
async fn root(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    request: Request,
) -> Response {
    if let Ok(ws) = upgrade {
        let relay = state.relay;
        return ws.on_upgrade(move |socket| handle_socket(socket, relay));
    }
    match state.public {
        Some(mut public) => match public.try_call(request).await {
            Ok(response) => response.into_response(),
            Err(e) => {
                error!(error = %e, "Failed to serve index page");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        None => index().await.into_response(),
    }
}

async fn index() -> &'static str {
    "Scrawl Relay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AppState>) -> Result<Json<RelayStats>, StatusCode> {
    state
        .relay
        .stats()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let relay = state.relay;
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// Pump one connection: frames from the socket go to the relay, frames from
/// the connection's outbox go to the socket.
async fn handle_socket(socket: WebSocket, relay: RelayHandle) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<Arc<str>>();

    let id = match relay.connect(outbox) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Rejecting connection");
            let _ = sender.close().await;
            return;
        }
    };

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match text_from_binary(&data) {
                        Ok(text) => text.to_owned(),
                        Err(e) => {
                            debug!(%id, error = %e, "Ignoring binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // ping/pong
                    Some(Err(e)) => {
                        warn!(%id, error = %e, "WebSocket error");
                        break;
                    }
                };
                if relay.ingest(id, text).is_err() {
                    break;
                }
            }
            // Outbox closed by the relay or the socket stopped accepting writes.
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    // Dropping the connection closes its outbox, so the writer drains what
    // is queued and sends the close frame.
    let _ = relay.disconnect(id);
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        debug!(%id, "Writer did not finish, aborting");
        writer.abort();
    }
}
