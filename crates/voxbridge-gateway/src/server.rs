//! Axum server — media-stream WebSocket plus the REST control plane.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use voxbridge_core::session::{CallId, Session};

use crate::connection::handle_media_stream;
use crate::state::GatewayState;

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/connection", get(media_stream))
        .route("/incoming", post(incoming_call))
        .route("/calls", post(start_call))
        .route("/calls/{call_sid}/status", get(call_status))
        .route("/calls/{call_sid}/end", post(end_call))
        .route("/calls/{call_sid}/transcript", get(call_transcript))
        .route("/transcripts", get(all_transcripts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway server and serve until ctrl-c.
pub async fn start_server(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr(), state.config.port());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to install CTRL+C handler");
    }
    info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.registry.list().await.len();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": sessions,
    }))
}

async fn media_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(state, socket))
}

/// Answer the signaling webhook with a connect-stream document pointing the
/// call's media at our WebSocket endpoint.
async fn incoming_call(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let host = state
        .config
        .public_host()
        .unwrap_or_else(|| format!("localhost:{}", state.config.port()));
    (
        [(header::CONTENT_TYPE, "text/xml")],
        connect_stream_document(&host),
    )
}

fn connect_stream_document(host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"wss://{host}/connection\" /></Connect></Response>"
    )
}

#[derive(Debug, Deserialize)]
struct StartCallRequest {
    to_number: String,
    system_message: Option<String>,
    opening_line: Option<String>,
    user_email: Option<String>,
}

/// Place an outbound call and pre-register its session context so the
/// media stream's start event reuses it.
async fn start_call(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<StartCallRequest>,
) -> impl IntoResponse {
    let Some(signaling) = state.signaling.clone() else {
        return Json(json!({ "error": "call signaling is not configured" }));
    };

    let host = state
        .config
        .public_host()
        .unwrap_or_else(|| format!("localhost:{}", state.config.port()));
    let answer_url = format!("https://{host}/incoming");

    info!(to = %request.to_number, "Placing outbound call");
    match signaling.create_call(&request.to_number, &answer_url).await {
        Ok(call_sid) => {
            let mut session = Session::new(
                CallId(call_sid.clone()),
                request
                    .system_message
                    .unwrap_or_else(|| state.config.system_message()),
                request
                    .opening_line
                    .unwrap_or_else(|| state.config.opening_line()),
            );
            session.caller_number = Some(request.to_number);
            session.user_email = request.user_email;
            state.registry.insert(session).await;
            Json(json!({ "call_sid": call_sid }))
        }
        Err(e) => {
            error!(%e, "Outbound call failed");
            Json(json!({ "error": format!("failed to initiate call: {e}") }))
        }
    }
}

async fn call_status(
    State(state): State<Arc<GatewayState>>,
    Path(call_sid): Path<String>,
) -> impl IntoResponse {
    let Some(signaling) = state.signaling.clone() else {
        return Json(json!({ "error": "call signaling is not configured" }));
    };
    match signaling.fetch_call(&call_sid).await {
        Ok(details) => Json(json!({ "status": details.status })),
        Err(e) => Json(json!({ "error": format!("failed to fetch call status: {e}") })),
    }
}

async fn end_call(
    State(state): State<Arc<GatewayState>>,
    Path(call_sid): Path<String>,
) -> impl IntoResponse {
    let Some(signaling) = state.signaling.clone() else {
        return Json(json!({ "error": "call signaling is not configured" }));
    };
    match signaling.end_call(&call_sid).await {
        Ok(_) => Json(json!({ "status": "success" })),
        Err(e) => Json(json!({ "error": format!("failed to end requested call: {e}") })),
    }
}

async fn call_transcript(
    State(state): State<Arc<GatewayState>>,
    Path(call_sid): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&CallId(call_sid)).await {
        Some(session) => {
            let guard = session.lock().await;
            Json(json!({ "transcript": guard.turns }))
        }
        None => Json(json!({ "error": "call not found" })),
    }
}

async fn all_transcripts(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let mut transcripts = Vec::new();
    for session in state.registry.list().await {
        let guard = session.lock().await;
        transcripts.push(json!({
            "call_sid": guard.id.as_str(),
            "transcript": guard.turns,
        }));
    }
    Json(json!({ "transcripts": transcripts }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_stream_document() {
        let doc = connect_stream_document("voice.example.com");
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("wss://voice.example.com/connection"));
        assert!(doc.contains("<Connect><Stream"));
    }
}
