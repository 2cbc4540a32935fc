//! HTTP polling API.
//!
//! Clients that cannot hold a WebSocket open register with `POST /connect`,
//! then repeatedly `GET /poll` for new messages. A `401` from `/poll` or
//! `/send` means the session expired and the client must connect again.

use crate::error::ApiError;
use crate::handlers::{envelope, AppState};
use crate::metrics;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use relay_core::SessionId;
use relay_protocol::Envelope;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Polling API routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connect", post(connect_handler))
        .route("/poll", get(poll_handler))
        .route("/send", post(send_handler))
        .route("/disconnect", post(disconnect_handler))
}

/// Query string for `GET /poll`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollParams {
    pub client_id: String,
}

/// Body of `POST /send`.
///
/// Missing fields deserialize as empty so that validation, not the JSON
/// extractor, decides the response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /disconnect`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub client_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub client_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub messages: Vec<Envelope>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub id: String,
    pub timestamp: u64,
    pub recipients: usize,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub ok: bool,
}

fn ensure_polling(state: &AppState) -> Result<(), ApiError> {
    if state.config.transport.polling {
        Ok(())
    } else {
        Err(ApiError::PollingDisabled)
    }
}

/// `POST /connect`: register a pull session.
async fn connect_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConnectResponse>, ApiError> {
    ensure_polling(&state)?;

    let session_id = state.relay.register();
    metrics::record_session();
    debug!(session = %session_id, "Polling client connected");

    Ok(Json(ConnectResponse {
        client_id: session_id.into_inner(),
        timestamp: state.relay.now(),
    }))
}

/// `GET /poll?clientId=...`: drain messages since the last poll.
async fn poll_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PollParams>,
) -> Result<Json<PollResponse>, ApiError> {
    ensure_polling(&state)?;
    let start = Instant::now();

    let session_id = SessionId::from(params.client_id);
    let messages = state.relay.poll(&session_id)?;
    metrics::record_deliveries(messages.len(), "poll");

    let messages = messages.iter().map(|m| envelope(m)).collect();
    metrics::record_latency(start.elapsed().as_secs_f64(), "poll");

    Ok(Json(PollResponse { messages }))
}

/// `POST /send`: relay a broadcast, or a direct message if `to` is set.
async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    ensure_polling(&state)?;
    let start = Instant::now();

    let from = SessionId::from(request.client_id);
    let receipt = state
        .relay
        .send(&from, request.to.map(SessionId::from), request.content)?;

    metrics::record_message(receipt.message.kind());
    metrics::record_deliveries(receipt.pushed, "push");
    metrics::record_latency(start.elapsed().as_secs_f64(), "send");

    Ok(Json(SendResponse {
        id: receipt.message.id.to_string(),
        timestamp: receipt.message.created_at,
        recipients: receipt.recipients,
    }))
}

/// `POST /disconnect`: end a session. Unknown sessions are not an error.
async fn disconnect_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DisconnectRequest>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    ensure_polling(&state)?;

    let session_id = SessionId::from(request.client_id);
    if state.relay.disconnect(&session_id) {
        debug!(session = %session_id, "Polling client disconnected");
        metrics::set_relay_stats(&state.relay.stats());
    }

    Ok(Json(DisconnectResponse { ok: true }))
}
