//! Connection handlers for the Relay server.
//!
//! This module wires the relay core to axum: server startup, health checks
//! and the WebSocket push channel. The HTTP polling API lives in [`crate::api`].

use crate::api;
use crate::config::Config;
use crate::error::frame_error_code;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_core::{DeliveryEngine, ExpirySweeper, Message, RelayError, SessionId};
use relay_protocol::{codec, error_codes, Envelope, Frame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay core.
    pub relay: Arc<DeliveryEngine>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with a relay built from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let relay = Arc::new(DeliveryEngine::new(config.relay_config()));
        Self::with_relay(config, relay)
    }

    /// Create app state around an existing relay.
    #[must_use]
    pub fn with_relay(config: Config, relay: Arc<DeliveryEngine>) -> Self {
        Self { relay, config }
    }
}

/// Convert a relayed message to its wire form.
#[must_use]
pub fn envelope(message: &Message) -> Envelope {
    Envelope {
        id: message.id.to_string(),
        from: message.from.to_string(),
        to: message.to.as_ref().map(ToString::to_string),
        content: message.content.clone(),
        timestamp: message.created_at,
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new().route("/health", get(health_handler));

    if state.config.transport.websocket {
        router = router.route(&state.config.transport.websocket_path, get(ws_handler));
    }

    router.merge(api::routes()).with_state(state)
}

/// Run the HTTP/WebSocket server until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate()?;
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let sweeper = {
        let relay = Arc::clone(&state.relay);
        let sweeper = ExpirySweeper::new(Arc::clone(&state.relay));
        info!("Expiring idle sessions every {:?}", sweeper.interval());
        sweeper.spawn(move |report| {
            metrics::record_sweep(report);
            metrics::set_relay_stats(&relay.stats());
        })
    };

    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    if config.transport.websocket {
        info!(
            "WebSocket endpoint: ws://{}{}",
            addr, config.transport.websocket_path
        );
    }
    if config.transport.polling {
        info!("Polling endpoints: http://{}/{{connect,poll,send,disconnect}}", addr);
    }

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Relay server stopped");

    Ok(())
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    axum::Json(serde_json::json!({
        "status": "healthy",
        "timestamp": state.relay.now(),
        "sessions": stats.sessions,
        "messages": stats.retained_messages,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Encoding used for outbound frames on a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Text,
    Binary,
}

type WsSender = SplitSink<WebSocket, WsMessage>;

/// Handle a WebSocket connection.
///
/// The connection is a push session: it is registered and subscribed on
/// open, and disconnected on close. If the sweeper expires the session, the
/// delivery channel ends and the socket is closed.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = state.relay.register();
    metrics::record_session();

    let mut deliveries = match state.relay.subscribe(&session_id) {
        Ok(rx) => rx,
        Err(e) => {
            error!(session = %session_id, error = %e, "Failed to open push channel");
            state.relay.disconnect(&session_id);
            return;
        }
    };
    metrics::set_relay_stats(&state.relay.stats());

    debug!(session = %session_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut encoding = Encoding::Text;

    let welcome = Frame::welcome(session_id.as_str(), state.relay.now());
    if send_frame(&mut sender, &welcome, encoding).await.is_err() {
        error!(session = %session_id, "Failed to send welcome frame");
        state.relay.disconnect(&session_id);
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    let period = state.config.heartbeat_interval().max(Duration::from_secs(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;

            delivered = deliveries.recv() => {
                let Some(message) = delivered else {
                    debug!(session = %session_id, "Session expired, closing WebSocket");
                    let frame = Frame::error(error_codes::SESSION_NOT_FOUND, "Session expired");
                    let _ = send_frame(&mut sender, &frame, encoding).await;
                    break;
                };
                let frame = Frame::Message(envelope(&message));
                if send_frame(&mut sender, &frame, encoding).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let start = Instant::now();
                        let reply = match codec::decode_text(&text) {
                            Ok(frame) => handle_frame(&frame, &session_id, &state),
                            Err(e) => {
                                warn!(session = %session_id, error = %e, "Undecodable text frame");
                                metrics::record_error("bad_frame");
                                Some(Frame::error(error_codes::BAD_FRAME, e.to_string()))
                            }
                        };
                        metrics::record_latency(start.elapsed().as_secs_f64(), "ws");

                        if let Some(reply) = reply {
                            if send_frame(&mut sender, &reply, encoding).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        let start = Instant::now();
                        encoding = Encoding::Binary;
                        read_buffer.extend_from_slice(&data);

                        let mut replies = Vec::new();
                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    replies.extend(handle_frame(&frame, &session_id, &state));
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(session = %session_id, error = %e, "Undecodable binary frame");
                                    metrics::record_error("bad_frame");
                                    read_buffer.clear();
                                    replies.push(Frame::error(error_codes::BAD_FRAME, e.to_string()));
                                    break;
                                }
                            }
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64(), "ws");

                        let mut closed = false;
                        for reply in &replies {
                            if send_frame(&mut sender, reply, encoding).await.is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = state.relay.touch(&session_id);
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        // Heartbeat answered: the client is still there.
                        let _ = state.relay.touch(&session_id);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(session = %session_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.relay.disconnect(&session_id);
    metrics::set_relay_stats(&state.relay.stats());

    debug!(session = %session_id, "WebSocket disconnected");
}

/// Handle a decoded client frame, returning the reply to send, if any.
fn handle_frame(frame: &Frame, session_id: &SessionId, state: &AppState) -> Option<Frame> {
    let frame_type = frame.frame_type();
    if !frame_type.is_client_frame() {
        warn!(session = %session_id, frame_type = %frame_type, "Unexpected frame type");
        metrics::record_error("unexpected_frame");
        return Some(Frame::error(
            error_codes::BAD_FRAME,
            format!("Unexpected frame type: {frame_type}"),
        ));
    }

    match frame {
        Frame::Broadcast { content } => relay_send(state, session_id, None, content),

        Frame::Direct { to, content } => {
            relay_send(state, session_id, Some(SessionId::from(to.as_str())), content)
        }

        Frame::Ping { .. } => match state.relay.touch(session_id) {
            Ok(()) => Some(Frame::pong(state.relay.now())),
            Err(e) => Some(relay_error_frame(&e)),
        },

        // Server frames were rejected above.
        _ => None,
    }
}

/// Relay a message from a push session. Success is silent.
fn relay_send(
    state: &AppState,
    from: &SessionId,
    to: Option<SessionId>,
    content: &str,
) -> Option<Frame> {
    match state.relay.send(from, to, content) {
        Ok(receipt) => {
            metrics::record_message(receipt.message.kind());
            metrics::record_deliveries(receipt.pushed, "push");
            None
        }
        Err(e) => {
            debug!(session = %from, error = %e, "Send rejected");
            Some(relay_error_frame(&e))
        }
    }
}

fn relay_error_frame(error: &RelayError) -> Frame {
    metrics::record_relay_error(error);
    Frame::error(frame_error_code(error), error.to_string())
}

/// Send a frame to the WebSocket in the connection's encoding.
async fn send_frame(sender: &mut WsSender, frame: &Frame, encoding: Encoding) -> Result<()> {
    let message = match encoding {
        Encoding::Text => WsMessage::Text(codec::encode_text(frame)?),
        Encoding::Binary => WsMessage::Binary(codec::encode(frame)?.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}
