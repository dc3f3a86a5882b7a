//! Connection handlers for the Sawari hub.
//!
//! This module owns the connection lifecycle: each WebSocket gets an
//! opaque connection id, a direct-delivery channel, and a subscription
//! to the fan-out stream. Inbound frames are dispatched into the
//! presence engine under its single lock; expiry firings enter through
//! the same lock via a pump task, so every registry mutation is one
//! serialized event.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use sawari_core::{Engine, Expired, Gateway};
use sawari_protocol::{codec, ClientFrame, ServerFrame};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence engine, guarded by the single event-stream lock.
    pub engine: Mutex<Engine>,
    /// Fan-out point, shared with every connection task.
    pub gateway: Arc<Gateway>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create the app state and spawn the expiry pump.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let gateway = Arc::new(Gateway::with_capacity(config.hub.fanout_capacity));
        let (engine, expiry_rx) = Engine::new(gateway.clone(), config.request_window());

        let state = Arc::new(Self {
            engine: Mutex::new(engine),
            gateway,
            config,
        });

        tokio::spawn(pump_expiries(state.clone(), expiry_rx));

        state
    }
}

/// Feed timer firings into the engine as ordinary serialized events.
async fn pump_expiries(state: Arc<AppState>, mut expiry_rx: mpsc::UnboundedReceiver<Expired>) {
    while let Some(event) = expiry_rx.recv().await {
        let mut engine = state.engine.lock().await;
        engine.expired(event);
        metrics::set_presence(engine.stats());
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = AppState::new(config.clone());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Sawari hub listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Serve on an already-bound listener. Split out so tests can bind
/// an ephemeral port.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID. Role is decided later, by the first
    // location-bearing frame.
    let connection_id = format!(
        "conn_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Fan-out subscription plus a direct channel for point-to-point
    // frames (assign-number, existing-requests).
    let mut fanout_rx = state.gateway.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel();
    state.gateway.attach(&connection_id, direct_tx);

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Point-to-point frames from the engine
            Some(frame) = direct_rx.recv() => {
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            // Broadcasts to every connection
            result = fanout_rx.recv() => {
                match result {
                    Ok(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Dropped frames are recovered by the next
                        // reconciling snapshot.
                        warn!(connection = %connection_id, skipped, "Fan-out lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);
                        drain_frames(&state, &connection_id, &mut read_buffer).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                        drain_frames(&state, &connection_id, &mut read_buffer).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup is synchronous with the disconnect: detach from fan-out,
    // then run the disconnect transition through the engine lock.
    state.gateway.detach(&connection_id);
    {
        let mut engine = state.engine.lock().await;
        engine.disconnect(&connection_id);
        metrics::set_presence(engine.stats());
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and dispatch every complete frame in the read buffer.
///
/// A malformed frame poisons the rest of the buffered input, so the
/// buffer is discarded with it; the connection itself survives and no
/// registry mutation happens for the bad frame.
async fn drain_frames(state: &Arc<AppState>, connection_id: &str, read_buffer: &mut BytesMut) {
    loop {
        match codec::decode_from::<ClientFrame>(read_buffer) {
            Ok(Some(frame)) => {
                let mut engine = state.engine.lock().await;
                engine.handle(connection_id, frame);
                metrics::set_presence(engine.stats());
            }
            Ok(None) => break,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Malformed frame dropped");
                metrics::record_error("protocol");
                read_buffer.clear();
                break;
            }
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
