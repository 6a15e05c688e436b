//! WebSocket transport: one socket, one session.
//!
//! ```text
//! socket stream → read_inbound → InboundMessage channel → SessionBridge
//! SessionBridge → WsConnection → Frame channel → write_frames → socket sink
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use tuibridge_core::{BridgeConfig, OutboundMessage, OutputMode};

use super::AppState;
use crate::session::{
    CloseReason, Connection, ConnectionError, InboundMessage, SessionBridge, SessionOptions,
};
use crate::subprocess::SpawnSpec;

const MAX_TERMINAL_DIMENSION: u16 = 1000;
const INBOUND_CAPACITY: usize = 64;

/// Query parameters accepted by `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub mode: Option<OutputMode>,
}

impl SessionQuery {
    /// Requested terminal size, falling back to the config, clamped to
    /// `1..=1000` in both dimensions.
    pub fn terminal_size(&self, config: &BridgeConfig) -> (u16, u16) {
        let clamp = |v: u16| v.clamp(1, MAX_TERMINAL_DIMENSION);
        (
            clamp(self.cols.unwrap_or(config.cols)),
            clamp(self.rows.unwrap_or(config.rows)),
        )
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // The capacity check happens inside the upgrade callback so the permit
    // is acquired and released in the same task as the session.
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, query: SessionQuery) {
    let Ok(_permit) = Arc::clone(&state.sessions).try_acquire_owned() else {
        warn!(max_sessions = state.max_sessions, "Session limit reached, rejecting connection");
        if let Some(frame) = close_message(&CloseReason::Capacity) {
            let _ = socket.send(frame).await;
        }
        return;
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("session", %session_id);
    debug!(parent: &span, active = state.active_sessions(), "Session permit acquired");
    run_session(socket, state, query, session_id)
        .instrument(span)
        .await;
}

async fn run_session(socket: WebSocket, state: AppState, query: SessionQuery, session_id: String) {
    let (cols, rows) = query.terminal_size(&state.config);
    let spec = SpawnSpec::from_config(&state.config, cols, rows);
    let mode = query.mode.unwrap_or(state.config.mode);
    let options =
        SessionOptions::from_config(&state.config, Arc::clone(&state.classifier)).with_mode(mode);
    info!(cols, rows, ?mode, "Client connected");

    let (sink, stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let buffered = Arc::new(AtomicUsize::new(0));

    let writer = tokio::spawn(write_frames(sink, frame_rx, Arc::clone(&buffered)).in_current_span());
    let reader = tokio::spawn(read_inbound(stream, inbound_tx).in_current_span());

    let connection = WsConnection::new(frame_tx, buffered);
    let mut bridge = SessionBridge::new(session_id, options, connection);
    let reason = bridge
        .run(state.spawner.as_ref(), &spec, inbound_rx, state.shutdown.clone())
        .await;
    // Dropping the bridge drops the frame sender; the writer drains what is
    // queued (including the close frame) and stops.
    drop(bridge);
    if let Err(e) = writer.await {
        debug!(error = %e, "WebSocket writer task failed");
    }
    reader.abort();
    debug!(%reason, "Socket finished");
}

/// Frames queued for the socket writer.
#[derive(Debug)]
enum Frame {
    Text(String),
    Close(CloseReason),
}

/// [`Connection`] over a WebSocket, tracking bytes queued but not yet
/// written to the socket.
#[derive(Debug)]
pub struct WsConnection {
    frames: mpsc::UnboundedSender<Frame>,
    buffered: Arc<AtomicUsize>,
}

impl WsConnection {
    fn new(frames: mpsc::UnboundedSender<Frame>, buffered: Arc<AtomicUsize>) -> Self {
        Self { frames, buffered }
    }
}

impl Connection for WsConnection {
    fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        let json = message.to_json()?;
        let len = json.len();
        self.buffered.fetch_add(len, Ordering::Relaxed);
        self.frames.send(Frame::Text(json)).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::Relaxed);
            ConnectionError::Closed
        })
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    fn close(&self, reason: &CloseReason) {
        let _ = self.frames.send(Frame::Close(reason.clone()));
    }
}

/// Close frame for `reason`, or `None` when the client already left.
fn close_message(reason: &CloseReason) -> Option<Message> {
    reason.close_code().map(|code| {
        Message::Close(Some(CloseFrame {
            code,
            reason: reason.wire_reason().into(),
        }))
    })
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    buffered: Arc<AtomicUsize>,
) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Text(json) => {
                let len = json.len();
                let result = sink.send(Message::Text(json.into())).await;
                buffered.fetch_sub(len, Ordering::Relaxed);
                if let Err(e) = result {
                    debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            Frame::Close(reason) => {
                if let Some(message) = close_message(&reason)
                    && let Err(e) = sink.send(message).await
                {
                    debug!(error = %e, "Failed to send close frame");
                }
                break;
            }
        }
    }
}

async fn read_inbound(mut stream: SplitStream<WebSocket>, inbound: mpsc::Sender<InboundMessage>) {
    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "WebSocket receive failed");
                break;
            }
        };
        let message = match message {
            Message::Text(text) => InboundMessage::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => InboundMessage::Binary(bytes.to_vec()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if inbound.send(message).await.is_err() {
            break;
        }
    }
}
