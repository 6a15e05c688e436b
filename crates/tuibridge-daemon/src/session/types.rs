//! Session bridge types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tuibridge_core::{
    BackpressureConfig, BridgeConfig, Classifier, CoalesceConfig, OutboundMessage, OutputMode,
};

/// Client side of a session.
///
/// Implementations must not block: `send` queues the message and
/// `buffered_amount` reports how many bytes are queued but not yet written.
pub trait Connection: Send {
    fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError>;

    fn buffered_amount(&self) -> usize;

    /// Close the connection with `reason`. Closing twice is harmless.
    fn close(&self, reason: &CloseReason);
}

/// Message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Text typed by the user; the input terminator is appended.
    Text(String),
    /// Bytes forwarded to the program unchanged.
    Binary(Vec<u8>),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The program exited, with its exit code when known.
    Exit(Option<i32>),
    SpawnFailed,
    ClientClosed,
    Shutdown,
    Capacity,
    Error(String),
}

impl CloseReason {
    /// Reason string carried by the close frame.
    pub fn wire_reason(&self) -> String {
        match self {
            Self::Exit(code) => format!("exit:{}", code.unwrap_or(0)),
            Self::SpawnFailed => "spawn-failed".to_string(),
            Self::ClientClosed => "client-closed".to_string(),
            Self::Shutdown => "shutdown".to_string(),
            Self::Capacity => "capacity".to_string(),
            Self::Error(_) => "error".to_string(),
        }
    }

    /// WebSocket close code, or `None` when the client already went away.
    pub const fn close_code(&self) -> Option<u16> {
        match self {
            Self::Exit(_) => Some(1000),
            Self::Shutdown => Some(1001),
            Self::SpawnFailed | Self::Error(_) => Some(1011),
            Self::Capacity => Some(1013),
            Self::ClientClosed => None,
        }
    }

    /// Whether the program may still be running when the session ends.
    pub const fn program_outlives_session(&self) -> bool {
        matches!(self, Self::ClientClosed | Self::Shutdown | Self::Error(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "error: {message}"),
            other => f.write_str(&other.wire_reason()),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Active,
    Closing,
    Closed,
}

/// Errors surfaced while a session is running.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to write program input: {0}")]
    InputWrite(#[source] std::io::Error),

    #[error("Program control failed: {0}")]
    Program(#[source] std::io::Error),
}

/// Errors from [`Connection::send`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] tuibridge_core::Error),
}

/// Per-session settings derived from [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mode: OutputMode,
    pub input_terminator: String,
    pub max_line_bytes: usize,
    pub coalesce: CoalesceConfig,
    pub backpressure: BackpressureConfig,
    pub terminate_grace: Duration,
    pub classifier: Arc<Classifier>,
}

impl SessionOptions {
    pub fn from_config(config: &BridgeConfig, classifier: Arc<Classifier>) -> Self {
        Self {
            mode: config.mode,
            input_terminator: config.input_terminator.clone(),
            max_line_bytes: config.max_line_bytes,
            coalesce: config.coalesce.clone(),
            backpressure: config.backpressure.clone(),
            terminate_grace: config.terminate_grace(),
            classifier,
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }
}
