//! Per-connection sessions.
//!
//! Each connection gets its own program and its own [`SessionBridge`]; no
//! state is shared between sessions.

mod bridge;
mod types;

pub use bridge::{SessionBridge, SessionStats};
pub use types::{
    CloseReason, Connection, ConnectionError, InboundMessage, SessionError, SessionOptions,
    SessionState,
};
