//! Outbound wire messages.

use serde::{Deserialize, Serialize};

/// Stream an outbound message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Stdout,
    Stderr,
}

/// One message delivered to the client: `{"type": "stdout", "data": "..."}`.
///
/// The payload is never empty; [`OutboundMessage::new`] refuses empty text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    kind: OutputKind,
    data: String,
}

impl OutboundMessage {
    /// Build a message, or `None` when `data` is empty.
    pub fn new(kind: OutputKind, data: impl Into<String>) -> Option<Self> {
        let data = data.into();
        (!data.is_empty()).then_some(Self { kind, data })
    }

    pub fn stdout(data: impl Into<String>) -> Option<Self> {
        Self::new(OutputKind::Stdout, data)
    }

    pub fn stderr(data: impl Into<String>) -> Option<Self> {
        Self::new(OutputKind::Stderr, data)
    }

    pub const fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Serialize to the JSON text frame sent over the wire.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
