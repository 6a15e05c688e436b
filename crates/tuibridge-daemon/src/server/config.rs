//! Server configuration.

use std::net::SocketAddr;

use tokio::sync::Semaphore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub addr: SocketAddr,

    /// Maximum concurrent sessions.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7681)),
            max_sessions: 16,
        }
    }
}

impl ServerConfig {
    /// Create a new server config bound to `addr`.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    /// Set max sessions, clamped to `1..=Semaphore::MAX_PERMITS`.
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.clamp(1, Semaphore::MAX_PERMITS);
        self
    }
}
