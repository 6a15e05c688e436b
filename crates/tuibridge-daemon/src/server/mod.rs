//! HTTP server for the tuibridge daemon.
//!
//! Routes:
//! - `GET /health` - liveness probe
//! - `GET /ws` - WebSocket upgrade, one session per connection

mod config;
mod health;
mod ws;

pub use config::ServerConfig;
pub use health::{HealthResponse, health};
pub use ws::{SessionQuery, WsConnection, ws_handler};

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info};

use tuibridge_core::{BridgeConfig, Classifier};

use crate::subprocess::ProgramSpawner;

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    config: Arc<BridgeConfig>,
    classifier: Arc<Classifier>,
    spawner: Arc<dyn ProgramSpawner>,
    sessions: Arc<Semaphore>,
    max_sessions: usize,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: Arc<BridgeConfig>,
        classifier: Arc<Classifier>,
        spawner: Arc<dyn ProgramSpawner>,
        max_sessions: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let max_sessions = max_sessions.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            config,
            classifier,
            spawner,
            sessions: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            shutdown,
        }
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.max_sessions - self.sessions.available_permits()
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then wait for every
/// session to finish closing.
///
/// Upgraded sockets are no longer tracked by axum, so graceful shutdown
/// returns as soon as the listener stops. Sessions watch the shutdown signal
/// through [`AppState`] and release their permit once the program is stopped
/// and the close frame is written.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let sessions = Arc::clone(&state.sessions);
    let max_sessions = state.max_sessions;
    info!(addr = %listener.local_addr()?, max_sessions, "Server ready");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    drain_sessions(&sessions, max_sessions).await;
    Ok(())
}

/// Wait until all `max_sessions` permits are back.
async fn drain_sessions(sessions: &Semaphore, max_sessions: usize) {
    let active = max_sessions - sessions.available_permits();
    if active > 0 {
        info!(active, "Waiting for sessions to close");
    }
    let mut remaining = max_sessions;
    while remaining > 0 {
        let batch = u32::try_from(remaining).unwrap_or(u32::MAX);
        let Ok(permits) = sessions.acquire_many(batch).await else {
            return;
        };
        remaining -= permits.num_permits();
        // The server is done; late upgrades find no permit and get `capacity`.
        permits.forget();
    }
    debug!("All sessions closed");
}
