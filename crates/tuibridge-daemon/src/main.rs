//! tuibridge Daemon
//!
//! Serves a WebSocket endpoint; every connection gets its own instance of
//! the configured terminal program running under a pseudo-terminal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use tuibridge_core::config::load_config;
use tuibridge_core::tracing_init::{default_filter, init_tracing};
use tuibridge_core::{BackpressurePolicy, BridgeConfig, OutputMode};
use tuibridge_daemon::server::{AppState, ServerConfig, serve};
use tuibridge_daemon::subprocess::PtySpawner;

#[derive(Parser, Debug)]
#[command(name = "tuibridge-daemon")]
#[command(version, about = "tuibridge daemon - terminal programs over WebSocket")]
struct Args {
    /// TCP bind address
    #[arg(long, default_value = "127.0.0.1:7681", env = "TUIBRIDGE_ADDR")]
    addr: SocketAddr,

    /// Maximum concurrent sessions (one program per session)
    #[arg(long, default_value_t = 16, env = "TUIBRIDGE_MAX_SESSIONS")]
    max_sessions: usize,

    /// Settings file (JSON). Defaults to the global settings.json when present.
    #[arg(long, env = "TUIBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Program to run for each session
    #[arg(long)]
    command: Option<String>,

    /// Working directory for the program
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Output mode: filtered or raw
    #[arg(long)]
    mode: Option<OutputMode>,

    /// Debounce window for output batches, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Backpressure policy: deliver, pause_reads or coalesce
    #[arg(long)]
    backpressure: Option<BackpressurePolicy>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "TUIBRIDGE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TUIBRIDGE_LOG_JSON")]
    log_json: bool,

    /// Arguments passed to the program
    #[arg(last = true)]
    program_args: Vec<String>,
}

impl Args {
    /// CLI flags take precedence over the settings file and environment.
    fn apply_to(&self, config: &mut BridgeConfig) {
        if let Some(command) = &self.command {
            config.command.clone_from(command);
        }
        if !self.program_args.is_empty() {
            config.args.clone_from(&self.program_args);
        }
        if let Some(dir) = &self.working_dir {
            config.working_dir = Some(dir.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(ms) = self.debounce_ms {
            config.coalesce.debounce_ms = ms;
        }
        if let Some(policy) = self.backpressure {
            config.backpressure.policy = policy;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(
        &default_filter("tuibridge_daemon", &args.log_level),
        args.log_json,
    );

    let mut config = load_config(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;
    let classifier = Arc::new(config.classifier()?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        command = %config.command,
        mode = ?config.mode,
        rules = classifier.rule_count(),
        "Starting tuibridge-daemon"
    );

    let server_config = ServerConfig::tcp(args.addr).with_max_sessions(args.max_sessions);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(
        Arc::new(config),
        classifier,
        Arc::new(PtySpawner::default()),
        server_config.max_sessions,
        shutdown_rx,
    );

    let listener = TcpListener::bind(server_config.addr).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // The `true` parameter unsets $NOTIFY_SOCKET so PTY children don't
    // accidentally notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    let shutdown = async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
        // Sessions close their sockets on this, which lets the graceful
        // shutdown finish.
        let _ = shutdown_tx.send(true);
    };

    serve(listener, state, shutdown).await?;

    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from([
            "tuibridge-daemon",
            "--command",
            "claude",
            "--mode",
            "raw",
            "--backpressure",
            "pause_reads",
            "--",
            "--model",
            "fast",
        ]);
        let mut config = BridgeConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.command, "claude");
        assert_eq!(config.args, vec!["--model", "fast"]);
        assert_eq!(config.mode, OutputMode::Raw);
        assert_eq!(config.backpressure.policy, BackpressurePolicy::PauseReads);
    }

    #[test]
    fn absent_flags_keep_config() {
        let args = Args::parse_from(["tuibridge-daemon"]);
        let mut config = BridgeConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config, BridgeConfig::default());
    }
}
