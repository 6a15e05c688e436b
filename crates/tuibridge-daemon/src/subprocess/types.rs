//! Program handle types shared by the PTY backend and the session bridge.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::mpsc;

use tuibridge_core::BridgeConfig;

/// Everything needed to start the upstream program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl SpawnSpec {
    /// Build a spec from the resolved config at the given terminal size.
    pub fn from_config(config: &BridgeConfig, cols: u16, rows: u16) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            cols,
            rows,
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
        }
    }
}

/// Event emitted by a running program.
///
/// All `Output` events are delivered before the single `Exited` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramEvent {
    Output(Vec<u8>),
    Exited(Option<i32>),
}

/// Signal sent to request a graceful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// Terminal hang-up, what a program sees when its terminal goes away.
    Hangup,
    Interrupt,
    Terminate,
}

/// Controls for a running program. Every method returns without blocking
/// the async runtime.
pub trait ProgramControl: Send {
    /// Queue bytes for the program's terminal input.
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    fn resize(&mut self, cols: u16, rows: u16) -> std::io::Result<()>;

    fn terminate(&mut self, signal: TermSignal) -> std::io::Result<()>;

    /// Forcefully kill the program.
    fn kill(&mut self) -> std::io::Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// A started program: its controls plus the ordered event stream.
pub struct ProgramHandle {
    pub control: Box<dyn ProgramControl>,
    pub events: mpsc::Receiver<ProgramEvent>,
}

impl std::fmt::Debug for ProgramHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramHandle")
            .field("pid", &self.control.pid())
            .finish_non_exhaustive()
    }
}

/// Starts programs. Must be called from within a Tokio runtime.
pub trait ProgramSpawner: Send + Sync {
    fn spawn(&self, spec: &SpawnSpec) -> Result<ProgramHandle, SpawnError>;
}

/// Errors starting the upstream program.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
