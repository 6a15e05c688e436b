//! Pseudo-terminal program backend.
//!
//! ```text
//! reader thread ──raw chunks──▶ forwarder task ──ProgramEvent──▶ session
//! waiter thread ──exit code───▶ forwarder task
//! session ──input──▶ writer thread ──▶ PTY master
//! ```
//!
//! Blocking PTY reads, writes and waits run on plain threads. The forwarder
//! orders events so every output chunk precedes `Exited`. All channels towards
//! the session are bounded: a session that stops polling eventually blocks the
//! reader thread, and with it the program's own writes.

use std::io::{Read, Write};
use std::time::Duration;

use portable_pty::{
    ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize, native_pty_system,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::types::{
    ProgramControl, ProgramEvent, ProgramHandle, ProgramSpawner, SpawnError, SpawnSpec, TermSignal,
};

const READ_BUF_SIZE: usize = 8192;
const RAW_CHANNEL_CAPACITY: usize = 16;

/// How long output is still collected after the program has exited. A child
/// that leaves a grandchild holding the terminal open would otherwise delay
/// `Exited` indefinitely.
const POST_EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Spawns programs under a native pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    event_capacity: usize,
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self { event_capacity: 64 }
    }
}

impl PtySpawner {
    /// Spawner whose event channel holds at most `event_capacity` chunks.
    pub fn with_event_capacity(event_capacity: usize) -> Self {
        Self {
            event_capacity: event_capacity.max(1),
        }
    }
}

impl ProgramSpawner for PtySpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<ProgramHandle, SpawnError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            cmd.cwd(dir);
        }
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        info!(
            command = %spec.command,
            args = ?spec.args,
            cols = spec.cols,
            rows = spec.rows,
            "Spawning program under PTY"
        );
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| classify_spawn_error(&spec.command, &e))?;
        // The slave end must be closed here so the reader sees EOF once the
        // program (and anything it spawned) lets go of the terminal.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Pty(e.to_string()))?;

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);

        std::thread::Builder::new()
            .name("pty-reader".into())
            .spawn(move || read_loop(reader, &raw_tx))?;
        std::thread::Builder::new()
            .name("pty-writer".into())
            .spawn(move || write_loop(writer, input_rx))?;
        std::thread::Builder::new()
            .name("pty-waiter".into())
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => exit_code(&status),
                    Err(e) => {
                        warn!(error = %e, "Failed to wait for program");
                        None
                    }
                };
                let _ = exit_tx.send(code);
            })?;
        tokio::spawn(forward_events(raw_rx, exit_rx, events_tx));

        debug!(?pid, "Program started");
        Ok(ProgramHandle {
            control: Box::new(PtyControl {
                master: pair.master,
                killer,
                input: input_tx,
                pid,
            }),
            events: events_rx,
        })
    }
}

/// Exit code of a finished program, `None` when a signal ended it.
///
/// portable-pty reports signal deaths with a placeholder code of 1 and only
/// exposes the signal through `Display`.
fn exit_code(status: &ExitStatus) -> Option<i32> {
    if !status.success() && status.to_string().starts_with("Terminated by") {
        return None;
    }
    i32::try_from(status.exit_code()).ok()
}

fn classify_spawn_error(command: &str, err: &anyhow::Error) -> SpawnError {
    let not_found = err
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
        || err.to_string().contains("not found in PATH");
    if not_found {
        SpawnError::CommandNotFound {
            command: command.to_string(),
        }
    } else {
        SpawnError::Pty(format!("{err:#}"))
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, raw_tx: &mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if raw_tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            // EIO on Linux once the last slave handle closes.
            Err(e) => {
                debug!(error = %e, "PTY read ended");
                break;
            }
        }
    }
    debug!("PTY reader finished");
}

fn write_loop(mut writer: Box<dyn Write + Send>, mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = input_rx.blocking_recv() {
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            warn!(error = %e, "Failed to write to program input");
            break;
        }
    }
    debug!("PTY writer finished");
}

async fn forward_events(
    mut raw_rx: mpsc::Receiver<Vec<u8>>,
    mut exit_rx: oneshot::Receiver<Option<i32>>,
    events_tx: mpsc::Sender<ProgramEvent>,
) {
    let code = loop {
        tokio::select! {
            biased;
            chunk = raw_rx.recv() => match chunk {
                Some(bytes) => {
                    if events_tx.send(ProgramEvent::Output(bytes)).await.is_err() {
                        return;
                    }
                }
                None => break (&mut exit_rx).await.ok().flatten(),
            },
            code = &mut exit_rx => {
                let code = code.ok().flatten();
                drain_after_exit(&mut raw_rx, &events_tx).await;
                break code;
            }
        }
    };
    debug!(?code, "Program exited");
    let _ = events_tx.send(ProgramEvent::Exited(code)).await;
}

async fn drain_after_exit(
    raw_rx: &mut mpsc::Receiver<Vec<u8>>,
    events_tx: &mpsc::Sender<ProgramEvent>,
) {
    let deadline = tokio::time::Instant::now() + POST_EXIT_DRAIN;
    while let Ok(Some(bytes)) = tokio::time::timeout_at(deadline, raw_rx.recv()).await {
        if events_tx.send(ProgramEvent::Output(bytes)).await.is_err() {
            return;
        }
    }
}

/// Controls for a program started by [`PtySpawner`].
struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    input: mpsc::UnboundedSender<Vec<u8>>,
    pid: Option<u32>,
}

impl ProgramControl for PtyControl {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.input.send(bytes.to_vec()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "program input closed")
        })
    }

    fn resize(&mut self, cols: u16, rows: u16) -> std::io::Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(std::io::Error::other)
    }

    #[cfg(unix)]
    fn terminate(&mut self, signal: TermSignal) -> std::io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return self.kill();
        };
        let raw = i32::try_from(pid).map_err(std::io::Error::other)?;
        let signal = match signal {
            TermSignal::Hangup => Signal::SIGHUP,
            TermSignal::Interrupt => Signal::SIGINT,
            TermSignal::Terminate => Signal::SIGTERM,
        };
        debug!(pid, ?signal, "Signalling program");
        kill(Pid::from_raw(raw), signal).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self, _signal: TermSignal) -> std::io::Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.killer.kill()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
