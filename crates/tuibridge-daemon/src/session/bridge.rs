//! Session bridge: one program, one connection.
//!
//! Data flow:
//! ```text
//! program output → OutputPipeline → CoalescingBuffer ─(deadline)→ Connection::send
//! inbound text   → + input terminator → program input
//! ```
//!
//! A session is a single sequential loop over program events, inbound
//! messages and the batch deadline. The loop is the only writer of the
//! pending batch, so nothing here needs a lock.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tuibridge_core::pipeline::PipelineStats;
use tuibridge_core::{
    BackpressurePolicy, CoalescingBuffer, OutboundMessage, OutputKind, OutputPipeline,
};

use super::types::{
    CloseReason, Connection, InboundMessage, SessionError, SessionOptions, SessionState,
};
use crate::subprocess::{ProgramControl, ProgramEvent, ProgramSpawner, SpawnSpec, TermSignal};

/// Delivery counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub deferred_flushes: u64,
}

/// Bridges one upstream program to one client connection.
pub struct SessionBridge<C: Connection> {
    id: String,
    options: SessionOptions,
    connection: C,
    state: SessionState,
    pipeline: OutputPipeline,
    batch: CoalescingBuffer,
    program: Option<Box<dyn ProgramControl>>,
    events: Option<mpsc::Receiver<ProgramEvent>>,
    reads_paused: bool,
    stats: SessionStats,
}

impl<C: Connection> SessionBridge<C> {
    pub fn new(id: impl Into<String>, options: SessionOptions, connection: C) -> Self {
        let pipeline = OutputPipeline::new(
            options.mode,
            Arc::clone(&options.classifier),
            options.max_line_bytes,
        );
        let batch = CoalescingBuffer::new(
            OutputKind::Stdout,
            options.mode.separator(),
            options.coalesce.clone(),
        );
        Self {
            id: id.into(),
            options,
            connection,
            state: SessionState::Starting,
            pipeline,
            batch,
            program: None,
            events: None,
            reads_paused: false,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    pub const fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Start the program and pump until either side ends, then close.
    ///
    /// `inbound` ending means the client went away. A change on `shutdown`
    /// ends the session as the daemon stops.
    pub async fn run(
        &mut self,
        spawner: &dyn ProgramSpawner,
        spec: &SpawnSpec,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> CloseReason {
        if self.state != SessionState::Starting {
            warn!(session_id = %self.id, state = ?self.state, "Session already started");
            return CloseReason::Error("session already started".into());
        }

        let handle = match spawner.spawn(spec) {
            Ok(handle) => handle,
            Err(e) => {
                error!(session_id = %self.id, command = %spec.command, error = %e, "Failed to start program");
                if let Some(notice) =
                    OutboundMessage::stderr(format!("failed to start '{}': {e}", spec.command))
                {
                    self.deliver(&notice);
                }
                self.close(CloseReason::SpawnFailed).await;
                return CloseReason::SpawnFailed;
            }
        };

        info!(session_id = %self.id, pid = ?handle.control.pid(), mode = ?self.options.mode, "Session active");
        self.program = Some(handle.control);
        self.state = SessionState::Active;

        let mut events = handle.events;
        let reason = self.pump(&mut events, &mut inbound, &mut shutdown).await;
        self.events = Some(events);
        self.close(reason.clone()).await;
        reason
    }

    async fn pump(
        &mut self,
        events: &mut mpsc::Receiver<ProgramEvent>,
        inbound: &mut mpsc::Receiver<InboundMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CloseReason {
        if *shutdown.borrow() {
            return CloseReason::Shutdown;
        }

        loop {
            let paused = self.update_read_pause();
            let deadline = self.batch.deadline().map(Instant::from_std);
            let recheck = self.options.backpressure.recheck();

            tokio::select! {
                biased;
                Ok(()) = shutdown.changed() => return CloseReason::Shutdown,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline();
                }
                message = inbound.recv() => match message {
                    Some(message) => self.on_input(message),
                    None => {
                        info!(session_id = %self.id, "Client disconnected");
                        return CloseReason::ClientClosed;
                    }
                },
                event = events.recv(), if !paused => match event {
                    Some(ProgramEvent::Output(bytes)) => self.on_output(&bytes),
                    Some(ProgramEvent::Exited(code)) => {
                        info!(session_id = %self.id, ?code, "Program exited");
                        return CloseReason::Exit(code);
                    }
                    None => {
                        warn!(session_id = %self.id, "Program events ended without an exit status");
                        return CloseReason::Exit(None);
                    }
                },
                () = tokio::time::sleep(recheck), if paused => {}
            }
        }
    }

    /// End the session: flush what is pending, stop the program if it may
    /// still be running, close the connection. Later calls do nothing.
    pub async fn close(&mut self, reason: CloseReason) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;

        let now = Instant::now().into_std();
        for segment in self.pipeline.finish() {
            self.batch.push(segment, now);
        }
        self.flush();

        if reason.program_outlives_session() {
            self.stop_program().await;
        }
        self.program = None;
        self.events = None;

        self.connection.close(&reason);
        self.state = SessionState::Closed;

        let pipeline = self.pipeline.stats();
        info!(
            session_id = %self.id,
            %reason,
            messages_sent = self.stats.messages_sent,
            messages_dropped = self.stats.messages_dropped,
            bytes_in = pipeline.bytes_in,
            lines_seen = pipeline.lines_seen,
            lines_dropped = pipeline.lines_dropped,
            "Session closed"
        );
    }

    fn on_output(&mut self, bytes: &[u8]) {
        let now = Instant::now().into_std();
        for segment in self.pipeline.feed(bytes) {
            if self.batch.push(segment, now) {
                debug!(
                    session_id = %self.id,
                    lines = self.batch.len(),
                    bytes = self.batch.pending_bytes(),
                    "Batch limit reached, flushing early"
                );
                self.flush();
            }
        }
        self.batch.schedule_flush(now);
    }

    fn on_deadline(&mut self) {
        let now = Instant::now().into_std();
        if self.options.backpressure.policy == BackpressurePolicy::Coalesce
            && self.is_saturated()
            && !self.batch.is_overdue(now)
        {
            self.batch.rearm(now);
            self.stats.deferred_flushes += 1;
            debug!(session_id = %self.id, pending = self.batch.len(), "Connection saturated, deferring flush");
            return;
        }
        self.flush();
    }

    fn on_input(&mut self, message: InboundMessage) {
        let bytes = match message {
            InboundMessage::Text(mut text) => {
                text.push_str(&self.options.input_terminator);
                text.into_bytes()
            }
            InboundMessage::Binary(bytes) => bytes,
        };
        let Some(program) = self.program.as_mut() else {
            return;
        };
        if let Err(e) = program.write(&bytes) {
            warn!(session_id = %self.id, error = %SessionError::InputWrite(e), "Input dropped");
        }
    }

    fn flush(&mut self) {
        if let Some(message) = self.batch.flush_now() {
            self.deliver(&message);
        }
    }

    fn deliver(&mut self, message: &OutboundMessage) {
        if self.state == SessionState::Closed {
            return;
        }
        match self.connection.send(message) {
            Ok(()) => self.stats.messages_sent += 1,
            Err(e) => {
                self.stats.messages_dropped += 1;
                debug!(session_id = %self.id, error = %e, "Dropped outbound message");
            }
        }
    }

    fn is_saturated(&self) -> bool {
        self.connection.buffered_amount() > self.options.backpressure.high_water_bytes
    }

    fn update_read_pause(&mut self) -> bool {
        let paused = self.options.backpressure.policy == BackpressurePolicy::PauseReads
            && self.is_saturated();
        if paused != self.reads_paused {
            debug!(
                session_id = %self.id,
                paused,
                buffered = self.connection.buffered_amount(),
                "Program output reads {}",
                if paused { "paused" } else { "resumed" }
            );
            self.reads_paused = paused;
        }
        paused
    }

    async fn stop_program(&mut self) {
        let Some(program) = self.program.as_mut() else {
            return;
        };
        let pid = program.pid();
        if let Err(e) = program.terminate(TermSignal::Hangup) {
            debug!(session_id = %self.id, ?pid, error = %SessionError::Program(e), "Termination signal failed");
        }

        let grace = self.options.terminate_grace;
        let exited = match self.events.as_mut() {
            Some(events) => tokio::time::timeout(grace, wait_for_exit(events)).await.ok(),
            None => None,
        };
        match exited {
            Some(code) => info!(session_id = %self.id, ?pid, ?code, "Program stopped"),
            None => {
                warn!(
                    session_id = %self.id,
                    ?pid,
                    grace_ms = grace.as_millis(),
                    "Program still running after grace period, killing"
                );
                if let Err(e) = program.kill() {
                    warn!(session_id = %self.id, ?pid, error = %SessionError::Program(e), "Failed to kill program");
                }
            }
        }
    }
}

/// Discard remaining output until the program reports its exit.
async fn wait_for_exit(events: &mut mpsc::Receiver<ProgramEvent>) -> Option<i32> {
    while let Some(event) = events.recv().await {
        if let ProgramEvent::Exited(code) = event {
            return code;
        }
    }
    None
}
