#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Integration tests use unwrap for brevity

//! Integration tests for the session bridge.
//!
//! Drives `SessionBridge` with an in-memory program and connection, under
//! paused time so debounce windows are exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use tuibridge_core::{
    BackpressurePolicy, BridgeConfig, Classifier, OutboundMessage, OutputKind, OutputMode,
};
use tuibridge_daemon::session::{
    CloseReason, Connection, ConnectionError, InboundMessage, SessionBridge, SessionOptions,
    SessionState,
};
use tuibridge_daemon::subprocess::{
    ProgramControl, ProgramEvent, ProgramHandle, ProgramSpawner, SpawnError, SpawnSpec, TermSignal,
};

// =========================================================================
// Fakes
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Write(Vec<u8>),
    Resize(u16, u16),
    Terminate(TermSignal),
    Kill,
}

struct FakeControl {
    calls: Arc<Mutex<Vec<Call>>>,
    /// When set, a termination signal makes the program exit.
    exit_on_signal: Option<mpsc::Sender<ProgramEvent>>,
}

impl ProgramControl for FakeControl {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(Call::Write(bytes.to_vec()));
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(Call::Resize(cols, rows));
        Ok(())
    }

    fn terminate(&mut self, signal: TermSignal) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(Call::Terminate(signal));
        if let Some(tx) = &self.exit_on_signal {
            let _ = tx.try_send(ProgramEvent::Exited(Some(129)));
        }
        Ok(())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(Call::Kill);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

struct FakeSpawner {
    handle: Mutex<Option<ProgramHandle>>,
}

impl ProgramSpawner for FakeSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<ProgramHandle, SpawnError> {
        self.handle
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SpawnError::CommandNotFound {
                command: spec.command.clone(),
            })
    }
}

#[derive(Default)]
struct ConnectionLog {
    messages: Vec<OutboundMessage>,
    closes: Vec<CloseReason>,
    gone: bool,
}

#[derive(Clone, Default)]
struct FakeConnection {
    log: Arc<Mutex<ConnectionLog>>,
    buffered: Arc<AtomicUsize>,
}

impl FakeConnection {
    fn data(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.data().to_string())
            .collect()
    }

    fn messages(&self) -> Vec<OutboundMessage> {
        self.log.lock().unwrap().messages.clone()
    }

    fn closes(&self) -> Vec<CloseReason> {
        self.log.lock().unwrap().closes.clone()
    }

    fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    fn go_away(&self) {
        self.log.lock().unwrap().gone = true;
    }
}

impl Connection for FakeConnection {
    fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        let mut log = self.log.lock().unwrap();
        if log.gone {
            return Err(ConnectionError::Closed);
        }
        log.messages.push(message.clone());
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn close(&self, reason: &CloseReason) {
        let mut log = self.log.lock().unwrap();
        log.closes.push(reason.clone());
        log.gone = true;
    }
}

// =========================================================================
// Harness
// =========================================================================

struct ProgramSetup {
    exits_on_signal: bool,
    event_capacity: usize,
}

impl Default for ProgramSetup {
    fn default() -> Self {
        Self {
            exits_on_signal: true,
            event_capacity: 16,
        }
    }
}

struct Harness {
    events: mpsc::Sender<ProgramEvent>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    shutdown: watch::Sender<bool>,
    calls: Arc<Mutex<Vec<Call>>>,
    conn: FakeConnection,
    task: JoinHandle<(SessionBridge<FakeConnection>, CloseReason)>,
}

impl Harness {
    async fn output(&self, text: &str) {
        self.events
            .send(ProgramEvent::Output(text.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    async fn exit(&self, code: Option<i32>) {
        self.events.send(ProgramEvent::Exited(code)).await.unwrap();
    }

    fn client_leaves(&mut self) {
        self.inbound = None;
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn finish(self) -> (SessionBridge<FakeConnection>, CloseReason, FakeConnection) {
        let (bridge, reason) = self.task.await.unwrap();
        (bridge, reason, self.conn)
    }
}

fn default_options() -> SessionOptions {
    SessionOptions::from_config(&BridgeConfig::default(), Arc::new(Classifier::default()))
}

fn start(options: SessionOptions, setup: ProgramSetup) -> Harness {
    let (events_tx, events_rx) = mpsc::channel(setup.event_capacity);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let control = FakeControl {
        calls: Arc::clone(&calls),
        exit_on_signal: setup.exits_on_signal.then(|| events_tx.clone()),
    };
    let spawner = FakeSpawner {
        handle: Mutex::new(Some(ProgramHandle {
            control: Box::new(control),
            events: events_rx,
        })),
    };

    let conn = FakeConnection::default();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut bridge = SessionBridge::new("test-session", options, conn.clone());
    let spec = SpawnSpec::from_config(&BridgeConfig::default(), 80, 24);
    let task = tokio::spawn(async move {
        let reason = bridge.run(&spawner, &spec, inbound_rx, shutdown_rx).await;
        (bridge, reason)
    });

    Harness {
        events: events_tx,
        inbound: Some(inbound_tx),
        shutdown: shutdown_tx,
        calls,
        conn,
        task,
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// =========================================================================
// Output and batching
// =========================================================================

#[tokio::test(start_paused = true)]
async fn exit_flushes_pending_text_before_closing() {
    let h = start(default_options(), ProgramSetup::default());
    h.output("done").await;
    h.exit(Some(2)).await;

    let (bridge, reason, conn) = h.finish().await;
    assert_eq!(reason, CloseReason::Exit(Some(2)));
    assert_eq!(reason.wire_reason(), "exit:2");
    let messages = conn.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind(), OutputKind::Stdout);
    assert_eq!(messages[0].data(), "done");
    assert_eq!(conn.closes(), vec![CloseReason::Exit(Some(2))]);
    assert_eq!(bridge.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn chunks_in_one_window_become_one_message() {
    let h = start(default_options(), ProgramSetup::default());
    h.output("\x1b[31malpha\x1b[0m\r\n").await;
    h.output("⠋ loading...\r\n").await;
    h.output("✦ beta\r\n").await;
    h.output("gam").await;
    h.output("ma\r\n").await;

    advance(200).await;
    assert_eq!(h.conn.data(), vec!["alpha\nbeta\ngamma"]);

    advance(1000).await;
    assert_eq!(h.conn.data().len(), 1);

    h.exit(Some(0)).await;
    let (bridge, _, _) = h.finish().await;
    assert_eq!(bridge.stats().messages_sent, 1);
    assert_eq!(bridge.pipeline_stats().lines_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn debounce_window_is_not_extended_by_later_output() {
    let h = start(default_options(), ProgramSetup::default());
    h.output("a\n").await;
    advance(100).await;
    h.output("b\n").await;
    advance(60).await;
    assert_eq!(h.conn.data(), vec!["a\nb"]);

    h.output("c\n").await;
    advance(100).await;
    assert_eq!(h.conn.data().len(), 1);
    advance(100).await;
    assert_eq!(h.conn.data(), vec!["a\nb", "c"]);

    h.exit(None).await;
    let (_, reason, _) = h.finish().await;
    assert_eq!(reason.wire_reason(), "exit:0");
}

#[tokio::test(start_paused = true)]
async fn line_limit_forces_an_early_flush() {
    let mut options = default_options();
    options.coalesce.max_batch_lines = 2;
    let h = start(options, ProgramSetup::default());
    h.output("1\n2\n3\n").await;

    advance(1).await;
    assert_eq!(h.conn.data(), vec!["1\n2"]);
    advance(200).await;
    assert_eq!(h.conn.data(), vec!["1\n2", "3"]);

    h.exit(Some(0)).await;
    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn raw_mode_forwards_control_sequences() {
    let h = start(default_options().with_mode(OutputMode::Raw), ProgramSetup::default());
    h.output("\x1b[1mhi").await;
    h.output("\x1b[0m\r\n").await;

    advance(200).await;
    assert_eq!(h.conn.data(), vec!["\x1b[1mhi\x1b[0m\r\n"]);

    h.exit(Some(0)).await;
    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn send_failures_are_swallowed() {
    let h = start(default_options(), ProgramSetup::default());
    h.conn.go_away();
    h.output("lost\n").await;
    advance(200).await;
    h.exit(Some(0)).await;

    let (bridge, reason, conn) = h.finish().await;
    assert_eq!(reason, CloseReason::Exit(Some(0)));
    assert!(conn.messages().is_empty());
    assert_eq!(bridge.stats().messages_dropped, 1);
    assert_eq!(conn.closes().len(), 1);
}

// =========================================================================
// Input
// =========================================================================

#[tokio::test(start_paused = true)]
async fn text_input_gets_terminator_and_binary_is_verbatim() {
    let h = start(default_options(), ProgramSetup::default());
    let inbound = h.inbound.clone().unwrap();
    inbound
        .send(InboundMessage::Text("hello".into()))
        .await
        .unwrap();
    inbound.send(InboundMessage::Binary(vec![0x03])).await.unwrap();
    advance(10).await;

    assert_eq!(
        h.calls(),
        vec![Call::Write(b"hello\r".to_vec()), Call::Write(vec![0x03])]
    );

    h.exit(Some(0)).await;
    h.finish().await;
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn client_close_terminates_program() {
    let mut h = start(default_options(), ProgramSetup::default());
    advance(10).await;
    h.client_leaves();

    let calls = Arc::clone(&h.calls);
    let (_, reason, conn) = h.finish().await;
    assert_eq!(reason, CloseReason::ClientClosed);
    assert_eq!(
        calls.lock().unwrap().clone(),
        vec![Call::Terminate(TermSignal::Hangup)]
    );
    assert_eq!(conn.closes(), vec![CloseReason::ClientClosed]);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_program_is_killed_after_grace() {
    let mut h = start(
        default_options(),
        ProgramSetup {
            exits_on_signal: false,
            ..ProgramSetup::default()
        },
    );
    advance(10).await;
    h.client_leaves();

    let calls = Arc::clone(&h.calls);
    let started = tokio::time::Instant::now();
    let (_, reason, _) = h.finish().await;
    assert_eq!(reason, CloseReason::ClientClosed);
    assert!(started.elapsed() >= BridgeConfig::default().terminate_grace());
    assert_eq!(
        calls.lock().unwrap().clone(),
        vec![Call::Terminate(TermSignal::Hangup), Call::Kill]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_pending_output() {
    let h = start(default_options(), ProgramSetup::default());
    h.output("last words\n").await;
    advance(10).await;
    h.shutdown.send(true).unwrap();

    let calls = Arc::clone(&h.calls);
    let (_, reason, conn) = h.finish().await;
    assert_eq!(reason, CloseReason::Shutdown);
    assert_eq!(conn.data(), vec!["last words"]);
    assert_eq!(conn.closes(), vec![CloseReason::Shutdown]);
    assert_eq!(
        calls.lock().unwrap().first(),
        Some(&Call::Terminate(TermSignal::Hangup))
    );
}

#[tokio::test(start_paused = true)]
async fn second_close_is_a_no_op() {
    let h = start(default_options(), ProgramSetup::default());
    h.output("x\n").await;
    h.exit(Some(1)).await;

    let (mut bridge, _, conn) = h.finish().await;
    bridge.close(CloseReason::ClientClosed).await;
    bridge.close(CloseReason::Error("again".into())).await;

    assert_eq!(conn.data(), vec!["x"]);
    assert_eq!(conn.closes(), vec![CloseReason::Exit(Some(1))]);
    assert_eq!(bridge.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_reports_on_stderr_then_closes() {
    let conn = FakeConnection::default();
    let spawner = FakeSpawner {
        handle: Mutex::new(None),
    };
    let (_inbound_tx, inbound_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut bridge = SessionBridge::new("failing", default_options(), conn.clone());
    let spec = SpawnSpec::from_config(&BridgeConfig::default(), 80, 24);

    let reason = bridge.run(&spawner, &spec, inbound_rx, shutdown_rx).await;

    assert_eq!(reason, CloseReason::SpawnFailed);
    let messages = conn.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind(), OutputKind::Stderr);
    assert!(messages[0].data().contains("failed to start 'gemini'"));
    assert_eq!(conn.closes(), vec![CloseReason::SpawnFailed]);
    assert_eq!(reason.close_code(), Some(1011));
}

// =========================================================================
// Backpressure
// =========================================================================

#[tokio::test(start_paused = true)]
async fn pause_reads_stops_consuming_output_while_saturated() {
    let mut options = default_options();
    options.backpressure.policy = BackpressurePolicy::PauseReads;
    let high_water = options.backpressure.high_water_bytes;
    let h = start(
        options,
        ProgramSetup {
            event_capacity: 1,
            ..ProgramSetup::default()
        },
    );
    h.conn.set_buffered(high_water + 1);

    h.output("a\n").await;
    advance(100).await;
    assert!(
        h.events
            .try_send(ProgramEvent::Output(b"b\n".to_vec()))
            .is_err(),
        "paused session must leave the event channel full"
    );
    assert!(h.conn.data().is_empty());

    h.conn.set_buffered(0);
    advance(300).await;
    assert_eq!(h.conn.data(), vec!["a"]);

    h.exit(Some(0)).await;
    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn coalesce_policy_defers_flush_until_age_limit() {
    let mut options = default_options();
    options.backpressure.policy = BackpressurePolicy::Coalesce;
    let high_water = options.backpressure.high_water_bytes;
    let h = start(options, ProgramSetup::default());
    h.conn.set_buffered(high_water + 1);

    h.output("a\n").await;
    advance(500).await;
    h.output("b\n").await;
    advance(400).await;
    assert!(h.conn.data().is_empty());

    advance(200).await;
    assert_eq!(h.conn.data(), vec!["a\nb"]);

    h.exit(Some(0)).await;
    let (bridge, _, _) = h.finish().await;
    assert!(bridge.stats().deferred_flushes > 0);
}

#[tokio::test(start_paused = true)]
async fn deliver_policy_ignores_saturation() {
    let h = start(default_options(), ProgramSetup::default());
    h.conn.set_buffered(usize::MAX);
    h.output("still sent\n").await;
    advance(200).await;
    assert_eq!(h.conn.data(), vec!["still sent"]);

    h.exit(Some(0)).await;
    h.finish().await;
}
