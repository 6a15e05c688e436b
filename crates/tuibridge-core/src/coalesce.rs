//! Debounced output coalescing.
//!
//! [`CoalescingBuffer`] does no I/O and owns no timer task. It records a
//! single flush deadline; the session loop sleeps until [`CoalescingBuffer::deadline`]
//! and then calls [`CoalescingBuffer::flush_now`]. Callers pass the current
//! time in, so the buffer works with any clock.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::message::{OutboundMessage, OutputKind};

/// Batching limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    /// Debounce window, armed by the first push of a batch.
    pub debounce_ms: u64,
    /// Flush immediately once a batch holds this many segments.
    pub max_batch_lines: usize,
    /// Flush immediately once a batch holds this many bytes.
    pub max_batch_bytes: usize,
    /// A batch older than this is flushed even when a flush is being deferred.
    pub max_batch_age_ms: u64,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            max_batch_lines: 500,
            max_batch_bytes: 64 * 1024,
            max_batch_age_ms: 1000,
        }
    }
}

impl CoalesceConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }
}

/// Pending batch plus its single-shot flush deadline.
#[derive(Debug)]
pub struct CoalescingBuffer {
    kind: OutputKind,
    separator: &'static str,
    config: CoalesceConfig,
    pending: Vec<String>,
    pending_bytes: usize,
    oldest: Option<Instant>,
    deadline: Option<Instant>,
}

impl CoalescingBuffer {
    /// Buffer whose segments are joined with `separator` on flush.
    pub const fn new(kind: OutputKind, separator: &'static str, config: CoalesceConfig) -> Self {
        Self {
            kind,
            separator,
            config,
            pending: Vec::new(),
            pending_bytes: 0,
            oldest: None,
            deadline: None,
        }
    }

    /// Append a segment. Returns `true` when the batch reached a size limit
    /// and should be flushed now.
    pub fn push(&mut self, text: String, now: Instant) -> bool {
        if self.pending.is_empty() {
            self.oldest = Some(now);
        }
        self.pending_bytes += text.len();
        self.pending.push(text);
        self.pending.len() >= self.config.max_batch_lines
            || self.pending_bytes >= self.config.max_batch_bytes
    }

    /// Arm the flush deadline. No-op while already armed or when nothing is
    /// pending.
    pub fn schedule_flush(&mut self, now: Instant) {
        if self.deadline.is_none() && !self.pending.is_empty() {
            self.deadline = Some(now + self.config.debounce());
        }
    }

    /// Push the deadline one debounce window past `now`, used when a flush
    /// is deferred.
    pub fn rearm(&mut self, now: Instant) {
        if !self.pending.is_empty() {
            self.deadline = Some(now + self.config.debounce());
        }
    }

    /// Swap the batch out and build its message. Clears the deadline.
    ///
    /// Returns `None` when nothing (or only empty text) was pending.
    pub fn flush_now(&mut self) -> Option<OutboundMessage> {
        self.deadline = None;
        self.oldest = None;
        self.pending_bytes = 0;
        let batch = std::mem::take(&mut self.pending);
        OutboundMessage::new(self.kind, batch.join(self.separator))
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the armed deadline has passed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Whether the oldest pending segment exceeded the age limit.
    pub fn is_overdue(&self, now: Instant) -> bool {
        self.oldest
            .is_some_and(|t| now.saturating_duration_since(t) >= self.config.max_batch_age())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub const fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }
}
