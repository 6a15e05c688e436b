//! Per-session output pipeline.
//!
//! ```text
//! filtered: bytes → ChunkDecoder → strip → LineSplitter → Classifier → kept lines
//! raw:      bytes → ChunkDecoder (UTF-8 only) → text segments
//! ```

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::ansi;
use crate::decode::ChunkDecoder;
use crate::filter::Classifier;
use crate::lines::LineSplitter;

/// How program output is turned into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Control sequences stripped, lines classified, noise dropped.
    #[default]
    Filtered,
    /// Terminal output forwarded as-is for client-side rendering.
    Raw,
}

impl OutputMode {
    /// Separator used when joining a batch of segments.
    pub const fn separator(self) -> &'static str {
        match self {
            Self::Filtered => "\n",
            Self::Raw => "",
        }
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filtered" => Ok(Self::Filtered),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown output mode '{other}' (expected filtered|raw)")),
        }
    }
}

/// Counters for one pipeline, reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_in: u64,
    pub lines_seen: u64,
    pub lines_dropped: u64,
}

/// Decoder, stripper, splitter and classifier for one session.
#[derive(Debug)]
pub struct OutputPipeline {
    mode: OutputMode,
    decoder: ChunkDecoder,
    splitter: LineSplitter,
    classifier: Arc<Classifier>,
    stats: PipelineStats,
}

impl OutputPipeline {
    pub fn new(mode: OutputMode, classifier: Arc<Classifier>, max_line_bytes: usize) -> Self {
        let decoder = match mode {
            OutputMode::Filtered => ChunkDecoder::new(),
            OutputMode::Raw => ChunkDecoder::utf8_only(),
        };
        Self {
            mode,
            decoder,
            splitter: LineSplitter::new(max_line_bytes),
            classifier,
            stats: PipelineStats::default(),
        }
    }

    pub const fn mode(&self) -> OutputMode {
        self.mode
    }

    pub const fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Process one raw chunk and return the segments to forward.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.stats.bytes_in += chunk.len() as u64;
        let text = self.decoder.decode(chunk);
        match self.mode {
            OutputMode::Raw => raw_segment(text),
            OutputMode::Filtered => {
                let lines = self.splitter.feed(&ansi::strip(&text));
                self.keep_lines(lines)
            }
        }
    }

    /// Drain carried state at stream end.
    pub fn finish(&mut self) -> Vec<String> {
        let text = self.decoder.finish();
        match self.mode {
            OutputMode::Raw => raw_segment(text),
            OutputMode::Filtered => {
                let mut lines = self.splitter.feed(&ansi::strip(&text));
                lines.extend(self.splitter.flush_remainder());
                self.keep_lines(lines)
            }
        }
    }

    fn keep_lines(&mut self, lines: Vec<String>) -> Vec<String> {
        let mut kept = Vec::with_capacity(lines.len());
        for line in lines {
            self.stats.lines_seen += 1;
            match self.classifier.classify(&line).into_kept() {
                Some(text) => kept.push(text),
                None => {
                    self.stats.lines_dropped += 1;
                    trace!(line = %line, "Dropped decorative line");
                }
            }
        }
        kept
    }
}

fn raw_segment(text: String) -> Vec<String> {
    if text.is_empty() { Vec::new() } else { vec![text] }
}
