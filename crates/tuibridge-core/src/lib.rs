//! tuibridge Core Library
//!
//! Turns the raw byte stream of a program running under a pseudo-terminal
//! into clean, batched text messages:
//! - Chunk decoding (UTF-8 and escape-sequence carry across reads)
//! - Control-sequence stripping
//! - Line reassembly
//! - Rule-driven noise classification
//! - Debounced output coalescing
//! - Configuration resolution and common error types

pub mod ansi;
pub mod coalesce;
pub mod config;
pub mod decode;
pub mod error;
pub mod filter;
pub mod lines;
pub mod message;
pub mod pipeline;
pub mod tracing_init;

pub use coalesce::{CoalesceConfig, CoalescingBuffer};
pub use config::{BackpressureConfig, BackpressurePolicy, BridgeConfig};
pub use error::{Error, Result};
pub use filter::{Classification, Classifier, FilterConfig, FilterRule, LineMatcher};
pub use message::{OutboundMessage, OutputKind};
pub use pipeline::{OutputMode, OutputPipeline};
