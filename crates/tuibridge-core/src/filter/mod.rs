//! Noise filtering for TUI output lines.
//!
//! Lines are classified against an ordered rule list (first match wins).
//! The rule list is configuration: the built-in defaults describe one
//! particular upstream program and are expected to be replaced for others.

mod classifier;
mod rules;

pub use classifier::{Classification, Classifier};
pub use rules::{FilterConfig, FilterRule, LineMatcher, default_rules};
