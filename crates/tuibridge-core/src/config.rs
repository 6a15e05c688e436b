//! Configuration resolution for tuibridge.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults
//! 2. Settings file (`--config <path>`, else the global settings.json)
//! 3. Environment variables (`TUIBRIDGE_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coalesce::CoalesceConfig;
use crate::error::{Error, Result};
use crate::filter::{Classifier, FilterConfig};
use crate::lines::DEFAULT_MAX_LINE_BYTES;
use crate::pipeline::OutputMode;

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Program to run under the PTY.
    pub command: String,
    /// Arguments passed to `command`.
    pub args: Vec<String>,
    /// Working directory; the daemon's own when unset.
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the program.
    pub env: BTreeMap<String, String>,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
    /// Appended to every text message from the client.
    pub input_terminator: String,
    /// Default output mode for new sessions.
    pub mode: OutputMode,
    /// Bound on an unterminated line before it is force-split.
    pub max_line_bytes: usize,
    /// Grace period between the termination signal and a forceful kill.
    pub terminate_grace_ms: u64,
    pub coalesce: CoalesceConfig,
    pub backpressure: BackpressureConfig,
    pub filter: FilterConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "gemini".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            cols: 120,
            rows: 40,
            input_terminator: "\r".to_string(),
            mode: OutputMode::Filtered,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            terminate_grace_ms: 2000,
            coalesce: CoalesceConfig::default(),
            backpressure: BackpressureConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub const fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Compile the filter rules. Fails on an invalid rule.
    pub fn classifier(&self) -> Result<Classifier> {
        Classifier::from_rules(&self.filter.rules)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::Config("command must not be empty".into()));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(Error::Config(format!(
                "terminal size must be non-zero (got {}x{})",
                self.cols, self.rows
            )));
        }
        if self.coalesce.debounce_ms == 0 {
            return Err(Error::Config("coalesce.debounce_ms must be > 0".into()));
        }
        if self.coalesce.max_batch_lines == 0 || self.coalesce.max_batch_bytes == 0 {
            return Err(Error::Config("coalesce batch limits must be > 0".into()));
        }
        self.classifier().map(|_| ())
    }
}

/// What the session does while the connection's outbound buffer is above
/// the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Keep sending; batching already limits the message rate.
    #[default]
    Deliver,
    /// Stop reading program output until the buffer drains.
    PauseReads,
    /// Defer flushes so more output merges into fewer messages.
    Coalesce,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deliver" => Ok(Self::Deliver),
            "pause_reads" | "pause-reads" => Ok(Self::PauseReads),
            "coalesce" => Ok(Self::Coalesce),
            other => Err(format!("unknown backpressure policy '{other}'")),
        }
    }
}

/// Backpressure settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub policy: BackpressurePolicy,
    /// Buffered outbound bytes above which the connection counts as saturated.
    pub high_water_bytes: usize,
    /// How often a paused session re-checks the connection.
    pub recheck_ms: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            policy: BackpressurePolicy::Deliver,
            high_water_bytes: 1024 * 1024,
            recheck_ms: 50,
        }
    }
}

impl BackpressureConfig {
    pub const fn recheck(&self) -> Duration {
        Duration::from_millis(self.recheck_ms)
    }
}

/// Load configuration with layered resolution.
///
/// An explicit `path` must exist; the global settings file is optional.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => BridgeConfig::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tuibridge").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<BridgeConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `TUIBRIDGE_*` overrides read through `lookup`. Unparseable values
/// are ignored.
pub fn apply_env_overrides(config: &mut BridgeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("TUIBRIDGE_COMMAND") {
        config.command = val;
    }
    if let Some(val) = lookup("TUIBRIDGE_WORKING_DIR") {
        config.working_dir = Some(PathBuf::from(val));
    }
    if let Some(n) = lookup("TUIBRIDGE_COLS").and_then(|v| v.parse().ok()) {
        config.cols = n;
    }
    if let Some(n) = lookup("TUIBRIDGE_ROWS").and_then(|v| v.parse().ok()) {
        config.rows = n;
    }
    if let Some(mode) = lookup("TUIBRIDGE_MODE").and_then(|v| v.parse().ok()) {
        config.mode = mode;
    }
    if let Some(n) = lookup("TUIBRIDGE_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
        config.coalesce.debounce_ms = n;
    }
    if let Some(policy) = lookup("TUIBRIDGE_BACKPRESSURE").and_then(|v| v.parse().ok()) {
        config.backpressure.policy = policy;
    }
}
