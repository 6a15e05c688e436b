//! Filter rule definitions.

use serde::{Deserialize, Serialize};

/// A single classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Rule identifier, reported in logs when the rule matches.
    pub id: String,
    /// What the rule matches.
    #[serde(flatten)]
    pub matcher: LineMatcher,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Line predicate of a [`FilterRule`].
///
/// Every matcher except [`LineMatcher::Marker`] marks the line decorative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineMatcher {
    /// First character is one of `glyphs`, immediately followed by a space.
    Spinner { glyphs: String },
    /// Trimmed line starts with at least `min_run` repeats of one of `glyphs`.
    HorizontalRule {
        glyphs: String,
        #[serde(default = "default_min_run")]
        min_run: usize,
    },
    /// Regular expression found anywhere in the line.
    Pattern {
        regex: String,
        #[serde(default)]
        case_insensitive: bool,
    },
    /// Every substring in `all` occurs in the line.
    CoOccurrence {
        all: Vec<String>,
        #[serde(default)]
        case_insensitive: bool,
    },
    /// Empty or whitespace-only line.
    Blank,
    /// Trimmed line starts with `glyph` and a space. The line is kept, tagged
    /// with `tag`, with the glyph and space removed.
    Marker { glyph: String, tag: String },
}

const fn default_min_run() -> usize {
    3
}

/// Filter configuration: the ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<FilterRule>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Built-in rules, tuned for the Gemini CLI interface.
pub fn default_rules() -> Vec<FilterRule> {
    vec![
        FilterRule {
            id: "builtin-spinner".to_string(),
            matcher: LineMatcher::Spinner {
                glyphs: "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏".to_string(),
            },
            description: Some("Braille spinner frames".to_string()),
        },
        FilterRule {
            id: "builtin-rule".to_string(),
            matcher: LineMatcher::HorizontalRule {
                glyphs: "─━═".to_string(),
                min_run: default_min_run(),
            },
            description: Some("Box-drawing separators".to_string()),
        },
        FilterRule {
            id: "builtin-prompt-hint".to_string(),
            matcher: LineMatcher::Pattern {
                regex: r"type your message|press (?:ctrl|esc|enter|tab)|\? for shortcuts|esc to (?:cancel|interrupt)|@path/to/file".to_string(),
                case_insensitive: true,
            },
            description: Some("Input prompt instructions".to_string()),
        },
        FilterRule {
            id: "builtin-status-verb".to_string(),
            matcher: LineMatcher::Pattern {
                regex: r"^\s*(?:thinking|loading|working|processing|generating|analyzing)\b.*(?:\.\.\.|…)".to_string(),
                case_insensitive: true,
            },
            description: Some("Busy indicators".to_string()),
        },
        FilterRule {
            id: "builtin-footer".to_string(),
            matcher: LineMatcher::CoOccurrence {
                all: vec!["context left".to_string(), "sandbox".to_string()],
                case_insensitive: true,
            },
            description: Some("Model/sandbox status footer".to_string()),
        },
        FilterRule {
            id: "builtin-blank".to_string(),
            matcher: LineMatcher::Blank,
            description: None,
        },
        FilterRule {
            id: "builtin-assistant".to_string(),
            matcher: LineMatcher::Marker {
                glyph: "✦".to_string(),
                tag: "assistant".to_string(),
            },
            description: Some("Assistant message marker".to_string()),
        },
    ]
}
