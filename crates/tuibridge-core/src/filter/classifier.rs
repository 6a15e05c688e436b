//! Rule evaluation.

use regex::{Regex, RegexBuilder};
use tracing::trace;

use super::rules::{FilterRule, LineMatcher, default_rules};
use crate::error::{Error, Result};

/// Outcome of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// UI chrome; the line is dropped.
    Decorative,
    /// Ordinary content, trailing whitespace trimmed.
    Content(String),
    /// Content introduced by a marker glyph, with the marker removed.
    Tagged { marker: String, text: String },
}

impl Classification {
    /// Text to forward, or `None` for decorative lines.
    pub fn into_kept(self) -> Option<String> {
        match self {
            Self::Decorative => None,
            Self::Content(text) | Self::Tagged { text, .. } => Some(text),
        }
    }

    pub const fn is_decorative(&self) -> bool {
        matches!(self, Self::Decorative)
    }
}

/// Compiled, immutable rule set.
///
/// `classify` is a pure function of the line text; a `Classifier` can be
/// shared between sessions behind an `Arc`.
#[derive(Debug)]
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    id: String,
    matcher: CompiledMatcher,
}

#[derive(Debug)]
enum CompiledMatcher {
    Spinner(Vec<char>),
    HorizontalRule { glyphs: Vec<char>, min_run: usize },
    Pattern(Regex),
    CoOccurrence { all: Vec<String>, case_insensitive: bool },
    Blank,
    Marker { glyph: String, tag: String },
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: default_rules()
                .iter()
                .filter_map(|rule| CompiledRule::compile(rule).ok())
                .collect(),
        }
    }
}

impl Classifier {
    /// Compile an ordered rule list.
    pub fn from_rules(rules: &[FilterRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Classify a single line (no terminator).
    pub fn classify(&self, line: &str) -> Classification {
        for rule in &self.rules {
            if let Some(classification) = rule.apply(line) {
                trace!(rule = %rule.id, decorative = classification.is_decorative(), "Filter rule matched");
                return classification;
            }
        }
        Classification::Content(line.trim_end().to_string())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRule {
            id: rule.id.clone(),
            reason: reason.to_string(),
        };

        let matcher = match &rule.matcher {
            LineMatcher::Spinner { glyphs } => {
                if glyphs.is_empty() {
                    return Err(invalid("spinner needs at least one glyph"));
                }
                CompiledMatcher::Spinner(glyphs.chars().collect())
            }
            LineMatcher::HorizontalRule { glyphs, min_run } => {
                if glyphs.is_empty() || *min_run == 0 {
                    return Err(invalid("horizontal rule needs glyphs and min_run >= 1"));
                }
                CompiledMatcher::HorizontalRule {
                    glyphs: glyphs.chars().collect(),
                    min_run: *min_run,
                }
            }
            LineMatcher::Pattern {
                regex,
                case_insensitive,
            } => {
                let compiled = RegexBuilder::new(regex)
                    .case_insensitive(*case_insensitive)
                    .build()
                    .map_err(|e| invalid(&e.to_string()))?;
                CompiledMatcher::Pattern(compiled)
            }
            LineMatcher::CoOccurrence {
                all,
                case_insensitive,
            } => {
                if all.is_empty() {
                    return Err(invalid("co_occurrence needs at least one substring"));
                }
                let all = if *case_insensitive {
                    all.iter().map(|s| s.to_lowercase()).collect()
                } else {
                    all.clone()
                };
                CompiledMatcher::CoOccurrence {
                    all,
                    case_insensitive: *case_insensitive,
                }
            }
            LineMatcher::Blank => CompiledMatcher::Blank,
            LineMatcher::Marker { glyph, tag } => {
                if glyph.is_empty() {
                    return Err(invalid("marker glyph must not be empty"));
                }
                CompiledMatcher::Marker {
                    glyph: glyph.clone(),
                    tag: tag.clone(),
                }
            }
        };

        Ok(Self {
            id: rule.id.clone(),
            matcher,
        })
    }

    fn apply(&self, line: &str) -> Option<Classification> {
        let decorative = match &self.matcher {
            CompiledMatcher::Spinner(glyphs) => {
                let mut chars = line.chars();
                chars.next().is_some_and(|c| glyphs.contains(&c)) && chars.next() == Some(' ')
            }
            CompiledMatcher::HorizontalRule { glyphs, min_run } => {
                let mut chars = line.trim().chars();
                chars.next().is_some_and(|first| {
                    glyphs.contains(&first) && 1 + chars.take_while(|&c| c == first).count() >= *min_run
                })
            }
            CompiledMatcher::Pattern(regex) => regex.is_match(line),
            CompiledMatcher::CoOccurrence {
                all,
                case_insensitive,
            } => {
                if *case_insensitive {
                    let lower = line.to_lowercase();
                    all.iter().all(|s| lower.contains(s.as_str()))
                } else {
                    all.iter().all(|s| line.contains(s.as_str()))
                }
            }
            CompiledMatcher::Blank => line.trim().is_empty(),
            CompiledMatcher::Marker { glyph, tag } => {
                return line
                    .trim_start()
                    .strip_prefix(glyph.as_str())
                    .and_then(|rest| rest.strip_prefix(' '))
                    .map(|text| Classification::Tagged {
                        marker: tag.clone(),
                        text: text.trim_end().to_string(),
                    });
            }
        };
        decorative.then_some(Classification::Decorative)
    }
}
