//! Stream filter engine.
//!
//! Rules are compiled once per settings change; `accept` then runs for
//! every candidate stream of every refresh, so the hot path avoids
//! per-call allocation: lowercased stream fields are computed at most
//! once per call, and whole-word matching scans in place instead of
//! building padded copies.

use tracing::warn;

use crate::models::{FilterRule, IngestedStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    GroupTitle,
    Custom,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    kind: RuleKind,
    /// Folded to lowercase when the rule is case-insensitive.
    rule: String,
    case_sensitive: bool,
    preserve_mapping: bool,
    starting_channel: Option<f64>,
    /// Word lists, folded with the same policy as `rule`.
    include: Vec<String>,
    exclude: Vec<String>,
}

/// A compiled rule set. With no rules every stream is accepted.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    rules: Vec<CompiledRule>,
}

impl FilterEngine {
    /// Compile the active rule set. Rules with an empty rule string are
    /// ignored.
    pub fn compile(rules: &[FilterRule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule {
                FilterRule::GroupTitle {
                    rule,
                    case_sensitive,
                    preserve_mapping,
                    starting_channel,
                    include,
                    exclude,
                } => {
                    if rule.is_empty() {
                        warn!("ignoring group-title filter with empty rule");
                        continue;
                    }
                    compiled.push(CompiledRule {
                        kind: RuleKind::GroupTitle,
                        rule: fold(rule, *case_sensitive),
                        case_sensitive: *case_sensitive,
                        preserve_mapping: *preserve_mapping,
                        starting_channel: *starting_channel,
                        include: fold_words(include, *case_sensitive),
                        exclude: fold_words(exclude, *case_sensitive),
                    });
                }
                FilterRule::Custom {
                    rule,
                    case_sensitive,
                    include,
                    exclude,
                } => {
                    if rule.is_empty() {
                        warn!("ignoring custom filter with empty rule");
                        continue;
                    }
                    compiled.push(CompiledRule {
                        kind: RuleKind::Custom,
                        rule: fold(rule, *case_sensitive),
                        case_sensitive: *case_sensitive,
                        preserve_mapping: false,
                        starting_channel: None,
                        include: fold_words(include, *case_sensitive),
                        exclude: fold_words(exclude, *case_sensitive),
                    });
                }
            }
        }
        Self { rules: compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify one stream against the rule set. Rules run in insertion
    /// order; the first accepting rule wins and stamps its
    /// `preserve_mapping` / `starting_channel` onto the stream.
    pub fn accept(&self, stream: &mut IngestedStream) -> bool {
        if self.rules.is_empty() {
            return true;
        }

        // Lazily folded copies, shared across rules within this call.
        let mut corpus_lower: Option<String> = None;
        let mut group_lower: Option<String> = None;

        for rule in &self.rules {
            let corpus: &str = if rule.case_sensitive {
                &stream.search_corpus
            } else {
                corpus_lower.get_or_insert_with(|| stream.search_corpus.to_lowercase())
            };

            let primary = match rule.kind {
                RuleKind::GroupTitle => {
                    let group: &str = if rule.case_sensitive {
                        &stream.group_title
                    } else {
                        group_lower.get_or_insert_with(|| stream.group_title.to_lowercase())
                    };
                    group == rule.rule
                }
                RuleKind::Custom => corpus.contains(rule.rule.as_str()),
            };
            if !primary {
                continue;
            }

            if rule.exclude.iter().any(|word| contains_word(corpus, word)) {
                continue;
            }
            if !rule.include.is_empty()
                && !rule.include.iter().any(|word| contains_word(corpus, word))
            {
                continue;
            }

            if rule.kind == RuleKind::GroupTitle {
                stream.preserve_mapping = rule.preserve_mapping;
                stream.starting_channel = rule.starting_channel;
            }
            return true;
        }

        false
    }
}

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

fn fold_words(words: &[String], case_sensitive: bool) -> Vec<String> {
    words
        .iter()
        .filter(|w| !w.is_empty())
        .map(|w| fold(w, case_sensitive))
        .collect()
}

/// Whole-word containment: `word` must be bounded by spaces or string
/// edges at both ends. Scans occurrences without building a padded
/// copy of the haystack.
fn contains_word(haystack: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let bytes = haystack.as_bytes();
    let first_char_len = word.chars().next().map(char::len_utf8).unwrap_or(1);
    let mut search_from = 0;
    while let Some(pos) = haystack[search_from..].find(word) {
        let begin = search_from + pos;
        let end = begin + word.len();
        let left_bounded = begin == 0 || bytes[begin - 1] == b' ';
        let right_bounded = end == bytes.len() || bytes[end] == b' ';
        if left_bounded && right_bounded {
            return true;
        }
        // Advance past the match start, staying on a char boundary.
        search_from = begin + first_char_len;
    }
    false
}
