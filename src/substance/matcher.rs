//! Finds registry substances mentioned in recognized label text.
//!
//! A record matches when its canonical name or any synonym occurs as a
//! whole word, ignoring case. Names shorter than [`MIN_NAME_CHARS`] or made
//! only of digits never take part: serving sizes and table numbers would
//! otherwise match everything.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use tracing::debug;

use super::record::SubstanceRecord;

/// Shortest name (in characters) that may trigger a match.
pub const MIN_NAME_CHARS: usize = 2;

/// Compiled-size cap for a single name pattern.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Characters of context kept on each side of a match snippet.
const SNIPPET_CONTEXT: usize = 30;

/// Returns true if `name` is allowed to trigger a match.
pub fn is_matchable_name(name: &str) -> bool {
    let name = name.trim();
    name.chars().count() >= MIN_NAME_CHARS && !name.chars().all(|c| c.is_ascii_digit())
}

/// Canonical name plus synonyms: trimmed, filtered by [`is_matchable_name`],
/// and deduplicated ignoring case (first spelling wins).
pub fn name_set(record: &SubstanceRecord) -> Vec<String> {
    let mut seen = HashSet::new();

    std::iter::once(&record.substance_name)
        .chain(record.synonyms.iter())
        .map(|name| name.trim())
        .filter(|name| is_matchable_name(name))
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Collapses whitespace runs to single spaces and lowercases.
///
/// Only used for matching; never shown to the user.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Debug, Clone)]
enum Pattern {
    Regex(Regex),
    /// Used when the regex cannot be built; stores the ASCII-lowercased name
    Substring(String),
}

/// A single name compiled for whole-word, case-insensitive search.
#[derive(Debug, Clone)]
pub struct NamePattern {
    name: String,
    pattern: Pattern,
}

impl NamePattern {
    pub fn compile(name: &str) -> Self {
        Self::compile_with_limit(name, PATTERN_SIZE_LIMIT)
    }

    fn compile_with_limit(name: &str, size_limit: usize) -> Self {
        let source = word_pattern(name);
        let pattern = match RegexBuilder::new(&source)
            .case_insensitive(true)
            .size_limit(size_limit)
            .build()
        {
            Ok(regex) => Pattern::Regex(regex),
            Err(e) => {
                debug!("Pattern for {:?} rejected ({}), falling back to substring search", name, e);
                Pattern::Substring(name.to_ascii_lowercase())
            }
        };

        Self {
            name: name.to_string(),
            pattern,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this pattern fell back to plain substring search.
    pub fn is_substring_fallback(&self) -> bool {
        matches!(self.pattern, Pattern::Substring(_))
    }

    /// Tests the pattern against text produced by [`normalize_text`].
    pub fn is_match(&self, normalized: &str) -> bool {
        match &self.pattern {
            Pattern::Regex(regex) => regex.is_match(normalized),
            Pattern::Substring(needle) => normalized.contains(&needle.to_lowercase()),
        }
    }

    /// Finds the leftmost occurrence starting at or after byte `start`.
    ///
    /// Word boundaries are judged against the full text, so a search that
    /// starts mid-string still sees the preceding character.
    pub fn find_at(&self, text: &str, start: usize) -> Option<(usize, usize)> {
        if start > text.len() {
            return None;
        }
        match &self.pattern {
            Pattern::Regex(regex) => regex.find_at(text, start).map(|m| (m.start(), m.end())),
            Pattern::Substring(needle) => {
                // ASCII lowercasing keeps byte offsets identical to `text`
                let haystack = text[start..].to_ascii_lowercase();
                haystack
                    .find(needle.as_str())
                    .map(|pos| (start + pos, start + pos + needle.len()))
            }
        }
    }
}

/// `\b<escaped name>\b`, with internal whitespace runs accepted as any run of
/// whitespace so line-wrapped names are still found in unnormalized text.
///
/// A boundary is only anchored on an edge that is a word character; `\b`
/// next to `)` or `+` would demand a word character on the other side.
fn word_pattern(name: &str) -> String {
    let body = name
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let trimmed = name.trim();
    let lead = if trimmed.chars().next().is_some_and(is_word_char) { r"\b" } else { "" };
    let trail = if trimmed.chars().next_back().is_some_and(is_word_char) { r"\b" } else { "" };
    format!("{}{}{}", lead, body, trail)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Compiles every matchable name of a record.
pub fn compile_name_set(record: &SubstanceRecord) -> Vec<NamePattern> {
    name_set(record).iter().map(|name| NamePattern::compile(name)).collect()
}

struct MatcherEntry<'a> {
    record: &'a SubstanceRecord,
    patterns: Vec<NamePattern>,
}

/// A registry with all of its names compiled, reusable across many texts.
pub struct SubstanceMatcher<'a> {
    entries: Vec<MatcherEntry<'a>>,
}

impl<'a> SubstanceMatcher<'a> {
    pub fn new(registry: &'a [SubstanceRecord]) -> Self {
        let entries = registry
            .iter()
            .map(|record| MatcherEntry {
                record,
                patterns: compile_name_set(record),
            })
            .collect();

        Self { entries }
    }

    /// Records whose names occur in `text`, in registry order.
    ///
    /// A record is returned at most once even if several of its names match
    /// or the registry lists the same id twice. Empty text matches nothing.
    pub fn find_matches(&self, text: &str) -> Vec<SubstanceRecord> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut seen_ids = HashSet::new();
        let mut matches = Vec::new();

        for entry in &self.entries {
            if !entry.patterns.iter().any(|p| p.is_match(&normalized)) {
                continue;
            }
            if seen_ids.insert(entry.record.id.as_str()) {
                matches.push(entry.record.clone());
            }
        }

        debug!(
            "Matched {} of {} registry records against {} chars of text",
            matches.len(),
            self.entries.len(),
            normalized.len()
        );

        matches
    }

    /// Like [`find_matches`](Self::find_matches), with the first matching name
    /// and a context snippet per record.
    pub fn summarize(&self, text: &str) -> Vec<MatchSummary> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut seen_ids = HashSet::new();
        let mut summaries = Vec::new();

        for entry in &self.entries {
            let hit = entry
                .patterns
                .iter()
                .find_map(|p| p.find_at(&normalized, 0).map(|span| (p.name(), span)));

            if let Some((name, (start, end))) = hit {
                if seen_ids.insert(entry.record.id.as_str()) {
                    summaries.push(MatchSummary {
                        record: entry.record.clone(),
                        matched_name: name.to_string(),
                        snippet: snippet(&normalized, start, end),
                    });
                }
            }
        }

        summaries
    }
}

/// A matched record with where it was seen.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSummary {
    pub record: SubstanceRecord,
    /// The name or synonym that matched
    pub matched_name: String,
    /// Normalized text around the first occurrence
    pub snippet: String,
}

/// One-shot convenience over [`SubstanceMatcher`].
pub fn match_substances(text: &str, registry: &[SubstanceRecord]) -> Vec<SubstanceRecord> {
    SubstanceMatcher::new(registry).find_matches(text)
}

/// Cuts `text[start..end]` plus up to [`SNIPPET_CONTEXT`] characters either side.
fn snippet(text: &str, start: usize, end: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .nth(SNIPPET_CONTEXT - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .nth(SNIPPET_CONTEXT)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    text[from..to].to_string()
}
