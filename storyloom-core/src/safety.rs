//! World-consistency guard over model output.
//!
//! The world bible lists taboos, names that must stay hidden and
//! anachronisms. Any of them appearing in narration, dialogue or the memory
//! summary breaks the setting, unless the player brought the term up first;
//! an NPC may answer a question about a "phone" without the model having
//! introduced one.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::config::SafetyConfig;
use crate::turn::TurnOutput;
use crate::world::WorldBible;

/// Guarded terms found in model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyViolation {
    /// Normalised offending terms, sorted.
    pub terms: Vec<String>,
    /// JSON paths of the fields they appeared in.
    pub fields: Vec<String>,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guarded term(s) [{}] in {}",
            self.terms.join(", "),
            self.fields.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// `wi-fi`, `wi fi` and `wifi`.
    Wifi,
    /// A single alphanumeric word, matched on word boundaries.
    Word(String),
    /// Anything else, matched as a substring.
    Phrase(String),
}

#[derive(Debug, Clone)]
struct GuardTerm {
    normalized: String,
    matcher: Matcher,
}

/// Scans text for a world's guarded terms.
#[derive(Debug, Clone)]
pub struct TermGuard {
    terms: Vec<GuardTerm>,
    first_mention_exempt: bool,
}

impl TermGuard {
    /// Collect the guarded terms of a world.
    ///
    /// Medieval worlds without an explicit anachronism blocklist fall back
    /// to `safety.default_anachronisms`.
    #[must_use]
    pub fn from_bible(bible: &WorldBible, safety: &SafetyConfig) -> Self {
        let mut raw: Vec<&str> = bible
            .taboos
            .iter()
            .chain(&bible.do_not_mention)
            .chain(&bible.anachronism_blocklist)
            .map(String::as_str)
            .collect();
        if bible.anachronism_blocklist.is_empty() && bible.is_medieval() {
            raw.extend(safety.default_anachronisms.iter().map(String::as_str));
        }
        Self::new(raw, safety.first_mention_exempt)
    }

    /// Build a guard over explicit terms.
    #[must_use]
    pub fn new<'a>(raw: impl IntoIterator<Item = &'a str>, first_mention_exempt: bool) -> Self {
        let mut seen = BTreeSet::new();
        let terms = raw
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(|t| {
                let lowered = t.to_lowercase();
                let normalized = if lowered == "wi-fi" { "wifi".to_string() } else { lowered };
                if !seen.insert(normalized.clone()) {
                    return None;
                }
                let matcher = if normalized == "wifi" {
                    Matcher::Wifi
                } else if normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
                    Matcher::Word(normalized.clone())
                } else {
                    Matcher::Phrase(normalized.clone())
                };
                Some(GuardTerm { normalized, matcher })
            })
            .collect();

        Self {
            terms,
            first_mention_exempt,
        }
    }

    /// Number of guarded terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether nothing is guarded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Normalised guarded terms present in `text`.
    #[must_use]
    pub fn terms_in(&self, text: &str) -> BTreeSet<String> {
        let lowered = text.to_lowercase();
        self.terms
            .iter()
            .filter(|t| t.matcher.is_match(&lowered))
            .map(|t| t.normalized.clone())
            .collect()
    }

    /// Check every visible field of `output`.
    ///
    /// Returns `None` when the output is clean.
    #[must_use]
    pub fn scan(&self, player_text: &str, output: &TurnOutput) -> Option<ConsistencyViolation> {
        if self.terms.is_empty() {
            return None;
        }
        let exempt = if self.first_mention_exempt {
            self.terms_in(player_text)
        } else {
            BTreeSet::new()
        };

        let mut terms = BTreeSet::new();
        let mut fields = Vec::new();
        for (path, text) in output.visible_text() {
            let found: Vec<String> = self
                .terms_in(text)
                .into_iter()
                .filter(|t| !exempt.contains(t))
                .collect();
            if !found.is_empty() {
                fields.push(path);
                terms.extend(found);
            }
        }

        if terms.is_empty() {
            return None;
        }
        debug!(terms = ?terms, fields = ?fields, "Guarded terms in model output");
        Some(ConsistencyViolation {
            terms: terms.into_iter().collect(),
            fields,
        })
    }
}

impl Matcher {
    fn is_match(&self, lowered: &str) -> bool {
        match self {
            Self::Wifi => ["wifi", "wi-fi", "wi fi"]
                .iter()
                .any(|form| contains_word(lowered, form)),
            Self::Word(word) => contains_word(lowered, word),
            Self::Phrase(phrase) => lowered.contains(phrase.as_str()),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Occurrence of `needle` not embedded in a longer word.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}
