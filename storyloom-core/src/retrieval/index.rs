//! The narrow similarity-search seam and an in-process keyword index.
//!
//! Production deployments can put a vector store behind [`ContextIndex`];
//! the engine only ever asks for "top k documents like this text, filtered
//! by metadata".

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::retrieval::document::{ContextDocument, DocType};
use crate::types::{LocationId, NpcId, SessionId};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Metadata restriction applied before ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexFilter<'a> {
    /// Only these document types; empty means any.
    pub doc_types: &'a [DocType],
    /// Only documents about this location.
    pub location_id: Option<&'a LocationId>,
    /// Only documents about this NPC.
    pub npc_id: Option<&'a NpcId>,
}

impl IndexFilter<'_> {
    fn admits(&self, doc: &ContextDocument) -> bool {
        (self.doc_types.is_empty() || self.doc_types.contains(&doc.doc_type))
            && self
                .location_id
                .is_none_or(|want| doc.location_id.as_ref() == Some(want))
            && self.npc_id.is_none_or(|want| doc.npc_id.as_ref() == Some(want))
    }
}

/// One similarity query.
#[derive(Debug, Clone, Copy)]
pub struct IndexQuery<'a> {
    /// Session whose documents are searched.
    pub session_id: &'a SessionId,
    /// Free text to rank against.
    pub text: &'a str,
    /// Maximum results.
    pub top_k: usize,
    /// Metadata restriction.
    pub filter: IndexFilter<'a>,
}

/// A similarity-ranked store of context documents.
///
/// Implementations must be `Send + Sync`; one index is shared by every
/// session.
pub trait ContextIndex: Send + Sync {
    /// Insert or replace documents by `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Index`](crate::StoryError::Index) if the
    /// backing store rejects the write.
    fn upsert(&self, docs: &[ContextDocument]) -> Result<()>;

    /// Return up to `top_k` matching documents, best first.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Index`](crate::StoryError::Index) if the
    /// backing store cannot be queried.
    fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<ContextDocument>>;

    /// Return up to `top_k` documents admitted by the filter, newest first.
    /// The query text is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Index`](crate::StoryError::Index) if the
    /// backing store cannot be queried.
    fn latest(&self, query: &IndexQuery<'_>) -> Result<Vec<ContextDocument>>;

    /// Number of documents stored for a session.
    fn count(&self, session_id: &SessionId) -> usize;
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'
        | '\u{3400}'..='\u{4dbf}'
        | '\u{4e00}'..='\u{9fff}'
        | '\u{ac00}'..='\u{d7af}'
        | '\u{f900}'..='\u{faff}')
}

/// Lowercase ASCII words plus CJK unigrams and bigrams.
#[must_use]
pub fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut word = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let flush_cjk = |run: &mut Vec<char>, tokens: &mut HashSet<String>| {
        for (i, c) in run.iter().enumerate() {
            tokens.insert(c.to_string());
            if let Some(next) = run.get(i + 1) {
                tokens.insert([*c, *next].iter().collect());
            }
        }
        run.clear();
    };

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            word.push(c.to_ascii_lowercase());
        } else {
            if !word.is_empty() {
                tokens.insert(std::mem::take(&mut word));
            }
            if is_cjk(c) {
                cjk_run.push(c);
            } else {
                flush_cjk(&mut cjk_run, &mut tokens);
            }
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }
    flush_cjk(&mut cjk_run, &mut tokens);
    tokens
}

// ---------------------------------------------------------------------------
// KeywordIndex
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    doc: ContextDocument,
    tokens: HashSet<String>,
}

/// Token-overlap index kept in memory.
///
/// Scores are the number of distinct query tokens present in a document.
/// Documents with no overlap are never returned. Ties go to the newest
/// document, then to the smaller `doc_id`.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    sessions: RwLock<HashMap<SessionId, Vec<Entry>>>,
}

impl KeywordIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextIndex for KeywordIndex {
    fn upsert(&self, docs: &[ContextDocument]) -> Result<()> {
        let mut sessions = self.sessions.write();
        for doc in docs {
            let entries = sessions.entry(doc.session_id.clone()).or_default();
            let entry = Entry {
                tokens: tokenize(&doc.text),
                doc: doc.clone(),
            };
            match entries.iter_mut().find(|e| e.doc.doc_id == doc.doc_id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }
        debug!(upserted = docs.len(), "Keyword index updated");
        Ok(())
    }

    fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<ContextDocument>> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }
        let wanted = tokenize(query.text);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let sessions = self.sessions.read();
        let Some(entries) = sessions.get(query.session_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(usize, &Entry)> = entries
            .iter()
            .filter(|e| query.filter.admits(&e.doc))
            .map(|e| (wanted.intersection(&e.tokens).count(), e))
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by_key(|(score, e)| (Reverse(*score), Reverse(e.doc.timestamp), e.doc.doc_id.clone()));
        scored.truncate(query.top_k);

        Ok(scored.into_iter().map(|(_, e)| e.doc.clone()).collect())
    }

    fn latest(&self, query: &IndexQuery<'_>) -> Result<Vec<ContextDocument>> {
        let sessions = self.sessions.read();
        let Some(entries) = sessions.get(query.session_id) else {
            return Ok(Vec::new());
        };
        let mut docs: Vec<&ContextDocument> = entries
            .iter()
            .map(|e| &e.doc)
            .filter(|doc| query.filter.admits(doc))
            .collect();
        docs.sort_by_key(|doc| (Reverse(doc.timestamp), doc.doc_id.clone()));
        docs.truncate(query.top_k);
        Ok(docs.into_iter().cloned().collect())
    }

    fn count(&self, session_id: &SessionId) -> usize {
        self.sessions.read().get(session_id).map_or(0, Vec::len)
    }
}
