//! Context retrieval: the mandatory + optional document pack for one turn.
//!
//! Mandatory documents come straight from the [`WorldState`] in a fixed
//! order: world bible, current location, addressed NPC, the last N turn
//! summaries. The addressed NPC's own latest memories (turn summaries and
//! events about it) follow regardless of the query. Optional documents come
//! from a [`ContextIndex`] in tiers (addressed NPC first, then current
//! location), restricted to turn summaries and events and never
//! duplicating a document already packed.

pub mod document;
pub mod index;

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::types::NpcId;
use crate::world::WorldState;

pub use document::{ContextDocument, DocType};
pub use index::{ContextIndex, IndexFilter, IndexQuery, KeywordIndex};

/// Which mandatory document could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingContext {
    /// The world bible has no setting text.
    WorldBible,
    /// The player's location is not in the world.
    Location(String),
    /// The addressed NPC has no profile.
    NpcProfile(String),
}

impl fmt::Display for MissingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorldBible => write!(f, "world bible is blank"),
            Self::Location(id) => write!(f, "location {id} does not exist"),
            Self::NpcProfile(id) => write!(f, "npc {id} has no profile"),
        }
    }
}

/// Why a document is in the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    /// Mandatory; included regardless of similarity.
    Always,
    /// Chosen by the index.
    Retrieved,
}

/// A document and why it was included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDocument {
    /// Inclusion reason.
    pub inclusion: Inclusion,
    /// The document.
    pub document: ContextDocument,
}

/// Ordered, deduplicated context for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPack {
    entries: Vec<PackedDocument>,
}

impl ContextPack {
    /// All entries, mandatory first.
    #[must_use]
    pub fn entries(&self) -> &[PackedDocument] {
        &self.entries
    }

    /// Documents with the given inclusion reason, in pack order.
    pub fn with_inclusion(&self, inclusion: Inclusion) -> impl Iterator<Item = &ContextDocument> {
        self.entries
            .iter()
            .filter(move |e| e.inclusion == inclusion)
            .map(|e| &e.document)
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, inclusion: Inclusion, document: ContextDocument, seen: &mut HashSet<String>) {
        if seen.insert(document.doc_id.clone()) {
            self.entries.push(PackedDocument { inclusion, document });
        }
    }
}

/// Document types the index may contribute.
const OPTIONAL_TYPES: &[DocType] = &[DocType::TurnSummary, DocType::Event];

/// Builds [`ContextPack`]s according to the retrieval policy.
#[derive(Debug, Clone)]
pub struct ContextRetriever {
    config: RetrievalConfig,
}

impl ContextRetriever {
    /// Create a retriever with the given policy.
    #[must_use]
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Assemble the pack for a turn.
    ///
    /// Index failures only cost the optional documents; they are logged and
    /// the mandatory documents are still returned.
    ///
    /// # Errors
    ///
    /// Returns [`MissingContext`] if the world bible is blank, the player's
    /// location is unknown, or the addressed NPC has no profile.
    pub fn retrieve(
        &self,
        state: &WorldState,
        addressed_npc: Option<&NpcId>,
        query_text: &str,
        index: &dyn ContextIndex,
    ) -> Result<ContextPack, MissingContext> {
        let start = Instant::now();
        let mut pack = ContextPack::default();
        let mut seen = HashSet::new();

        if state.world_bible.is_blank() {
            return Err(MissingContext::WorldBible);
        }
        pack.push(Inclusion::Always, document::world_bible_doc(state), &mut seen);

        let here = &state.player_location;
        let location = document::location_doc(state, here)
            .ok_or_else(|| MissingContext::Location(here.to_string()))?;
        pack.push(Inclusion::Always, location, &mut seen);

        if let Some(npc) = addressed_npc {
            let profile = document::npc_profile_doc(state, npc)
                .ok_or_else(|| MissingContext::NpcProfile(npc.to_string()))?;
            pack.push(Inclusion::Always, profile, &mut seen);
        }

        for summary in state.recent_summaries(self.config.summary_window) {
            pack.push(Inclusion::Always, summary.clone(), &mut seen);
        }

        let mandatory = pack.len();
        if let Some(npc) = addressed_npc {
            self.add_npc_memories(state, npc, index, &mut pack, &mut seen);
        }
        if self.config.enabled && self.config.top_k > 0 {
            self.add_retrieved(state, addressed_npc, query_text, index, &mut pack, &mut seen);
        }

        debug!(
            session = %state.session_id,
            always = mandatory,
            retrieved = pack.len() - mandatory,
            elapsed_us = start.elapsed().as_micros(),
            "Context pack assembled"
        );
        Ok(pack)
    }

    /// The addressed NPC's most recent memories, oldest first, up to the
    /// smaller of the summary window and the memory window.
    fn add_npc_memories(
        &self,
        state: &WorldState,
        npc: &NpcId,
        index: &dyn ContextIndex,
        pack: &mut ContextPack,
        seen: &mut HashSet<String>,
    ) {
        let limit = self.config.summary_window.min(self.config.npc_memory_window);
        if limit == 0 {
            return;
        }
        let query = IndexQuery {
            session_id: &state.session_id,
            text: "",
            top_k: limit,
            filter: IndexFilter {
                doc_types: OPTIONAL_TYPES,
                location_id: None,
                npc_id: Some(npc),
            },
        };
        match index.latest(&query) {
            Ok(mut memories) => {
                memories.reverse();
                for doc in memories {
                    pack.push(Inclusion::Retrieved, doc, seen);
                }
            }
            Err(e) => warn!(session = %state.session_id, npc = %npc, error = %e, "NPC memory lookup failed"),
        }
    }

    fn add_retrieved(
        &self,
        state: &WorldState,
        addressed_npc: Option<&NpcId>,
        query_text: &str,
        index: &dyn ContextIndex,
        pack: &mut ContextPack,
        seen: &mut HashSet<String>,
    ) {
        let mut tiers = Vec::with_capacity(2);
        if let Some(npc) = addressed_npc {
            tiers.push(IndexFilter {
                doc_types: OPTIONAL_TYPES,
                location_id: None,
                npc_id: Some(npc),
            });
        }
        tiers.push(IndexFilter {
            doc_types: OPTIONAL_TYPES,
            location_id: Some(&state.player_location),
            npc_id: None,
        });

        let mut added = 0;
        for filter in tiers {
            if added >= self.config.top_k {
                break;
            }
            // Over-fetch by the packed count; packed documents are skipped below.
            let query = IndexQuery {
                session_id: &state.session_id,
                text: query_text,
                top_k: self.config.top_k + seen.len(),
                filter,
            };
            let batch = match index.query(&query) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(session = %state.session_id, error = %e, "Context index query failed");
                    continue;
                }
            };
            for doc in batch {
                if added >= self.config.top_k {
                    break;
                }
                let before = pack.len();
                pack.push(Inclusion::Retrieved, doc, seen);
                added += pack.len() - before;
            }
        }
    }
}
