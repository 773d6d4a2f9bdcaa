//! Context documents and their builders.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::crc32_hex;
use crate::turn::AgencyRefusal;
use crate::types::{LocationId, NpcId, SessionId};
use crate::world::WorldState;

/// What a context document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// Setting rules and rosters.
    WorldBible,
    /// One location.
    Location,
    /// One NPC profile.
    NpcProfile,
    /// The memory summary of one committed turn.
    TurnSummary,
    /// Something that happened during a turn, e.g. an agency refusal.
    Event,
}

impl DocType {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorldBible => "world_bible",
            Self::Location => "location",
            Self::NpcProfile => "npc_profile",
            Self::TurnSummary => "turn_summary",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of prompt context. Append-only per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    /// Stable id derived from metadata and a digest of the text.
    pub doc_id: String,
    /// Category.
    pub doc_type: DocType,
    /// Owning session.
    pub session_id: SessionId,
    /// Location the document is about or happened at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    /// NPC the document is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npc_id: Option<NpcId>,
    /// Turn that produced the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<u64>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Body text.
    pub text: String,
}

impl ContextDocument {
    fn new(
        doc_type: DocType,
        session_id: &SessionId,
        timestamp: DateTime<Utc>,
        text: String,
    ) -> Self {
        Self {
            doc_id: String::new(),
            doc_type,
            session_id: session_id.clone(),
            location_id: None,
            npc_id: None,
            turn_id: None,
            timestamp,
            text,
        }
    }

    fn with_location(mut self, id: &LocationId) -> Self {
        self.location_id = Some(id.clone());
        self
    }

    fn with_npc(mut self, id: &NpcId) -> Self {
        self.npc_id = Some(id.clone());
        self
    }

    fn with_turn(mut self, turn_id: u64) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    fn sealed(mut self) -> Self {
        self.doc_id = self.compute_id();
        self
    }

    /// `session:type:npc:location:turn:crc32(text)`, with `-` for absent
    /// fields. The same content always yields the same id.
    #[must_use]
    pub fn compute_id(&self) -> String {
        let dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.session_id,
            self.doc_type,
            dash(self.npc_id.as_ref().map(ToString::to_string)),
            dash(self.location_id.as_ref().map(ToString::to_string)),
            dash(self.turn_id.map(|t| t.to_string())),
            crc32_hex(self.text.as_bytes()),
        )
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// The world bible document, including NPC and location rosters.
#[must_use]
pub fn world_bible_doc(state: &WorldState) -> ContextDocument {
    let bible = &state.world_bible;
    let mut parts = vec![
        format!("Title: {}", state.world.title),
        format!("Tech level: {}", bible.tech_level),
        format!("Magic rules: {}", bible.magic_rules),
        format!("Tone: {}", bible.tone),
    ];
    if !bible.taboos.is_empty() {
        parts.push(format!("Taboos: {}", bible.taboos.join(", ")));
    }
    if !bible.do_not_mention.is_empty() {
        parts.push(format!("Do not mention: {}", bible.do_not_mention.join(", ")));
    }
    if !bible.anachronism_blocklist.is_empty() {
        parts.push(format!(
            "Anachronism blocklist: {}",
            bible.anachronism_blocklist.join(", ")
        ));
    }
    parts.push(format!("Starting hook: {}", state.world.starting_hook));
    parts.push(format!("Initial quest: {}", state.world.initial_quest));

    if !state.npc_profiles.is_empty() {
        let roster: Vec<String> = state
            .npc_profiles
            .values()
            .map(|n| format!("{}: {} ({}) @ {}", n.npc_id, n.name, n.profession, n.starting_location))
            .collect();
        parts.push(format!("NPC roster: {}", roster.join("; ")));
    }
    let places: Vec<String> = state
        .locations
        .values()
        .map(|l| format!("{}: {}", l.location_id, l.name))
        .collect();
    parts.push(format!("Location roster: {}", places.join("; ")));

    ContextDocument::new(
        DocType::WorldBible,
        &state.session_id,
        state.created_at,
        parts.join("\n"),
    )
    .sealed()
}

/// The document for one location, or `None` if it does not exist.
#[must_use]
pub fn location_doc(state: &WorldState, id: &LocationId) -> Option<ContextDocument> {
    let loc = state.location(id)?;
    let mut parts = vec![
        format!("Location: {}", loc.name),
        format!("Kind: {}", loc.kind),
        format!("Description: {}", loc.description),
    ];
    if !loc.tags.is_empty() {
        let tags: Vec<&str> = loc.tags.iter().map(String::as_str).collect();
        parts.push(format!("Tags: {}", tags.join(", ")));
    }
    let exits: Vec<String> = loc
        .connected_to
        .iter()
        .filter_map(|to| state.location(to).map(|l| format!("{} ({})", l.name, l.location_id)))
        .collect();
    if !exits.is_empty() {
        parts.push(format!("Exits: {}", exits.join(", ")));
    }

    Some(
        ContextDocument::new(DocType::Location, &state.session_id, state.created_at, parts.join("\n"))
            .with_location(id)
            .sealed(),
    )
}

/// The profile document for one NPC, or `None` if it does not exist.
#[must_use]
pub fn npc_profile_doc(state: &WorldState, id: &NpcId) -> Option<ContextDocument> {
    let npc = state.npc(id)?;
    let text = [
        format!("NPC: {} ({})", npc.name, npc.profession),
        format!("Traits: {}", npc.traits.join(", ")),
        format!("Goals: {}", npc.goals.join(", ")),
        format!("Starting location: {}", npc.starting_location),
        format!("Obedience: {}", npc.obedience_level),
        format!("Stubbornness: {}", npc.stubbornness),
        format!("Risk tolerance: {}", npc.risk_tolerance),
        format!("Disposition to player: {}", npc.disposition_to_player),
        format!("Refusal style: {}", npc.refusal_style),
    ]
    .join("\n");

    Some(
        ContextDocument::new(DocType::NpcProfile, &state.session_id, state.created_at, text)
            .with_npc(id)
            .sealed(),
    )
}

/// Every static document of a session: bible, locations, NPC profiles.
#[must_use]
pub fn static_docs(state: &WorldState) -> Vec<ContextDocument> {
    let mut docs = vec![world_bible_doc(state)];
    docs.extend(state.locations.keys().filter_map(|id| location_doc(state, id)));
    docs.extend(state.npc_profiles.keys().filter_map(|id| npc_profile_doc(state, id)));
    docs
}

/// The turn_summary document for a committed turn.
#[must_use]
pub fn turn_summary_doc(
    session_id: &SessionId,
    turn_id: u64,
    timestamp: DateTime<Utc>,
    location: &LocationId,
    addressed_npc: Option<&NpcId>,
    summary: &str,
) -> ContextDocument {
    let mut doc = ContextDocument::new(DocType::TurnSummary, session_id, timestamp, summary.to_string())
        .with_location(location)
        .with_turn(turn_id);
    if let Some(npc) = addressed_npc {
        doc = doc.with_npc(npc);
    }
    doc.sealed()
}

/// An event document recording an agency refusal.
#[must_use]
pub fn refusal_event_doc(
    session_id: &SessionId,
    timestamp: DateTime<Utc>,
    refusal: &AgencyRefusal,
) -> ContextDocument {
    let text = format!(
        "{} refused to go from {} to {} ({}).",
        refusal.npc_id, refusal.from_location, refusal.to_location, refusal.code
    );
    ContextDocument::new(DocType::Event, session_id, timestamp, text)
        .with_location(&refusal.from_location)
        .with_npc(&refusal.npc_id)
        .with_turn(refusal.turn_id)
        .sealed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::sample;

    fn state() -> WorldState {
        WorldState::from_snapshot(
            &sample::hollowmere(),
            SessionId::parse("doc_test").expect("valid id"),
            Utc::now(),
        )
        .expect("sample builds")
    }

    #[test]
    fn doc_ids_are_stable_and_content_addressed() {
        let state = state();
        let a = world_bible_doc(&state);
        let b = world_bible_doc(&state);
        assert_eq!(a.doc_id, b.doc_id);
        assert!(a.doc_id.starts_with("doc_test:world_bible:-:-:-:"));

        let loc = location_doc(&state, &LocationId::new("loc_001")).expect("exists");
        assert!(loc.doc_id.starts_with("doc_test:location:-:loc_001:-:"));
        assert_ne!(a.doc_id, loc.doc_id);
    }

    #[test]
    fn missing_entities_yield_none() {
        let state = state();
        assert!(location_doc(&state, &LocationId::new("nope")).is_none());
        assert!(npc_profile_doc(&state, &NpcId::new("nope")).is_none());
    }

    #[test]
    fn world_bible_doc_lists_rosters() {
        let doc = world_bible_doc(&state());
        assert!(doc.text.contains("Tech level: medieval"));
        assert!(doc.text.contains("npc_007: Edda Quill (archivist) @ loc_001"));
        assert!(doc.text.contains("loc_006: Ferry Landing"));
    }

    #[test]
    fn npc_profile_doc_includes_agency_traits() {
        let doc = npc_profile_doc(&state(), &NpcId::new("npc_007")).expect("exists");
        assert!(doc.text.contains("Stubbornness: 0.9"));
        assert_eq!(doc.npc_id.as_ref().map(NpcId::as_str), Some("npc_007"));
    }

    #[test]
    fn static_docs_cover_every_entity() {
        let state = state();
        let docs = static_docs(&state);
        assert_eq!(docs.len(), 1 + state.locations.len() + state.npc_profiles.len());
    }

    #[test]
    fn summary_doc_carries_turn_metadata() {
        let session = SessionId::parse("s1").expect("valid");
        let doc = turn_summary_doc(
            &session,
            4,
            Utc::now(),
            &LocationId::new("loc_001"),
            Some(&NpcId::new("npc_001")),
            "Mara agreed to carry the letter.",
        );
        assert_eq!(doc.doc_type, DocType::TurnSummary);
        assert_eq!(doc.turn_id, Some(4));
        assert!(doc.doc_id.starts_with("s1:turn_summary:npc_001:loc_001:4:"));
    }
}
