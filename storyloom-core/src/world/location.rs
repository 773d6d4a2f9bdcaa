//! Location nodes of the world graph.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::LocationId;

/// Broad category of a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    /// A town.
    Town,
    /// A village.
    Village,
    /// A shop.
    Shop,
    /// A tavern or inn.
    Tavern,
    /// A market square.
    Market,
    /// A temple or shrine.
    Temple,
    /// A castle or keep.
    Castle,
    /// A forest.
    Forest,
    /// A dungeon.
    Dungeon,
    /// A cave.
    Cave,
    /// A bridge.
    Bridge,
    /// Ruins.
    Ruins,
    /// A swamp.
    Swamp,
    /// A road.
    Road,
    /// Anything else, including unrecognised kinds in world files.
    #[serde(other)]
    Other,
}

impl LocationKind {
    /// Lowercase name as it appears in world files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Town => "town",
            Self::Village => "village",
            Self::Shop => "shop",
            Self::Tavern => "tavern",
            Self::Market => "market",
            Self::Temple => "temple",
            Self::Castle => "castle",
            Self::Forest => "forest",
            Self::Dungeon => "dungeon",
            Self::Cave => "cave",
            Self::Bridge => "bridge",
            Self::Ruins => "ruins",
            Self::Swamp => "swamp",
            Self::Road => "road",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A place the player and NPCs can be.
///
/// Immutable once the world is created; only *who is where* changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Stable unique id.
    pub location_id: LocationId,
    /// Display name.
    pub name: String,
    /// Category.
    pub kind: LocationKind,
    /// Prose description used in prompts.
    pub description: String,
    /// Directed edges: locations directly reachable from here.
    #[serde(default)]
    pub connected_to: BTreeSet<LocationId>,
    /// Free-form labels, e.g. `danger` or a special-travel tag.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Location {
    /// Case-insensitive tag lookup.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Lowercased name, kind, description and tags in one string, for
    /// keyword heuristics.
    #[must_use]
    pub fn search_text(&self) -> String {
        let mut text = format!("{} {} {}", self.name, self.kind, self.description);
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text.to_lowercase()
    }
}
