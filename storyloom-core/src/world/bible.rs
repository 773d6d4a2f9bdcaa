//! The world bible: tone, rules and the terms the narration must avoid.

use serde::{Deserialize, Serialize};

use crate::types::LocationId;
use crate::world::location::Location;

/// A structured exception to graph reachability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TravelAllowance {
    /// A specific edge that may be travelled even without a graph path.
    Edge {
        /// Origin of the allowed hop.
        from: LocationId,
        /// Destination of the allowed hop.
        to: LocationId,
        /// Also allow `to → from`.
        #[serde(default)]
        bidirectional: bool,
    },
    /// Any move touching a location carrying this tag (ferries, portals).
    Tag {
        /// The tag, matched case-insensitively.
        tag: String,
    },
}

impl TravelAllowance {
    /// Whether this allowance covers a move from `from` to `to`.
    #[must_use]
    pub fn covers(&self, from: &Location, to: &Location) -> bool {
        match self {
            Self::Edge {
                from: a,
                to: b,
                bidirectional,
            } => {
                (*a == from.location_id && *b == to.location_id)
                    || (*bidirectional && *a == to.location_id && *b == from.location_id)
            }
            Self::Tag { tag } => from.has_tag(tag) || to.has_tag(tag),
        }
    }
}

/// Setting rules shared by every prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBible {
    /// Technology level, e.g. `medieval`.
    #[serde(default)]
    pub tech_level: String,
    /// How magic works, if at all.
    #[serde(default)]
    pub magic_rules: String,
    /// Narrative tone.
    #[serde(default)]
    pub tone: String,
    /// Subjects that must not appear.
    #[serde(default)]
    pub taboos: Vec<String>,
    /// Names or facts the narration must not reveal.
    #[serde(default)]
    pub do_not_mention: Vec<String>,
    /// Out-of-setting objects and concepts.
    #[serde(default)]
    pub anachronism_blocklist: Vec<String>,
    /// Reachability exceptions.
    #[serde(default)]
    pub special_travel: Vec<TravelAllowance>,
}

impl WorldBible {
    /// True when the bible carries no usable setting text.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.tech_level.trim().is_empty()
            && self.magic_rules.trim().is_empty()
            && self.tone.trim().is_empty()
    }

    /// Whether any allowance covers the move `from → to`.
    #[must_use]
    pub fn allows_travel(&self, from: &Location, to: &Location) -> bool {
        self.special_travel.iter().any(|a| a.covers(from, to))
    }

    /// Whether the setting is medieval, which enables the default
    /// anachronism list.
    #[must_use]
    pub fn is_medieval(&self) -> bool {
        self.tech_level.to_lowercase().contains("medieval")
    }
}
