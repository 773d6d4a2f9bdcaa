//! Legality of proposed location changes.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. the NPC exists (`npc_not_found`)
//! 2. `from_location` is where the NPC actually is (`location_mismatch`)
//! 3. the destination exists (`unknown_destination`)
//! 4. the destination is reachable along directed edges, or a world-bible
//!    allowance covers the hop (`unreachable`)
//!
//! Validation reads the *staged* state, so a second move of the same NPC in
//! one turn starts from wherever the first accepted move left it.

use thiserror::Error;

use crate::turn::MoveProposal;
use crate::types::LocationId;
use crate::world::{ReachabilityGraph, WorldState};

/// Why a move is illegal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalMove {
    /// The NPC does not exist.
    #[error("npc_not_found")]
    NpcNotFound,
    /// The proposal's origin is not the NPC's current location.
    #[error("location_mismatch (at {actual}, proposal says {proposed})")]
    LocationMismatch {
        /// Where the NPC actually is.
        actual: LocationId,
        /// Where the model said it was.
        proposed: LocationId,
    },
    /// The destination is not a known location.
    #[error("unknown_destination")]
    UnknownDestination,
    /// No path and no allowance.
    #[error("unreachable")]
    Unreachable,
}

impl IllegalMove {
    /// Stable snake_case code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NpcNotFound => "npc_not_found",
            Self::LocationMismatch { .. } => "location_mismatch",
            Self::UnknownDestination => "unknown_destination",
            Self::Unreachable => "unreachable",
        }
    }
}

/// Result of a legality check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveLegality {
    /// The move may proceed to the agency gate.
    Legal,
    /// The move must not happen.
    Illegal(IllegalMove),
}

impl MoveLegality {
    /// Whether the move is legal.
    #[must_use]
    pub fn is_legal(&self) -> bool {
        matches!(self, Self::Legal)
    }
}

/// Check a proposed NPC move against the staged state.
#[must_use]
pub fn validate_npc_move(
    proposal: &MoveProposal,
    state: &WorldState,
    graph: &ReachabilityGraph,
) -> MoveLegality {
    if !state.npc_profiles.contains_key(&proposal.npc_id) {
        return MoveLegality::Illegal(IllegalMove::NpcNotFound);
    }
    let Some(actual) = state.npc_locations.get(&proposal.npc_id) else {
        return MoveLegality::Illegal(IllegalMove::NpcNotFound);
    };
    if *actual != proposal.from_location {
        return MoveLegality::Illegal(IllegalMove::LocationMismatch {
            actual: actual.clone(),
            proposed: proposal.from_location.clone(),
        });
    }
    check_route(actual, &proposal.to_location, state, graph)
}

/// Check a player location change.
///
/// The origin is always the player's current location, so only destination
/// and reachability are checked.
#[must_use]
pub fn validate_player_move(
    to: &LocationId,
    state: &WorldState,
    graph: &ReachabilityGraph,
) -> MoveLegality {
    check_route(&state.player_location, to, state, graph)
}

fn check_route(
    from: &LocationId,
    to: &LocationId,
    state: &WorldState,
    graph: &ReachabilityGraph,
) -> MoveLegality {
    let Some(destination) = state.location(to) else {
        return MoveLegality::Illegal(IllegalMove::UnknownDestination);
    };
    if graph.is_reachable(from, to) {
        return MoveLegality::Legal;
    }
    let allowed = state
        .location(from)
        .is_some_and(|origin| state.world_bible.allows_travel(origin, destination));
    if allowed {
        MoveLegality::Legal
    } else {
        MoveLegality::Illegal(IllegalMove::Unreachable)
    }
}
