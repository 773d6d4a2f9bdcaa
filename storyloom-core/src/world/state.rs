//! The live, per-session world state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryError};
use crate::retrieval::ContextDocument;
use crate::types::{LocationId, NpcId, SessionId};
use crate::world::bible::WorldBible;
use crate::world::location::Location;
use crate::world::npc::NpcProfile;
use crate::world::snapshot::WorldSnapshot;

/// Descriptive metadata carried over from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMeta {
    /// Identifier of the generated world.
    pub world_id: String,
    /// Title shown to the player.
    pub title: String,
    /// Opening narration hook.
    pub starting_hook: String,
    /// The first quest offered.
    pub initial_quest: String,
}

/// Everything that is true about one session right now.
///
/// `npc_locations` changes only through the state mutator. `inventory` and
/// `quest_flags` change only through delivery actions, never through a
/// model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Owning session.
    pub session_id: SessionId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// World metadata.
    pub world: WorldMeta,
    /// Setting rules.
    pub world_bible: WorldBible,
    /// Location nodes by id.
    pub locations: BTreeMap<LocationId, Location>,
    /// NPC profiles by id.
    pub npc_profiles: BTreeMap<NpcId, NpcProfile>,
    /// Where the player is.
    pub player_location: LocationId,
    /// Where every NPC is.
    pub npc_locations: BTreeMap<NpcId, LocationId>,
    /// Item counts held by the player.
    #[serde(default)]
    pub inventory: BTreeMap<String, u32>,
    /// Quest progress flags.
    #[serde(default)]
    pub quest_flags: BTreeMap<String, bool>,
    /// Append-only turn summary documents, oldest first.
    #[serde(default)]
    pub turn_summaries: Vec<ContextDocument>,
    /// Id of the most recent committed turn; 0 before the first turn.
    #[serde(default)]
    pub last_turn_id: u64,
}

impl WorldState {
    /// Build the initial state of a session from a validated snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::InvalidWorld`] if the snapshot fails validation.
    pub fn from_snapshot(
        snapshot: &WorldSnapshot,
        session_id: SessionId,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        snapshot.validate()?;

        let locations = snapshot
            .locations
            .iter()
            .map(|l| (l.location_id.clone(), l.clone()))
            .collect();
        let npc_profiles = snapshot
            .npcs
            .iter()
            .map(|n| (n.npc_id.clone(), n.clone()))
            .collect();
        let npc_locations = snapshot
            .npcs
            .iter()
            .map(|n| (n.npc_id.clone(), n.starting_location.clone()))
            .collect();

        Ok(Self {
            session_id,
            created_at,
            world: WorldMeta {
                world_id: snapshot.world_id.clone(),
                title: snapshot.title.clone(),
                starting_hook: snapshot.starting_hook.clone(),
                initial_quest: snapshot.initial_quest.clone(),
            },
            world_bible: snapshot.world_bible.clone(),
            locations,
            npc_profiles,
            player_location: snapshot.starting_location.clone(),
            npc_locations,
            inventory: BTreeMap::new(),
            quest_flags: BTreeMap::new(),
            turn_summaries: Vec::new(),
            last_turn_id: 0,
        })
    }

    /// Check that every location reference resolves, every NPC has exactly
    /// one location and every agency parameter is within bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::InvalidWorld`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if !self.locations.contains_key(&self.player_location) {
            return Err(StoryError::InvalidWorld(format!(
                "player is at unknown location {}",
                self.player_location
            )));
        }
        for (npc_id, profile) in &self.npc_profiles {
            profile.validate()?;
            match self.npc_locations.get(npc_id) {
                Some(loc) if self.locations.contains_key(loc) => {}
                Some(loc) => {
                    return Err(StoryError::InvalidWorld(format!(
                        "npc {npc_id} is at unknown location {loc}"
                    )));
                }
                None => {
                    return Err(StoryError::InvalidWorld(format!(
                        "npc {npc_id} has no location"
                    )));
                }
            }
        }
        if let Some(stray) = self
            .npc_locations
            .keys()
            .find(|id| !self.npc_profiles.contains_key(*id))
        {
            return Err(StoryError::InvalidWorld(format!(
                "location recorded for unknown npc {stray}"
            )));
        }
        Ok(())
    }

    /// Look up a location.
    #[must_use]
    pub fn location(&self, id: &LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    /// Look up an NPC profile.
    #[must_use]
    pub fn npc(&self, id: &NpcId) -> Option<&NpcProfile> {
        self.npc_profiles.get(id)
    }

    /// NPCs currently at `location`, in id order.
    #[must_use]
    pub fn npcs_at(&self, location: &LocationId) -> Vec<&NpcId> {
        self.npc_locations
            .iter()
            .filter(|(_, at)| *at == location)
            .map(|(id, _)| id)
            .collect()
    }

    /// The `n` most recent turn summaries, oldest first.
    #[must_use]
    pub fn recent_summaries(&self, n: usize) -> &[ContextDocument] {
        let start = self.turn_summaries.len().saturating_sub(n);
        &self.turn_summaries[start..]
    }
}
