//! The write-once output of world generation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryError};
use crate::types::{LocationId, NpcId};
use crate::world::bible::{TravelAllowance, WorldBible};
use crate::world::location::Location;
use crate::world::npc::NpcProfile;

/// A complete generated world, consumed once when a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Identifier of the generated world.
    pub world_id: String,
    /// Title shown to the player.
    pub title: String,
    /// Setting rules.
    pub world_bible: WorldBible,
    /// All location nodes.
    pub locations: Vec<Location>,
    /// The NPC roster.
    pub npcs: Vec<NpcProfile>,
    /// Where the player begins.
    pub starting_location: LocationId,
    /// Opening narration hook.
    #[serde(default)]
    pub starting_hook: String,
    /// The first quest offered.
    #[serde(default)]
    pub initial_quest: String,
}

impl WorldSnapshot {
    /// Check referential integrity and agency bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::InvalidWorld`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StoryError::InvalidWorld(msg));

        if self.locations.is_empty() {
            return invalid("world has no locations".to_string());
        }

        let mut ids: BTreeSet<&LocationId> = BTreeSet::new();
        for loc in &self.locations {
            if !ids.insert(&loc.location_id) {
                return invalid(format!("duplicate location id {}", loc.location_id));
            }
        }

        for loc in &self.locations {
            if let Some(missing) = loc.connected_to.iter().find(|to| !ids.contains(to)) {
                return invalid(format!(
                    "location {} connects to unknown location {missing}",
                    loc.location_id
                ));
            }
        }

        if !ids.contains(&self.starting_location) {
            return invalid(format!(
                "starting location {} does not exist",
                self.starting_location
            ));
        }

        let mut npc_ids: BTreeSet<&NpcId> = BTreeSet::new();
        for npc in &self.npcs {
            if !npc_ids.insert(&npc.npc_id) {
                return invalid(format!("duplicate npc id {}", npc.npc_id));
            }
            if !ids.contains(&npc.starting_location) {
                return invalid(format!(
                    "npc {} starts at unknown location {}",
                    npc.npc_id, npc.starting_location
                ));
            }
            npc.validate()?;
        }

        for allowance in &self.world_bible.special_travel {
            if let TravelAllowance::Edge { from, to, .. } = allowance {
                if !ids.contains(from) || !ids.contains(to) {
                    return invalid(format!(
                        "special travel edge {from} -> {to} references an unknown location"
                    ));
                }
            }
        }

        Ok(())
    }
}
