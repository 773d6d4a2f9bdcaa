//! NPC profiles and their agency parameters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryError};
use crate::types::{LocationId, NpcId};

/// A non-player character as authored by world generation.
///
/// The four agency parameters feed the agency gate; `refusal_style` only
/// flavours narration and never affects a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcProfile {
    /// Stable unique id.
    pub npc_id: NpcId,
    /// Display name.
    pub name: String,
    /// Profession, e.g. `innkeeper`.
    pub profession: String,
    /// Personality traits.
    #[serde(default)]
    pub traits: Vec<String>,
    /// Goals, most important first.
    #[serde(default)]
    pub goals: Vec<String>,
    /// Where the NPC is when the session starts.
    pub starting_location: LocationId,
    /// Willingness to follow instructions, in [0, 1].
    pub obedience_level: f32,
    /// Resistance to being told what to do, in [0, 1].
    pub stubbornness: f32,
    /// Appetite for danger, in [0, 1].
    pub risk_tolerance: f32,
    /// Attitude towards the player, in [-5, 5].
    pub disposition_to_player: i8,
    /// How refusals should sound, e.g. `polite`, `curt`.
    #[serde(default = "default_refusal_style")]
    pub refusal_style: String,
}

impl NpcProfile {
    /// Check agency parameter bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::InvalidWorld`] naming the NPC and the field.
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("obedience_level", self.obedience_level),
            ("stubbornness", self.stubbornness),
            ("risk_tolerance", self.risk_tolerance),
        ];
        for (field, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(StoryError::InvalidWorld(format!(
                    "npc {} {field}={value} outside [0, 1]",
                    self.npc_id
                )));
            }
        }
        if !(-5..=5).contains(&self.disposition_to_player) {
            return Err(StoryError::InvalidWorld(format!(
                "npc {} disposition_to_player={} outside [-5, 5]",
                self.npc_id, self.disposition_to_player
            )));
        }
        Ok(())
    }
}

fn default_refusal_style() -> String {
    "polite".to_string()
}
