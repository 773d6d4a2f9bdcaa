//! Turn contracts: the validated model output and the durable turn record.

use std::fmt;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::types::{LocationId, NpcId, SessionId};

// ---------------------------------------------------------------------------
// Model output
// ---------------------------------------------------------------------------

/// What caused a proposed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The player asked for it.
    PlayerInstruction,
    /// The story moved the NPC on its own.
    StoryEvent,
}

impl Trigger {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlayerInstruction => "player_instruction",
            Self::StoryEvent => "story_event",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "player_instruction" => Some(Self::PlayerInstruction),
            "story_event" => Some(Self::StoryEvent),
            _ => None,
        }
    }
}

/// How long a proposed move is meant to last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permanence {
    /// A short errand.
    Temporary,
    /// Until something else moves the NPC.
    UntilFurtherNotice,
    /// For good.
    Permanent,
}

impl Permanence {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::UntilFurtherNotice => "until_further_notice",
            Self::Permanent => "permanent",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "temporary" => Some(Self::Temporary),
            "until_further_notice" => Some(Self::UntilFurtherNotice),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// A model-proposed NPC relocation. Never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveProposal {
    /// NPC to move.
    pub npc_id: NpcId,
    /// Where the model believes the NPC is.
    pub from_location: LocationId,
    /// Where the model wants the NPC to go.
    pub to_location: LocationId,
    /// What caused the move.
    pub trigger: Trigger,
    /// Free-text justification.
    pub reason: String,
    /// Intended duration.
    pub permanence: Permanence,
    /// Model self-reported confidence in [0, 1]; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<OrderedFloat<f32>>,
}

/// One spoken line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    /// Speaker.
    pub npc_id: NpcId,
    /// What was said.
    pub line: String,
}

/// Proposed world changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldUpdates {
    /// New player location, if the player moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_location: Option<LocationId>,
    /// Proposed NPC moves in the order the model listed them.
    #[serde(default)]
    pub npc_moves: Vec<MoveProposal>,
}

/// The model's safety self-assessment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlag {
    /// The model declined to continue the scene.
    pub refusal: bool,
    /// Why, if it said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A structurally valid model response for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutput {
    /// Narration shown to the player.
    pub narration: String,
    /// NPC lines in speaking order.
    pub npc_dialogue: Vec<DialogueLine>,
    /// Proposed changes.
    pub world_updates: WorldUpdates,
    /// One-line summary stored as a turn_summary document.
    pub memory_summary: String,
    /// Refusal flag.
    pub safety: SafetyFlag,
}

impl TurnOutput {
    /// Every player-visible text field with its JSON path, for guards that
    /// scan output.
    #[must_use]
    pub fn visible_text(&self) -> Vec<(String, &str)> {
        let mut fields = vec![("narration".to_string(), self.narration.as_str())];
        for (i, line) in self.npc_dialogue.iter().enumerate() {
            fields.push((format!("npc_dialogue[{i}].line"), line.line.as_str()));
        }
        fields.push(("memory_summary".to_string(), self.memory_summary.as_str()));
        fields
    }
}

// ---------------------------------------------------------------------------
// Agency outcome
// ---------------------------------------------------------------------------

/// An NPC declined a proposed move. An outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyRefusal {
    /// Turn in which the refusal happened.
    pub turn_id: u64,
    /// Who refused.
    pub npc_id: NpcId,
    /// Where they stayed.
    pub from_location: LocationId,
    /// Where they were asked to go.
    pub to_location: LocationId,
    /// Joined refusal factors, e.g. `stubbornness_high_goal_misaligned`.
    pub code: String,
    /// The NPC's refusal style.
    pub refusal_style: String,
    /// The acceptance score that fell short.
    pub score: OrderedFloat<f32>,
}

impl fmt::Display for AgencyRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} refused to move {} -> {} ({})",
            self.npc_id, self.from_location, self.to_location, self.code
        )
    }
}

// ---------------------------------------------------------------------------
// Turn record
// ---------------------------------------------------------------------------

/// What happened to one proposed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MoveStatus {
    /// The NPC moved.
    Applied,
    /// The NPC declined.
    Refused {
        /// Refusal code.
        code: String,
    },
    /// The move was illegal and dropped under the reject policy.
    Rejected {
        /// Legality failure code.
        reason: String,
    },
}

/// A proposal paired with its fate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResolution {
    /// The proposal as the model sent it.
    pub proposal: MoveProposal,
    /// What the engine did with it.
    #[serde(flatten)]
    pub status: MoveStatus,
}

/// How a committed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Output validated and world updates were resolved.
    Applied,
    /// The model flagged a refusal; no world updates.
    SafetyRefusal,
    /// Consistency retries ran out; a templated refusal was committed.
    ConsistencyFallback,
}

/// Append-only log entry for one committed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Owning session.
    pub session_id: SessionId,
    /// Sequential turn id, starting at 1.
    pub turn_id: u64,
    /// When the turn committed.
    pub timestamp: DateTime<Utc>,
    /// Raw player input.
    pub player_text: String,
    /// NPC the player addressed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressed_npc: Option<NpcId>,
    /// Player location when the turn started.
    pub location_id: LocationId,
    /// Model that produced the output.
    pub model_used: String,
    /// Generation attempts, including the first.
    pub attempts: u32,
    /// How the turn ended.
    pub outcome: TurnOutcome,
    /// The output that was committed.
    pub output: TurnOutput,
    /// Per-move fate, in proposal order.
    #[serde(default)]
    pub move_resolutions: Vec<MoveResolution>,
    /// Agency refusals raised this turn.
    #[serde(default)]
    pub refusals: Vec<AgencyRefusal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for t in [Trigger::PlayerInstruction, Trigger::StoryEvent] {
            assert_eq!(Trigger::from_wire(t.as_str()), Some(t));
        }
        for p in [
            Permanence::Temporary,
            Permanence::UntilFurtherNotice,
            Permanence::Permanent,
        ] {
            assert_eq!(Permanence::from_wire(p.as_str()), Some(p));
        }
        assert_eq!(Trigger::from_wire("system"), None);
    }

    #[test]
    fn move_resolution_is_flat_on_the_wire() {
        let resolution = MoveResolution {
            proposal: MoveProposal {
                npc_id: NpcId::new("npc_1"),
                from_location: LocationId::new("a"),
                to_location: LocationId::new("b"),
                trigger: Trigger::StoryEvent,
                reason: "errand".to_string(),
                permanence: Permanence::Temporary,
                confidence: None,
            },
            status: MoveStatus::Refused {
                code: "low_compliance".to_string(),
            },
        };
        let json = serde_json::to_value(&resolution).expect("serializes");
        assert_eq!(json["status"], "refused");
        assert_eq!(json["code"], "low_compliance");
        assert!(json["proposal"].get("confidence").is_none());
    }

    #[test]
    fn visible_text_lists_every_spoken_field() {
        let output = TurnOutput {
            narration: "n".to_string(),
            npc_dialogue: vec![
                DialogueLine {
                    npc_id: NpcId::new("a"),
                    line: "one".to_string(),
                },
                DialogueLine {
                    npc_id: NpcId::new("b"),
                    line: "two".to_string(),
                },
            ],
            world_updates: WorldUpdates::default(),
            memory_summary: "s".to_string(),
            safety: SafetyFlag::default(),
        };
        let paths: Vec<String> = output.visible_text().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            ["narration", "npc_dialogue[0].line", "npc_dialogue[1].line", "memory_summary"]
        );
    }
}
