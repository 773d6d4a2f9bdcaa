//! Turn resolution on a staged copy of the world.
//!
//! [`resolve_turn`] never touches the live [`WorldState`]. It clones it,
//! validates and gates every proposed move against the clone, applies what
//! survives and hands the clone back. The caller swaps it in only after the
//! turn has been persisted.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::agency::{AgencyDecision, AgencyGate};
use crate::config::MovePolicy;
use crate::error::{MoveSubject, TurnError};
use crate::movement::{MoveLegality, validate_npc_move, validate_player_move};
use crate::retrieval::ContextDocument;
use crate::retrieval::document::{refusal_event_doc, turn_summary_doc};
use crate::turn::{AgencyRefusal, MoveResolution, MoveStatus, TurnOutput};
use crate::types::NpcId;
use crate::world::{ReachabilityGraph, WorldState};

/// Per-turn inputs that do not come from the model.
#[derive(Debug, Clone)]
pub struct TurnMeta {
    /// Commit time of the turn.
    pub timestamp: DateTime<Utc>,
    /// NPC the player addressed, if any.
    pub addressed_npc: Option<NpcId>,
}

/// The staged result of one turn.
#[derive(Debug, Clone)]
pub struct ResolvedTurn {
    /// The world after this turn.
    pub state: WorldState,
    /// Fate of every proposed NPC move, in proposal order.
    pub resolutions: Vec<MoveResolution>,
    /// Moves the agency gate refused.
    pub refusals: Vec<AgencyRefusal>,
    /// The appended turn summary; `None` for refusal turns.
    pub summary_doc: Option<ContextDocument>,
    /// One `event` document per refusal.
    pub event_docs: Vec<ContextDocument>,
}

impl ResolvedTurn {
    /// The id this turn was committed under.
    #[must_use]
    pub fn turn_id(&self) -> u64 {
        self.state.last_turn_id
    }
}

/// Resolve a validated model output against `state`.
///
/// A refusal output skips world updates and adds no summary; the turn id
/// still advances. Inventory and quest flags are left as they are.
///
/// # Errors
///
/// Returns [`TurnError::MovementIllegal`] for the first illegal move when
/// `policy` is [`MovePolicy::Abort`]. Under [`MovePolicy::Reject`] illegal
/// NPC moves are recorded as rejected and an illegal player move is ignored.
pub fn resolve_turn(
    state: &WorldState,
    output: &TurnOutput,
    graph: &ReachabilityGraph,
    gate: &AgencyGate,
    policy: MovePolicy,
    meta: &TurnMeta,
) -> Result<ResolvedTurn, TurnError> {
    let mut staged = state.clone();
    let turn_id = state.last_turn_id + 1;
    let started_at = state.player_location.clone();

    let mut resolutions = Vec::new();
    let mut refusals = Vec::new();
    let mut event_docs = Vec::new();

    if output.safety.refusal {
        staged.last_turn_id = turn_id;
        debug!(session = %state.session_id, turn = turn_id, "Refusal turn, world updates skipped");
        return Ok(ResolvedTurn {
            state: staged,
            resolutions,
            refusals,
            summary_doc: None,
            event_docs,
        });
    }

    if let Some(to) = &output.world_updates.player_location {
        match validate_player_move(to, &staged, graph) {
            MoveLegality::Legal => staged.player_location = to.clone(),
            MoveLegality::Illegal(reason) => match policy {
                MovePolicy::Abort => {
                    return Err(TurnError::MovementIllegal {
                        subject: MoveSubject::Player,
                        reason,
                    });
                }
                MovePolicy::Reject => {
                    warn!(session = %state.session_id, turn = turn_id, to = %to, reason = %reason, "Player move rejected");
                }
            },
        }
    }

    for proposal in &output.world_updates.npc_moves {
        if let MoveLegality::Illegal(reason) = validate_npc_move(proposal, &staged, graph) {
            match policy {
                MovePolicy::Abort => {
                    return Err(TurnError::MovementIllegal {
                        subject: MoveSubject::Npc(proposal.npc_id.clone()),
                        reason,
                    });
                }
                MovePolicy::Reject => {
                    warn!(
                        session = %state.session_id,
                        turn = turn_id,
                        npc = %proposal.npc_id,
                        reason = %reason,
                        "NPC move rejected"
                    );
                    resolutions.push(MoveResolution {
                        proposal: proposal.clone(),
                        status: MoveStatus::Rejected {
                            reason: reason.code().to_string(),
                        },
                    });
                    continue;
                }
            }
        }

        // Legal implies both the profile and the destination exist.
        let (Some(npc), Some(destination)) = (
            staged.npc(&proposal.npc_id),
            staged.location(&proposal.to_location),
        ) else {
            continue;
        };

        match gate.decide(npc, proposal, destination) {
            AgencyDecision::Accept { score } => {
                debug!(
                    session = %state.session_id,
                    turn = turn_id,
                    npc = %proposal.npc_id,
                    to = %proposal.to_location,
                    score = score.0,
                    "NPC move accepted"
                );
                staged
                    .npc_locations
                    .insert(proposal.npc_id.clone(), proposal.to_location.clone());
                resolutions.push(MoveResolution {
                    proposal: proposal.clone(),
                    status: MoveStatus::Applied,
                });
            }
            AgencyDecision::Refuse(refusal) => {
                let event = AgencyRefusal {
                    turn_id,
                    npc_id: proposal.npc_id.clone(),
                    from_location: proposal.from_location.clone(),
                    to_location: proposal.to_location.clone(),
                    code: refusal.code.clone(),
                    refusal_style: refusal.refusal_style,
                    score: refusal.score,
                };
                info!(
                    session = %state.session_id,
                    turn = turn_id,
                    npc = %event.npc_id,
                    to = %event.to_location,
                    code = %event.code,
                    score = event.score.0,
                    "Agency refusal"
                );
                event_docs.push(refusal_event_doc(&state.session_id, meta.timestamp, &event));
                resolutions.push(MoveResolution {
                    proposal: proposal.clone(),
                    status: MoveStatus::Refused { code: refusal.code },
                });
                refusals.push(event);
            }
        }
    }

    let summary = turn_summary_doc(
        &state.session_id,
        turn_id,
        meta.timestamp,
        &started_at,
        meta.addressed_npc.as_ref(),
        &output.memory_summary,
    );
    staged.turn_summaries.push(summary.clone());
    staged.last_turn_id = turn_id;

    Ok(ResolvedTurn {
        state: staged,
        resolutions,
        refusals,
        summary_doc: Some(summary),
        event_docs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgencyConfig;
    use crate::movement::IllegalMove;
    use crate::turn::{MoveProposal, Permanence, SafetyFlag, Trigger, WorldUpdates};
    use crate::types::{LocationId, SessionId};
    use crate::world::sample;

    fn fixture() -> (WorldState, ReachabilityGraph, AgencyGate) {
        let state = WorldState::from_snapshot(
            &sample::hollowmere(),
            SessionId::parse("mut").expect("valid"),
            Utc::now(),
        )
        .expect("sample builds");
        let graph = ReachabilityGraph::build(state.locations.values());
        (state, graph, AgencyGate::new(AgencyConfig::default()))
    }

    fn meta() -> TurnMeta {
        TurnMeta {
            timestamp: Utc::now(),
            addressed_npc: None,
        }
    }

    fn mv(npc: &str, from: &str, to: &str) -> MoveProposal {
        MoveProposal {
            npc_id: NpcId::new(npc),
            from_location: LocationId::new(from),
            to_location: LocationId::new(to),
            trigger: Trigger::PlayerInstruction,
            reason: "asked".to_string(),
            permanence: Permanence::Temporary,
            confidence: None,
        }
    }

    fn output(player: Option<&str>, moves: Vec<MoveProposal>) -> TurnOutput {
        TurnOutput {
            narration: "The square bustles.".to_string(),
            npc_dialogue: Vec::new(),
            world_updates: WorldUpdates {
                player_location: player.map(LocationId::new),
                npc_moves: moves,
            },
            memory_summary: "Something happened.".to_string(),
            safety: SafetyFlag::default(),
        }
    }

    #[test]
    fn accepted_move_changes_only_that_npc() {
        let (state, graph, gate) = fixture();
        let out = output(None, vec![mv("npc_001", "loc_001", "loc_002")]);
        let resolved =
            resolve_turn(&state, &out, &graph, &gate, MovePolicy::Abort, &meta()).expect("resolves");

        assert_eq!(resolved.state.npc_locations[&NpcId::new("npc_001")], LocationId::new("loc_002"));
        for (npc, loc) in &state.npc_locations {
            if npc.as_str() != "npc_001" {
                assert_eq!(&resolved.state.npc_locations[npc], loc);
            }
        }
        assert_eq!(resolved.turn_id(), 1);
        assert_eq!(resolved.state.turn_summaries.len(), 1);
        assert_eq!(resolved.resolutions[0].status, MoveStatus::Applied);
    }

    #[test]
    fn refused_move_records_event_and_stays() {
        let (state, graph, gate) = fixture();
        let out = output(None, vec![mv("npc_007", "loc_001", "loc_003")]);
        let resolved =
            resolve_turn(&state, &out, &graph, &gate, MovePolicy::Abort, &meta()).expect("resolves");

        assert_eq!(resolved.state.npc_locations[&NpcId::new("npc_007")], LocationId::new("loc_001"));
        assert_eq!(resolved.refusals.len(), 1);
        assert_eq!(resolved.refusals[0].code, "stubbornness_high_goal_misaligned");
        assert_eq!(resolved.event_docs.len(), 1);
    }

    #[test]
    fn illegal_move_aborts_without_touching_input() {
        let (state, graph, gate) = fixture();
        let before = state.clone();
        let out = output(None, vec![mv("npc_001", "loc_001", "loc_002"), mv("npc_003", "loc_001", "loc_004")]);
        let err = resolve_turn(&state, &out, &graph, &gate, MovePolicy::Abort, &meta())
            .expect_err("unreachable");
        assert!(matches!(
            err,
            TurnError::MovementIllegal {
                reason: IllegalMove::Unreachable,
                ..
            }
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn reject_policy_records_and_continues() {
        let (state, graph, gate) = fixture();
        let out = output(
            Some("loc_004"),
            vec![mv("npc_003", "loc_001", "loc_004"), mv("npc_001", "loc_001", "loc_002")],
        );
        let resolved =
            resolve_turn(&state, &out, &graph, &gate, MovePolicy::Reject, &meta()).expect("resolves");
        assert_eq!(resolved.state.player_location, state.player_location);
        assert_eq!(
            resolved.resolutions[0].status,
            MoveStatus::Rejected {
                reason: "unreachable".to_string()
            }
        );
        assert_eq!(resolved.resolutions[1].status, MoveStatus::Applied);
    }

    #[test]
    fn second_move_starts_from_staged_location() {
        let (state, graph, gate) = fixture();
        let out = output(
            None,
            vec![mv("npc_001", "loc_001", "loc_002"), mv("npc_001", "loc_002", "loc_001")],
        );
        let resolved =
            resolve_turn(&state, &out, &graph, &gate, MovePolicy::Abort, &meta()).expect("resolves");
        assert_eq!(resolved.resolutions.len(), 2);
        assert_eq!(resolved.state.npc_locations[&NpcId::new("npc_001")], LocationId::new("loc_001"));
    }

    #[test]
    fn player_move_applies() {
        let (state, graph, gate) = fixture();
        let out = output(Some("loc_002"), Vec::new());
        let resolved =
            resolve_turn(&state, &out, &graph, &gate, MovePolicy::Abort, &meta()).expect("resolves");
        assert_eq!(resolved.state.player_location, LocationId::new("loc_002"));
        let summary = resolved.summary_doc.expect("summary");
        assert_eq!(summary.location_id, Some(LocationId::new("loc_001")));
    }

    #[test]
    fn refusal_output_skips_updates() {
        let (state, graph, gate) = fixture();
        let mut out = output(Some("loc_002"), vec![mv("npc_001", "loc_001", "loc_002")]);
        out.safety.refusal = true;
        let resolved =
            resolve_turn(&state, &out, &graph, &gate, MovePolicy::Abort, &meta()).expect("resolves");
        assert_eq!(resolved.state.player_location, state.player_location);
        assert_eq!(resolved.state.npc_locations, state.npc_locations);
        assert!(resolved.summary_doc.is_none());
        assert_eq!(resolved.turn_id(), 1);
    }
}
