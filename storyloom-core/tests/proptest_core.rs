//! Property-based tests for the deterministic turn core.
//!
//! Agency decisions must be reproducible and move in the documented
//! direction for every trait; reachability must agree with a brute-force
//! transitive closure; turn resolution must only ever move NPCs whose move
//! was applied.

use std::collections::BTreeSet;

use chrono::Utc;
use proptest::prelude::*;

use storyloom_core::agency::AgencyGate;
use storyloom_core::config::{AgencyConfig, MovePolicy};
use storyloom_core::mutation::{TurnMeta, resolve_turn};
use storyloom_core::turn::{
    MoveProposal, MoveStatus, Permanence, SafetyFlag, Trigger, TurnOutput, WorldUpdates,
};
use storyloom_core::world::{Location, LocationKind, NpcProfile, ReachabilityGraph, sample};
use storyloom_core::{LocationId, NpcId, SessionId, WorldState};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn sample_locations() -> Vec<Location> {
    sample::hollowmere().locations
}

fn arb_npc() -> impl Strategy<Value = NpcProfile> {
    (0.0..=1.0f32, 0.0..=1.0f32, 0.0..=1.0f32, -5i8..=5, 0usize..3).prop_map(
        |(obedience, stubbornness, risk, disposition, which)| {
            let mut npc = sample::hollowmere().npcs.swap_remove(which);
            npc.obedience_level = obedience;
            npc.stubbornness = stubbornness;
            npc.risk_tolerance = risk;
            npc.disposition_to_player = disposition;
            npc
        },
    )
}

fn arb_destination() -> impl Strategy<Value = Location> {
    (0..sample_locations().len()).prop_map(|i| sample_locations().swap_remove(i))
}

fn proposal(npc: &NpcProfile, to: &Location) -> MoveProposal {
    MoveProposal {
        npc_id: npc.npc_id.clone(),
        from_location: npc.starting_location.clone(),
        to_location: to.location_id.clone(),
        trigger: Trigger::PlayerInstruction,
        reason: "asked".to_string(),
        permanence: Permanence::Temporary,
        confidence: None,
    }
}

fn score(gate: &AgencyGate, npc: &NpcProfile, to: &Location) -> f32 {
    gate.assess(npc, to).score.0
}

// ---------------------------------------------------------------------------
// Agency gate
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn agency_is_deterministic(npc in arb_npc(), to in arb_destination()) {
        let gate = AgencyGate::new(AgencyConfig::default());
        let p = proposal(&npc, &to);
        prop_assert_eq!(gate.decide(&npc, &p, &to), gate.decide(&npc, &p, &to));
    }

    #[test]
    fn score_stays_in_unit_interval(npc in arb_npc(), to in arb_destination()) {
        let s = score(&AgencyGate::new(AgencyConfig::default()), &npc, &to);
        prop_assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn more_obedience_never_lowers_score(npc in arb_npc(), to in arb_destination(), bump in 0.0..=1.0f32) {
        let gate = AgencyGate::new(AgencyConfig::default());
        let mut more = npc.clone();
        more.obedience_level = (npc.obedience_level + bump).min(1.0);
        prop_assert!(score(&gate, &more, &to) >= score(&gate, &npc, &to));
    }

    #[test]
    fn more_stubbornness_never_raises_score(npc in arb_npc(), to in arb_destination(), bump in 0.0..=1.0f32) {
        let gate = AgencyGate::new(AgencyConfig::default());
        let mut more = npc.clone();
        more.stubbornness = (npc.stubbornness + bump).min(1.0);
        prop_assert!(score(&gate, &more, &to) <= score(&gate, &npc, &to));
    }

    #[test]
    fn warmer_disposition_never_lowers_score(npc in arb_npc(), to in arb_destination()) {
        let gate = AgencyGate::new(AgencyConfig::default());
        let mut warmer = npc.clone();
        warmer.disposition_to_player = npc.disposition_to_player.saturating_add(1).min(5);
        prop_assert!(score(&gate, &warmer, &to) >= score(&gate, &npc, &to));
    }

    #[test]
    fn more_risk_tolerance_never_lowers_score(npc in arb_npc(), to in arb_destination(), bump in 0.0..=1.0f32) {
        let gate = AgencyGate::new(AgencyConfig::default());
        let mut bolder = npc.clone();
        bolder.risk_tolerance = (npc.risk_tolerance + bump).min(1.0);
        prop_assert!(score(&gate, &bolder, &to) >= score(&gate, &npc, &to));
    }

    #[test]
    fn accept_iff_score_meets_threshold(npc in arb_npc(), to in arb_destination()) {
        let config = AgencyConfig::default();
        let threshold = config.threshold;
        let gate = AgencyGate::new(config);
        let accepted = gate.decide(&npc, &proposal(&npc, &to), &to).is_accept();
        prop_assert_eq!(accepted, score(&gate, &npc, &to) >= threshold);
    }
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

fn arb_edges(n: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..n, 0..n), 0..n * 2)
}

fn closure(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<bool>> {
    let mut reach = vec![vec![false; n]; n];
    for (i, row) in reach.iter_mut().enumerate() {
        row[i] = true;
    }
    for &(a, b) in edges {
        reach[a][b] = true;
    }
    for k in 0..n {
        for i in 0..n {
            for j in 0..n {
                if reach[i][k] && reach[k][j] {
                    reach[i][j] = true;
                }
            }
        }
    }
    reach
}

proptest! {
    #[test]
    fn bfs_matches_transitive_closure(edges in arb_edges(7)) {
        let n = 7;
        let ids: Vec<LocationId> = (0..n).map(|i| LocationId::new(format!("loc_{i}"))).collect();
        let locations: Vec<Location> = (0..n)
            .map(|i| Location {
                location_id: ids[i].clone(),
                name: format!("Place {i}"),
                kind: LocationKind::Other,
                description: String::new(),
                connected_to: edges
                    .iter()
                    .filter(|(a, _)| *a == i)
                    .map(|(_, b)| ids[*b].clone())
                    .collect::<BTreeSet<_>>(),
                tags: BTreeSet::new(),
            })
            .collect();
        let graph = ReachabilityGraph::build(&locations);
        let expected = closure(n, &edges);

        for i in 0..n {
            for j in 0..n {
                prop_assert_eq!(graph.is_reachable(&ids[i], &ids[j]), expected[i][j], "{} -> {}", i, j);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Turn resolution
// ---------------------------------------------------------------------------

fn arb_moves() -> impl Strategy<Value = Vec<(usize, usize, usize)>> {
    // (npc index, from index, to index); index 3 / 6 are unknown ids.
    prop::collection::vec((0usize..4, 0usize..7, 0usize..7), 0..5)
}

fn npc_id(i: usize) -> NpcId {
    NpcId::new(["npc_001", "npc_003", "npc_007", "npc_404"][i])
}

fn loc_id(i: usize) -> LocationId {
    LocationId::new(["loc_001", "loc_002", "loc_003", "loc_004", "loc_005", "loc_006", "loc_404"][i])
}

proptest! {
    #[test]
    fn only_applied_moves_change_locations(moves in arb_moves(), reject in any::<bool>()) {
        let state = WorldState::from_snapshot(
            &sample::hollowmere(),
            SessionId::parse("prop").expect("valid"),
            Utc::now(),
        )
        .expect("sample builds");
        let graph = ReachabilityGraph::build(state.locations.values());
        let gate = AgencyGate::new(AgencyConfig::default());
        let policy = if reject { MovePolicy::Reject } else { MovePolicy::Abort };

        let output = TurnOutput {
            narration: "n".to_string(),
            npc_dialogue: Vec::new(),
            world_updates: WorldUpdates {
                player_location: None,
                npc_moves: moves
                    .iter()
                    .map(|&(n, f, t)| MoveProposal {
                        npc_id: npc_id(n),
                        from_location: loc_id(f),
                        to_location: loc_id(t),
                        trigger: Trigger::StoryEvent,
                        reason: "r".to_string(),
                        permanence: Permanence::Temporary,
                        confidence: None,
                    })
                    .collect(),
            },
            memory_summary: "s".to_string(),
            safety: SafetyFlag::default(),
        };
        let meta = TurnMeta { timestamp: Utc::now(), addressed_npc: None };

        match resolve_turn(&state, &output, &graph, &gate, policy, &meta) {
            Err(_) => prop_assert!(!reject, "reject policy never fails on moves"),
            Ok(resolved) => {
                prop_assert_eq!(resolved.resolutions.len(), output.world_updates.npc_moves.len());
                let mut expected = state.npc_locations.clone();
                for r in &resolved.resolutions {
                    if r.status == MoveStatus::Applied {
                        expected.insert(r.proposal.npc_id.clone(), r.proposal.to_location.clone());
                    }
                }
                prop_assert_eq!(&resolved.state.npc_locations, &expected);
                prop_assert_eq!(resolved.state.last_turn_id, state.last_turn_id + 1);
                prop_assert_eq!(&resolved.state.inventory, &state.inventory);
                prop_assert_eq!(&resolved.state.quest_flags, &state.quest_flags);
            }
        }
    }
}
