//! Storyloom Benchmark Suite
//!
//! Deterministic hot paths of a turn, everything except the model call:
//!   reachability_bfs_sample_world ..... graph search over the sample world
//!   reachability_bfs_ring_500 ......... worst-case path around a 500-node ring
//!   agency_decide_single .............. one accept/refuse decision
//!   retrieval_pack_from_500_docs ...... context pack with a populated index
//!   validate_turn_output .............. JSON extraction + schema + guard scan
//!   prompt_build_turn ................. rendering the turn prompt

use std::collections::BTreeSet;
use std::hint::black_box;

use chrono::{Duration, Utc};
use criterion::{Criterion, criterion_group, criterion_main};

use storyloom_core::agency::AgencyGate;
use storyloom_core::config::{AgencyConfig, RetrievalConfig, SafetyConfig};
use storyloom_core::retrieval::document::turn_summary_doc;
use storyloom_core::retrieval::{ContextIndex, ContextRetriever, KeywordIndex};
use storyloom_core::turn::{MoveProposal, Permanence, Trigger};
use storyloom_core::validation::OutputValidator;
use storyloom_core::world::{Location, LocationKind, ReachabilityGraph, WorldState, sample};
use storyloom_core::{LocationId, NpcId, SessionId};
use storyloom_llm::PromptEngine;

const RAW_TURN: &str = r#"Sure! Here is the turn:
```json
{
  "narration": "Edda peers at you over her spectacles.",
  "npc_dialogue": [{"npc_id": "npc_007", "line": "The yard? I have records to keep."}],
  "world_updates": {
    "player_location": null,
    "npc_moves": [{
      "npc_id": "npc_007", "from_location": "loc_001", "to_location": "loc_003",
      "trigger": "player_instruction", "reason": "asked by the player",
      "permanence": "temporary", "confidence": 0.4
    }]
  },
  "memory_summary": "The player asked Edda to go to the miller's yard.",
  "safety": {"refusal": false, "reason": null}
}
```"#;

fn state() -> WorldState {
    WorldState::from_snapshot(
        &sample::hollowmere(),
        SessionId::parse("bench").expect("valid id"),
        Utc::now(),
    )
    .expect("sample builds")
}

fn ring(n: usize) -> Vec<Location> {
    (0..n)
        .map(|i| Location {
            location_id: LocationId::new(format!("r{i}")),
            name: format!("Ring {i}"),
            kind: LocationKind::Road,
            description: String::new(),
            connected_to: BTreeSet::from([LocationId::new(format!("r{}", (i + 1) % n))]),
            tags: BTreeSet::new(),
        })
        .collect()
}

/// Benchmark: BFS reachability on the sample world and on a long ring.
fn bench_reachability(c: &mut Criterion) {
    let state = state();
    let graph = ReachabilityGraph::build(state.locations.values());
    let from = LocationId::new("loc_001");
    let to = LocationId::new("loc_005");
    c.bench_function("reachability_bfs_sample_world", |b| {
        b.iter(|| black_box(graph.is_reachable(black_box(&from), black_box(&to))));
    });

    let nodes = ring(500);
    let graph = ReachabilityGraph::build(&nodes);
    let start = LocationId::new("r0");
    let last = LocationId::new("r499");
    c.bench_function("reachability_bfs_ring_500", |b| {
        b.iter(|| black_box(graph.is_reachable(black_box(&start), black_box(&last))));
    });
}

/// Benchmark: one agency decision.
fn bench_agency(c: &mut Criterion) {
    let state = state();
    let gate = AgencyGate::new(AgencyConfig::default());
    let npc = state.npc(&NpcId::new("npc_007")).expect("npc");
    let dest = state.location(&LocationId::new("loc_003")).expect("location");
    let proposal = MoveProposal {
        npc_id: npc.npc_id.clone(),
        from_location: LocationId::new("loc_001"),
        to_location: dest.location_id.clone(),
        trigger: Trigger::PlayerInstruction,
        reason: "asked by the player".to_string(),
        permanence: Permanence::Temporary,
        confidence: None,
    };
    c.bench_function("agency_decide_single", |b| {
        b.iter(|| black_box(gate.decide(black_box(npc), &proposal, dest)));
    });
}

/// Benchmark: context pack assembly with 500 indexed summaries.
fn bench_retrieval(c: &mut Criterion) {
    let state = state();
    let index = KeywordIndex::new();
    let now = Utc::now();
    let places = ["loc_001", "loc_002", "loc_003"];
    let docs: Vec<_> = (0..500u64)
        .map(|turn| {
            let place = LocationId::new(places[usize::try_from(turn % 3).unwrap_or(0)]);
            turn_summary_doc(
                &state.session_id,
                turn + 1,
                now - Duration::seconds(i64::try_from(500 - turn).unwrap_or(0)),
                &place,
                (turn % 5 == 0).then(|| NpcId::new("npc_007")).as_ref(),
                &format!("Turn {turn}: the bells rang over the mill and the archivist counted ledgers"),
            )
        })
        .collect();
    index.upsert(&docs).expect("upsert");

    let retriever = ContextRetriever::new(RetrievalConfig::default());
    let npc = NpcId::new("npc_007");
    c.bench_function("retrieval_pack_from_500_docs", |b| {
        b.iter(|| {
            black_box(
                retriever
                    .retrieve(&state, Some(&npc), black_box("what of the mill ledgers"), &index)
                    .expect("pack"),
            )
        });
    });
}

/// Benchmark: validating a fenced model response.
fn bench_validation(c: &mut Criterion) {
    let state = state();
    let validator = OutputValidator::new(&state.world_bible, &SafetyConfig::default());
    c.bench_function("validate_turn_output", |b| {
        b.iter(|| black_box(validator.validate(black_box(RAW_TURN), "Edda, go to the yard.")));
    });
}

/// Benchmark: rendering the turn prompt.
fn bench_prompt(c: &mut Criterion) {
    let state = state();
    let npc = NpcId::new("npc_007");
    let pack = ContextRetriever::new(RetrievalConfig::default())
        .retrieve(&state, Some(&npc), "go to the mill", &KeywordIndex::new())
        .expect("pack");
    let prompts = PromptEngine::builtin();
    c.bench_function("prompt_build_turn", |b| {
        b.iter(|| {
            black_box(
                prompts
                    .build_turn_prompt(&pack, "loc_001", Some(&npc), black_box("Edda, go to the mill."))
                    .expect("prompt"),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_reachability,
    bench_agency,
    bench_retrieval,
    bench_validation,
    bench_prompt,
);
criterion_main!(benches);
