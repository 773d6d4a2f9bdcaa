//! A small hand-authored world used by the CLI demo mode, tests and benches.
//!
//! Layout (directed edges):
//!
//! ```text
//! loc_001 Square  <->  loc_002 Road  <->  loc_003 Miller's Yard
//!                          ^  |
//!                          |  v
//!                      loc_005 Thornwood (danger)
//!
//! loc_004 Sunken Shrine  -> loc_001   (nothing leads in)
//! loc_006 Ferry Landing               (reachable only by the ferry tag)
//! ```

use std::collections::BTreeSet;

use crate::types::{LocationId, NpcId};
use crate::world::bible::{TravelAllowance, WorldBible};
use crate::world::location::{Location, LocationKind};
use crate::world::npc::NpcProfile;
use crate::world::snapshot::WorldSnapshot;

fn ids(raw: &[&str]) -> BTreeSet<LocationId> {
    raw.iter().map(|id| LocationId::new(*id)).collect()
}

fn words(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|w| (*w).to_string()).collect()
}

fn location(
    id: &str,
    name: &str,
    kind: LocationKind,
    description: &str,
    connected_to: &[&str],
    tags: &[&str],
) -> Location {
    Location {
        location_id: LocationId::new(id),
        name: name.to_string(),
        kind,
        description: description.to_string(),
        connected_to: ids(connected_to),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
    }
}

/// The Hollowmere valley: six locations, three NPCs.
#[must_use]
pub fn hollowmere() -> WorldSnapshot {
    let locations = vec![
        location(
            "loc_001",
            "Hollowmere Square",
            LocationKind::Town,
            "A cobbled square ringed by timber houses, with a mossy well at its centre.",
            &["loc_002"],
            &[],
        ),
        location(
            "loc_002",
            "Millbrook Road",
            LocationKind::Road,
            "A rutted cart road winding along the valley floor.",
            &["loc_001", "loc_003", "loc_005"],
            &[],
        ),
        location(
            "loc_003",
            "Miller's Yard",
            LocationKind::Village,
            "A dusty yard behind the watermill where sacks of grain are stacked.",
            &["loc_002"],
            &[],
        ),
        location(
            "loc_004",
            "Sunken Shrine",
            LocationKind::Temple,
            "A half-flooded shrine whose bells still ring when the wind turns.",
            &["loc_001"],
            &[],
        ),
        location(
            "loc_005",
            "Thornwood",
            LocationKind::Forest,
            "A tangle of black thorn where outlaws are said to camp.",
            &["loc_002"],
            &["danger"],
        ),
        location(
            "loc_006",
            "Ferry Landing",
            LocationKind::Other,
            "A wooden jetty where the ferryman waits for coin.",
            &[],
            &["ferry"],
        ),
    ];

    let npcs = vec![
        NpcProfile {
            npc_id: NpcId::new("npc_001"),
            name: "Mara Fenwick".to_string(),
            profession: "courier".to_string(),
            traits: words(&["brisk", "curious"]),
            goals: words(&["deliver messages across the valley"]),
            starting_location: LocationId::new("loc_001"),
            obedience_level: 0.8,
            stubbornness: 0.2,
            risk_tolerance: 0.7,
            disposition_to_player: 2,
            refusal_style: "apologetic".to_string(),
        },
        NpcProfile {
            npc_id: NpcId::new("npc_003"),
            name: "Hal Brennock".to_string(),
            profession: "guard".to_string(),
            traits: words(&["dutiful", "cautious"]),
            goals: words(&["protect the square"]),
            starting_location: LocationId::new("loc_001"),
            obedience_level: 0.6,
            stubbornness: 0.5,
            risk_tolerance: 0.4,
            disposition_to_player: 0,
            refusal_style: "formal".to_string(),
        },
        NpcProfile {
            npc_id: NpcId::new("npc_007"),
            name: "Edda Quill".to_string(),
            profession: "archivist".to_string(),
            traits: words(&["proud", "meticulous"]),
            goals: words(&["catalogue the parish records", "find a quiet apprentice"]),
            starting_location: LocationId::new("loc_001"),
            obedience_level: 0.2,
            stubbornness: 0.9,
            risk_tolerance: 0.3,
            disposition_to_player: 0,
            refusal_style: "curt".to_string(),
        },
    ];

    WorldSnapshot {
        world_id: "hollowmere".to_string(),
        title: "The Bells of Hollowmere".to_string(),
        world_bible: WorldBible {
            tech_level: "medieval".to_string(),
            magic_rules: "Magic is rare and costly; only the shrine bells are said to hold any."
                .to_string(),
            tone: "quiet, folkloric, a little melancholy".to_string(),
            taboos: words(&["necromancy"]),
            do_not_mention: words(&["the drowned king"]),
            anachronism_blocklist: Vec::new(),
            special_travel: vec![TravelAllowance::Tag {
                tag: "ferry".to_string(),
            }],
        },
        locations,
        npcs,
        starting_location: LocationId::new("loc_001"),
        starting_hook: "The shrine bells rang at dawn, though no wind was blowing.".to_string(),
        initial_quest: "Find out who rang the bells of the Sunken Shrine.".to_string(),
    }
}
