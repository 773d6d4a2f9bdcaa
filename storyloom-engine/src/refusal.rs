//! Templated in-world refusals.
//!
//! When the model keeps breaking the setting, the turn commits one of these
//! instead. The text is fixed per refusal style, so it can never carry a
//! guarded term.

use storyloom_core::turn::{DialogueLine, SafetyFlag, TurnOutput, WorldUpdates};
use storyloom_core::types::NpcId;
use storyloom_core::world::WorldState;

/// Reason recorded on fallback refusals.
pub const FALLBACK_REASON: &str = "world consistency";

const UNADDRESSED: &str = "The thought slips away before it takes shape, and the world carries on as before.";

/// Gesture and spoken line for a refusal style.
fn style_template(style: &str) -> (&'static str, &'static str) {
    match style {
        "curt" => ("cuts you off with a flat look", "Not that. Ask me something else."),
        "formal" => (
            "straightens and chooses their words with care",
            "Forgive me, but that is not a matter I can discuss.",
        ),
        "apologetic" => ("winces and glances away", "I'm sorry. I really can't talk about that."),
        "hostile" => ("glares at you", "Drop it, or we are done here."),
        _ => ("looks away and lets the question hang", "Let's talk of something else."),
    }
}

/// Build a refusal output voiced by the addressed NPC, or a neutral
/// narration when nobody was addressed or the NPC is unknown.
#[must_use]
pub fn templated_refusal(state: &WorldState, addressed_npc: Option<&NpcId>) -> TurnOutput {
    let (narration, npc_dialogue) = match addressed_npc.and_then(|id| state.npc(id)) {
        Some(npc) => {
            let (gesture, line) = style_template(&npc.refusal_style);
            (
                format!("{} {gesture}.", npc.name),
                vec![DialogueLine {
                    npc_id: npc.npc_id.clone(),
                    line: line.to_string(),
                }],
            )
        }
        None => (UNADDRESSED.to_string(), Vec::new()),
    };

    TurnOutput {
        narration,
        npc_dialogue,
        world_updates: WorldUpdates::default(),
        memory_summary: String::new(),
        safety: SafetyFlag {
            refusal: true,
            reason: Some(FALLBACK_REASON.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use storyloom_core::config::SafetyConfig;
    use storyloom_core::safety::TermGuard;
    use storyloom_core::types::SessionId;
    use storyloom_core::world::sample;

    fn state() -> WorldState {
        WorldState::from_snapshot(
            &sample::hollowmere(),
            SessionId::parse("refusal").expect("valid"),
            Utc::now(),
        )
        .expect("sample builds")
    }

    #[test]
    fn curt_npc_voices_refusal() {
        let state = state();
        let out = templated_refusal(&state, Some(&NpcId::new("npc_007")));
        assert!(out.safety.refusal);
        assert!(out.narration.starts_with("Edda Quill"));
        assert_eq!(out.npc_dialogue.len(), 1);
        assert_eq!(out.npc_dialogue[0].line, "Not that. Ask me something else.");
        assert!(out.world_updates.npc_moves.is_empty());
    }

    #[test]
    fn unknown_or_absent_npc_is_neutral() {
        let state = state();
        for npc in [None, Some(NpcId::new("npc_404"))] {
            let out = templated_refusal(&state, npc.as_ref());
            assert_eq!(out.narration, UNADDRESSED);
            assert!(out.npc_dialogue.is_empty());
        }
    }

    #[test]
    fn every_template_passes_the_guard() {
        let state = state();
        let guard = TermGuard::from_bible(&state.world_bible, &SafetyConfig::default());
        for npc in state.npc_profiles.keys() {
            let out = templated_refusal(&state, Some(npc));
            assert_eq!(guard.scan("", &out), None);
        }
    }
}
