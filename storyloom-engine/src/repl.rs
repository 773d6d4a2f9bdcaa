//! Line parsing and rendering for the interactive turn loop.

use std::fmt::Write as _;

use storyloom_core::turn::{MoveStatus, TurnOutcome};
use storyloom_core::types::NpcId;
use storyloom_core::world::WorldState;

use crate::orchestrator::TurnResult;

/// One line of player input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the loop.
    Quit,
    /// Back up the store.
    Backup,
    /// Describe where everyone is.
    Look,
    /// Print the last few turns.
    History,
    /// Play a turn.
    Turn {
        /// NPC addressed with `@npc_id`.
        npc: Option<NpcId>,
        /// What the player says or does.
        text: String,
    },
}

/// Parse a line. Blank lines and a bare `@npc` yield `None`.
#[must_use]
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "" => return None,
        "quit" | "exit" | ":q" => return Some(Command::Quit),
        ":backup" => return Some(Command::Backup),
        ":look" => return Some(Command::Look),
        ":history" => return Some(Command::History),
        _ => {}
    }

    if let Some(rest) = line.strip_prefix('@') {
        let (npc, text) = rest.split_once(char::is_whitespace)?;
        let text = text.trim();
        if npc.is_empty() || text.is_empty() {
            return None;
        }
        return Some(Command::Turn {
            npc: Some(NpcId::new(npc)),
            text: text.to_string(),
        });
    }

    Some(Command::Turn {
        npc: None,
        text: line.to_string(),
    })
}

/// Where the player is and who is nearby.
#[must_use]
pub fn describe(state: &WorldState) -> String {
    let here = state
        .location(&state.player_location)
        .map_or_else(|| state.player_location.to_string(), |l| l.name.clone());
    let mut out = format!("You are at {here} ({}).", state.player_location);
    let present: Vec<String> = state
        .npcs_at(&state.player_location)
        .into_iter()
        .filter_map(|id| state.npc(id).map(|n| format!("{} (@{id})", n.name)))
        .collect();
    if !present.is_empty() {
        let _ = write!(out, " Present: {}.", present.join(", "));
    }
    out
}

/// Render a committed turn for the terminal.
#[must_use]
pub fn render_turn(result: &TurnResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", result.output.narration);
    for line in &result.output.npc_dialogue {
        let name = result
            .state
            .npc(&line.npc_id)
            .map_or_else(|| line.npc_id.to_string(), |n| n.name.clone());
        let _ = writeln!(out, "  {name}: \"{}\"", line.line);
    }
    for resolution in &result.record.move_resolutions {
        let npc = &resolution.proposal.npc_id;
        let to = &resolution.proposal.to_location;
        let _ = match &resolution.status {
            MoveStatus::Applied => writeln!(out, "  [{npc} heads to {to}]"),
            MoveStatus::Refused { code } => writeln!(out, "  [{npc} refuses to go to {to}: {code}]"),
            MoveStatus::Rejected { reason } => writeln!(out, "  [move of {npc} to {to} dropped: {reason}]"),
        };
    }
    if result.record.outcome != TurnOutcome::Applied {
        if let Some(reason) = &result.output.safety.reason {
            let _ = writeln!(out, "  [refused: {reason}]");
        }
    }
    let _ = write!(out, "{}", describe(&result.state));
    out
}
