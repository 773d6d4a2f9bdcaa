//! Prompt templates and the turn prompt builder.
//!
//! Every prompt is a versioned, testable artifact. The built-in templates
//! are compiled in; a directory of TOML files can replace them:
//!
//! ```toml
//! [prompt]
//! version = "2"
//! system = "You are the narrator of {world_title}. ..."
//! user = "{context}\n\nPlayer: {player_text}"
//! ```
//!
//! Building a prompt is pure: the same context pack and player text always
//! render the same strings.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Value, json};

use storyloom_core::retrieval::{ContextDocument, ContextPack, Inclusion};
use storyloom_core::types::NpcId;

use crate::error::LlmError;
use crate::types::TurnPrompt;

/// Plain-language description of the output contract, embedded in every
/// turn prompt.
pub const TURN_OUTPUT_SHAPE: &str = r#"Return exactly one JSON object and nothing else:
{
  "narration": string,
  "npc_dialogue": [{"npc_id": string, "line": string}],
  "world_updates": {
    "player_location": string | null,
    "npc_moves": [{
      "npc_id": string,
      "from_location": string,
      "to_location": string,
      "trigger": "player_instruction" | "story_event",
      "reason": string,
      "permanence": "temporary" | "until_further_notice" | "permanent",
      "confidence": number between 0 and 1 (optional)
    }]
  },
  "memory_summary": string,
  "safety": {"refusal": boolean, "reason": string | null}
}
npc_moves MUST be a list; use [] when nobody moves. Moves are proposals:
the engine decides whether they happen."#;

/// System template for a turn.
pub const TURN_SYSTEM: &str = r"You are the narrator of a text role-playing game.
Describe what happens in response to the player, voice the NPCs present and
propose any changes to where characters are.

RULES:
- Stay inside the setting described by the world bible. Never mention
  taboo subjects, forbidden names or technology the setting does not have.
- Only use location ids and npc ids that appear in the context.
- An NPC may be asked to go somewhere; propose the move, do not narrate it
  as done. NPCs have their own will and may refuse.
- Keep narration under 120 words.

{output_shape}";

/// User template for a turn.
pub const TURN_USER: &str = r"## Context
{always_context}

## Related memories
{retrieved_context}

## This turn
Player location: {player_location}
Addressed NPC: {addressed_npc}
Player: {player_text}";

/// Re-prompt template after a rejected response.
pub const REPAIR_USER: &str = r"{original_user}

## Your previous answer was rejected
Problem: {problem}
Rejected answer:
{rejected}

Answer again. Fix the problem and follow the output contract exactly.";

/// Longest slice of a rejected answer quoted back to the model.
const REJECTED_QUOTE_CHARS: usize = 2000;

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value; unknown placeholders are
/// left as they are.
///
/// Rendering is a single left-to-right pass, so braces inside substituted
/// values are never expanded.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let key = &tail[1..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                result.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                result.push('{');
                rest = &tail[1..];
            }
        }
    }
    result.push_str(rest);
    result
}

/// JSON schema of a turn output, for structured-output backends.
#[must_use]
pub fn turn_output_json_schema() -> Value {
    let string = json!({"type": "string"});
    json!({
        "type": "object",
        "required": ["narration", "npc_dialogue", "world_updates", "memory_summary", "safety"],
        "properties": {
            "narration": string,
            "npc_dialogue": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["npc_id", "line"],
                    "properties": {"npc_id": string, "line": string}
                }
            },
            "world_updates": {
                "type": "object",
                "required": ["npc_moves"],
                "properties": {
                    "player_location": {"type": ["string", "null"]},
                    "npc_moves": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["npc_id", "from_location", "to_location", "trigger", "reason", "permanence"],
                            "properties": {
                                "npc_id": string,
                                "from_location": string,
                                "to_location": string,
                                "trigger": {"type": "string", "enum": ["player_instruction", "story_event"]},
                                "reason": string,
                                "permanence": {"type": "string", "enum": ["temporary", "until_further_notice", "permanent"]},
                                "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                            }
                        }
                    }
                }
            },
            "memory_summary": string,
            "safety": {
                "type": "object",
                "required": ["refusal"],
                "properties": {
                    "refusal": {"type": "boolean"},
                    "reason": {"type": ["string", "null"]}
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// PromptEngine: versioned TOML template loader
// ---------------------------------------------------------------------------

/// Identifies a prompt template by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// The first attempt of a turn.
    Turn,
    /// A re-prompt after a rejected answer.
    Repair,
}

impl PromptId {
    /// Returns the TOML filename (without path) for this prompt.
    #[must_use]
    pub fn filename(self) -> &'static str {
        match self {
            Self::Turn => "turn.toml",
            Self::Repair => "repair.toml",
        }
    }

    /// All prompt IDs.
    #[must_use]
    pub fn all() -> &'static [PromptId] {
        &[Self::Turn, Self::Repair]
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Turn => "turn",
            Self::Repair => "repair",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PromptId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn" => Ok(Self::Turn),
            "repair" => Ok(Self::Repair),
            _ => Err(LlmError::ConfigError(format!("unknown prompt id: '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TomlPromptFile {
    prompt: TomlPromptData,
}

#[derive(Debug, Clone, Deserialize)]
struct TomlPromptData {
    version: String,
    #[serde(default)]
    system: Option<String>,
    user: String,
}

/// A loaded, ready-to-render prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Prompt version string.
    pub version: String,
    /// System template; repair prompts reuse the turn's system prompt when
    /// this is `None`.
    pub system: Option<String>,
    /// User template.
    pub user: String,
}

/// Loads templates and renders turn and repair prompts.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    templates: HashMap<PromptId, PromptTemplate>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptEngine {
    /// Engine with the compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            PromptId::Turn,
            PromptTemplate {
                version: "builtin".into(),
                system: Some(TURN_SYSTEM.into()),
                user: TURN_USER.into(),
            },
        );
        templates.insert(
            PromptId::Repair,
            PromptTemplate {
                version: "builtin".into(),
                system: None,
                user: REPAIR_USER.into(),
            },
        );
        Self { templates }
    }

    /// Start from the built-in templates and replace any that have a TOML
    /// file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if the directory does not exist or
    /// a template file cannot be read or parsed.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, LlmError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LlmError::ConfigError(format!(
                "prompt directory not found: {}",
                dir.display()
            )));
        }

        let mut engine = Self::builtin();
        for id in PromptId::all() {
            let path = dir.join(id.filename());
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .map_err(|e| LlmError::ConfigError(format!("failed to read {}: {e}", path.display())))?;
            let parsed: TomlPromptFile = toml::from_str(&content)
                .map_err(|e| LlmError::ConfigError(format!("failed to parse {}: {e}", path.display())))?;
            let d = parsed.prompt;
            engine.templates.insert(
                *id,
                PromptTemplate {
                    version: d.version,
                    system: d.system,
                    user: d.user,
                },
            );
        }
        Ok(engine)
    }

    /// Get a loaded prompt template by ID.
    #[must_use]
    pub fn get(&self, id: PromptId) -> Option<&PromptTemplate> {
        self.templates.get(&id)
    }

    fn template(&self, id: PromptId) -> Result<&PromptTemplate, LlmError> {
        self.get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))
    }

    /// Render the prompt for a turn's first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if the turn template is missing.
    pub fn build_turn_prompt(
        &self,
        pack: &ContextPack,
        player_location: &str,
        addressed_npc: Option<&NpcId>,
        player_text: &str,
    ) -> Result<TurnPrompt, LlmError> {
        let tpl = self.template(PromptId::Turn)?;
        let always = format_docs(pack.with_inclusion(Inclusion::Always));
        let retrieved = format_docs(pack.with_inclusion(Inclusion::Retrieved));
        let retrieved = if retrieved.is_empty() { "(none)".to_string() } else { retrieved };
        let npc = addressed_npc.map_or("(none)", NpcId::as_str);

        let vars = [
            ("output_shape", TURN_OUTPUT_SHAPE),
            ("always_context", always.as_str()),
            ("retrieved_context", retrieved.as_str()),
            ("player_location", player_location),
            ("addressed_npc", npc),
            ("player_text", player_text),
        ];
        Ok(TurnPrompt {
            system: render_template(tpl.system.as_deref().unwrap_or(TURN_SYSTEM), &vars),
            user: render_template(&tpl.user, &vars),
            response_format: Some(turn_output_json_schema()),
        })
    }

    /// Render a re-prompt quoting the rejected answer and what was wrong.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if the repair template is missing.
    pub fn build_repair_prompt(
        &self,
        original: &TurnPrompt,
        rejected: &str,
        problem: &str,
    ) -> Result<TurnPrompt, LlmError> {
        let tpl = self.template(PromptId::Repair)?;
        let quoted: String = rejected.chars().take(REJECTED_QUOTE_CHARS).collect();
        let vars = [
            ("original_user", original.user.as_str()),
            ("rejected", quoted.as_str()),
            ("problem", problem),
            ("output_shape", TURN_OUTPUT_SHAPE),
        ];
        Ok(TurnPrompt {
            system: tpl
                .system
                .as_deref()
                .map_or_else(|| original.system.clone(), |s| render_template(s, &vars)),
            user: render_template(&tpl.user, &vars),
            response_format: original.response_format.clone(),
        })
    }
}

fn format_docs<'a>(docs: impl Iterator<Item = &'a ContextDocument>) -> String {
    docs.map(|doc| {
        let mut header = format!("[{}", doc.doc_type);
        if let Some(npc) = &doc.npc_id {
            header.push_str(&format!(" npc={npc}"));
        }
        if let Some(loc) = &doc.location_id {
            header.push_str(&format!(" location={loc}"));
        }
        if let Some(turn) = doc.turn_id {
            header.push_str(&format!(" turn={turn}"));
        }
        format!("{header}]\n{}", doc.text)
    })
    .collect::<Vec<_>>()
    .join("\n\n")
}
