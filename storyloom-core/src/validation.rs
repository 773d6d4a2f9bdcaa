//! Untrusted model text → strictly typed [`TurnOutput`].
//!
//! Models wrap JSON in prose or code fences, leave trailing commas and drift
//! on field names. Extraction tries several recovery strategies, then a
//! path-tracked walk over the [`serde_json::Value`] checks every required
//! field so the error points at the exact JSON location.
//!
//! Accepted drift:
//! - `safety: true` means `{"refusal": true}`; `refuse` is an alias of
//!   `refusal`.
//! - `text` is an alias of a dialogue entry's `line`.
//! - missing or `null` `npc_moves` means no moves; `null` or empty
//!   `player_location` means the player did not move.
//! - unknown extra fields (`flags_delta`, `quest_updates`, ...) are ignored.

use std::fmt;

use ordered_float::OrderedFloat;
use serde_json::{Map, Value};

use crate::config::SafetyConfig;
use crate::error::TurnError;
use crate::safety::{ConsistencyViolation, TermGuard};
use crate::turn::{
    DialogueLine, MoveProposal, Permanence, SafetyFlag, Trigger, TurnOutput, WorldUpdates,
};
use crate::types::{LocationId, NpcId};
use crate::world::WorldBible;

/// A required field was missing, mistyped or out of range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON path of the offending value, `$` for the document root.
    pub path: String,
    /// What was wrong.
    pub problem: String,
}

impl SchemaViolation {
    fn new(path: &str, problem: impl Into<String>) -> Self {
        Self {
            path: if path.is_empty() { "$".to_string() } else { path.to_string() },
            problem: problem.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.problem)
    }
}

/// Why a raw response was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// Structural failure.
    Schema(SchemaViolation),
    /// Guarded-term failure.
    Consistency(ConsistencyViolation),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(v) => write!(f, "schema violation at {v}"),
            Self::Consistency(v) => write!(f, "consistency violation: {v}"),
        }
    }
}

impl From<OutputError> for TurnError {
    fn from(err: OutputError) -> Self {
        match err {
            OutputError::Schema(v) => Self::SchemaValidation(v),
            OutputError::Consistency(v) => Self::ConsistencyViolation(v),
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Schema + consistency validation for one session's world.
#[derive(Debug, Clone)]
pub struct OutputValidator {
    guard: Option<TermGuard>,
}

impl OutputValidator {
    /// Build a validator for the world described by `bible`.
    #[must_use]
    pub fn new(bible: &WorldBible, safety: &SafetyConfig) -> Self {
        let guard = safety
            .consistency_checks_enabled
            .then(|| TermGuard::from_bible(bible, safety));
        Self { guard }
    }

    /// Parse and check a raw response.
    ///
    /// # Errors
    ///
    /// [`OutputError::Schema`] if the text is not a well-formed turn output;
    /// [`OutputError::Consistency`] if it mentions a guarded term the player
    /// did not introduce.
    pub fn validate(&self, raw: &str, player_text: &str) -> Result<TurnOutput, OutputError> {
        let output = parse_turn_output(raw).map_err(OutputError::Schema)?;
        if let Some(guard) = &self.guard {
            if let Some(violation) = guard.scan(player_text, &output) {
                return Err(OutputError::Consistency(violation));
            }
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Find the JSON object in a model response.
///
/// Strategies, in order: the whole text, a fenced code block, the outermost
/// `{...}` span. Each candidate is retried with trailing commas stripped.
#[must_use]
pub fn extract_json(raw: &str) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    let candidates = [
        Some(trimmed),
        extract_codeblock(trimmed),
        outermost_object(trimmed),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Some(map);
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&strip_trailing_commas(candidate)) {
            return Some(map);
        }
    }
    None
}

fn extract_codeblock(text: &str) -> Option<&str> {
    let fence = text.find("```")?;
    let after_fence = &text[fence + 3..];
    let body_start = after_fence.find('\n').map_or(0, |nl| nl + 1);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Remove commas directly before `}` or `]`, leaving string contents alone.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().copied().find(|n| !n.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Typed conversion
// ---------------------------------------------------------------------------

/// Parse raw model text into a [`TurnOutput`] without consistency checks.
///
/// # Errors
///
/// Returns the first [`SchemaViolation`] found.
pub fn parse_turn_output(raw: &str) -> Result<TurnOutput, SchemaViolation> {
    let root = extract_json(raw)
        .ok_or_else(|| SchemaViolation::new("", "response does not contain a JSON object"))?;

    let narration = string_field(&root, "", "narration")?;
    let npc_dialogue = dialogue(required(&root, "", "npc_dialogue")?)?;
    let world_updates = world_updates(required(&root, "", "world_updates")?)?;
    let memory_summary = string_field(&root, "", "memory_summary")?;
    let safety = safety(required(&root, "", "safety")?)?;

    Ok(TurnOutput {
        narration,
        npc_dialogue,
        world_updates,
        memory_summary,
        safety,
    })
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() { key.to_string() } else { format!("{path}.{key}") }
}

fn required<'a>(map: &'a Map<String, Value>, path: &str, key: &str) -> Result<&'a Value, SchemaViolation> {
    match map.get(key) {
        Some(v) if !v.is_null() => Ok(v),
        _ => Err(SchemaViolation::new(&join(path, key), "missing required field")),
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, SchemaViolation> {
    value
        .as_object()
        .ok_or_else(|| SchemaViolation::new(path, format!("expected object, got {}", kind(value))))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, SchemaViolation> {
    value
        .as_array()
        .ok_or_else(|| SchemaViolation::new(path, format!("expected array, got {}", kind(value))))
}

fn string_field(map: &Map<String, Value>, path: &str, key: &str) -> Result<String, SchemaViolation> {
    let value = required(map, path, key)?;
    value.as_str().map(str::to_string).ok_or_else(|| {
        SchemaViolation::new(&join(path, key), format!("expected string, got {}", kind(value)))
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn dialogue(value: &Value) -> Result<Vec<DialogueLine>, SchemaViolation> {
    let entries = as_array(value, "npc_dialogue")?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let path = format!("npc_dialogue[{i}]");
            let map = as_object(entry, &path)?;
            let npc_id = string_field(map, &path, "npc_id")?;
            let line = if map.contains_key("line") {
                string_field(map, &path, "line")?
            } else if map.contains_key("text") {
                string_field(map, &path, "text")?
            } else {
                return Err(SchemaViolation::new(&join(&path, "line"), "missing required field"));
            };
            Ok(DialogueLine {
                npc_id: NpcId::new(npc_id),
                line,
            })
        })
        .collect()
}

fn world_updates(value: &Value) -> Result<WorldUpdates, SchemaViolation> {
    let map = as_object(value, "world_updates")?;

    let player_location = match map.get("player_location") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(LocationId::new(s.trim())),
        Some(other) => {
            return Err(SchemaViolation::new(
                "world_updates.player_location",
                format!("expected string or null, got {}", kind(other)),
            ));
        }
    };

    let npc_moves = match map.get("npc_moves") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => as_array(v, "world_updates.npc_moves")?
            .iter()
            .enumerate()
            .map(|(i, m)| move_proposal(m, &format!("world_updates.npc_moves[{i}]")))
            .collect::<Result<_, _>>()?,
    };

    Ok(WorldUpdates {
        player_location,
        npc_moves,
    })
}

fn move_proposal(value: &Value, path: &str) -> Result<MoveProposal, SchemaViolation> {
    let map = as_object(value, path)?;

    let trigger_raw = string_field(map, path, "trigger")?;
    let trigger = Trigger::from_wire(&trigger_raw).ok_or_else(|| {
        SchemaViolation::new(&join(path, "trigger"), format!("unknown trigger '{trigger_raw}'"))
    })?;
    let permanence_raw = string_field(map, path, "permanence")?;
    let permanence = Permanence::from_wire(&permanence_raw).ok_or_else(|| {
        SchemaViolation::new(
            &join(path, "permanence"),
            format!("unknown permanence '{permanence_raw}'"),
        )
    })?;

    let confidence = match map.get("confidence") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let c = v.as_f64().ok_or_else(|| {
                SchemaViolation::new(&join(path, "confidence"), format!("expected number, got {}", kind(v)))
            })?;
            if !(0.0..=1.0).contains(&c) {
                return Err(SchemaViolation::new(&join(path, "confidence"), "must be within [0, 1]"));
            }
            #[allow(clippy::cast_possible_truncation)]
            Some(OrderedFloat(c as f32))
        }
    };

    Ok(MoveProposal {
        npc_id: NpcId::new(string_field(map, path, "npc_id")?),
        from_location: LocationId::new(string_field(map, path, "from_location")?),
        to_location: LocationId::new(string_field(map, path, "to_location")?),
        trigger,
        reason: string_field(map, path, "reason")?,
        permanence,
        confidence,
    })
}

fn safety(value: &Value) -> Result<SafetyFlag, SchemaViolation> {
    if let Value::Bool(refusal) = value {
        return Ok(SafetyFlag {
            refusal: *refusal,
            reason: None,
        });
    }

    let map = as_object(value, "safety")?;
    let key = if map.contains_key("refusal") { "refusal" } else { "refuse" };
    let flag = required(map, "safety", key).map_err(|_| {
        SchemaViolation::new("safety.refusal", "missing required field")
    })?;
    let refusal = flag.as_bool().ok_or_else(|| {
        SchemaViolation::new(&join("safety", key), format!("expected boolean, got {}", kind(flag)))
    })?;

    let reason = match map.get("reason") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(SchemaViolation::new(
                "safety.reason",
                format!("expected string or null, got {}", kind(other)),
            ));
        }
    };

    Ok(SafetyFlag { refusal, reason })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
