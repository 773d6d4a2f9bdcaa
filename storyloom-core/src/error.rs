//! Error types for the Storyloom core library.
//!
//! Two families live here:
//!
//! - [`StoryError`]: infrastructure failures (storage, configuration,
//!   malformed worlds, bad session ids).
//! - [`TurnError`]: the closed taxonomy a single turn can end in. Every
//!   variant except [`TurnError::Persistence`] leaves the session's
//!   [`WorldState`](crate::WorldState) exactly as it was before the turn.

use std::fmt;

use thiserror::Error;

use crate::movement::IllegalMove;
use crate::retrieval::MissingContext;
use crate::safety::ConsistencyViolation;
use crate::types::{NpcId, SessionId};
use crate::validation::SchemaViolation;

/// Top-level error type for infrastructure operations.
#[derive(Error, Debug)]
pub enum StoryError {
    /// A world snapshot or world state broke one of its invariants.
    #[error("Invalid world: {0}")]
    InvalidWorld(String),

    /// A session id was empty or contained characters unsafe for storage.
    #[error("Invalid session id '{id}': {reason}")]
    InvalidSession {
        /// The offending id.
        id: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// No stored state exists for the session.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// A world snapshot was written twice for the same session.
    #[error("World snapshot already exists for session {0}")]
    SnapshotExists(SessionId),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The context index rejected an operation.
    #[error("Index error: {0}")]
    Index(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, StoryError>;

/// Who a rejected move belonged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveSubject {
    /// The player's own location change.
    Player,
    /// A proposed NPC relocation.
    Npc(NpcId),
}

impl fmt::Display for MoveSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player => write!(f, "player"),
            Self::Npc(id) => write!(f, "npc {id}"),
        }
    }
}

/// Why a single generation attempt was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The generative boundary returned an error or empty text.
    Generation(String),
    /// The attempt exceeded its deadline.
    Timeout {
        /// Deadline in milliseconds.
        after_ms: u64,
    },
    /// The text did not parse into a turn output.
    Schema(SchemaViolation),
    /// The output mentioned a guarded term.
    Consistency(ConsistencyViolation),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation(msg) => write!(f, "generation failed: {msg}"),
            Self::Timeout { after_ms } => write!(f, "generation timed out after {after_ms}ms"),
            Self::Schema(v) => write!(f, "schema: {v}"),
            Self::Consistency(v) => write!(f, "consistency: {v}"),
        }
    }
}

/// The closed set of ways a turn can fail.
#[derive(Error, Debug)]
pub enum TurnError {
    /// A mandatory context document could not be assembled.
    #[error("Missing mandatory context: {0}")]
    MissingContext(MissingContext),

    /// The generative boundary failed or kept producing unusable output
    /// until the re-prompt budget ran out.
    #[error("Generative source unavailable after {attempts} attempt(s); last failure: {last_failure}")]
    GenerativeUnavailable {
        /// Attempts made, including the first.
        attempts: u32,
        /// What went wrong on the final attempt.
        last_failure: AttemptFailure,
    },

    /// The model output was missing or mistyped a required field.
    #[error("Turn output failed schema validation: {0}")]
    SchemaValidation(SchemaViolation),

    /// The model output broke a world-bible taboo.
    #[error("Turn output violates world consistency: {0}")]
    ConsistencyViolation(ConsistencyViolation),

    /// A proposed location change is illegal under the world graph.
    #[error("Illegal move for {subject}: {reason}")]
    MovementIllegal {
        /// Whose move it was.
        subject: MoveSubject,
        /// Which legality check failed.
        reason: IllegalMove,
    },

    /// The turn could not be made durable.
    #[error("Persistence failed: {0}")]
    Persistence(#[source] StoryError),

    /// The session has no state to run a turn against.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
}

impl TurnError {
    /// Whether the caller may simply retry the turn.
    ///
    /// Everything except a durability failure aborted before any mutation.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }
}

impl From<MissingContext> for TurnError {
    fn from(missing: MissingContext) -> Self {
        Self::MissingContext(missing)
    }
}
