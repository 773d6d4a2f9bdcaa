//! Durable session storage.
//!
//! Three kinds of data are kept per session:
//!
//! - the **world snapshot** the session was created from, written once;
//! - the **current state**, overwritten after every committed turn;
//! - the **turn log**, append-only, one [`TurnRecord`] per committed turn.
//!
//! Two backends implement [`SessionStore`]: [`SqliteSessionStore`] (the
//! default) and [`JsonSessionStore`] (plain files, handy for inspecting a
//! session by hand).

mod json;
mod sqlite;

pub use json::JsonSessionStore;
pub use sqlite::SqliteSessionStore;

use crate::config::{PersistenceConfig, StoreBackend};
use crate::error::Result;
use crate::turn::TurnRecord;
use crate::types::SessionId;
use crate::world::{WorldSnapshot, WorldState};

/// Storage for snapshots, current state and turn logs.
///
/// Implementations are internally synchronised and may be shared across
/// sessions.
pub trait SessionStore: Send + Sync {
    /// Persist the world a session started from.
    ///
    /// # Errors
    /// [`StoryError::SnapshotExists`](crate::StoryError::SnapshotExists) if
    /// one was already written for this session.
    fn save_snapshot(&self, session_id: &SessionId, snapshot: &WorldSnapshot) -> Result<()>;

    /// Load the world a session started from.
    ///
    /// # Errors
    /// Storage or decoding failures.
    fn load_snapshot(&self, session_id: &SessionId) -> Result<Option<WorldSnapshot>>;

    /// Overwrite the current state of `state.session_id`.
    ///
    /// # Errors
    /// Storage or encoding failures.
    fn save_state(&self, state: &WorldState) -> Result<()>;

    /// Load the current state of a session.
    ///
    /// # Errors
    /// Storage or decoding failures.
    fn load_state(&self, session_id: &SessionId) -> Result<Option<WorldState>>;

    /// Append one record to the session's turn log.
    ///
    /// # Errors
    /// Storage or encoding failures.
    fn append_turn(&self, record: &TurnRecord) -> Result<()>;

    /// The most recent `limit` turns (all of them for `None`), oldest first.
    ///
    /// # Errors
    /// Storage failures.
    fn read_turns(&self, session_id: &SessionId, limit: Option<usize>) -> Result<Vec<TurnRecord>>;

    /// Append the record and overwrite the state as one unit.
    ///
    /// The default runs the two writes in sequence; backends with
    /// transactions override it.
    ///
    /// # Errors
    /// Either write failing.
    fn commit_turn(&self, record: &TurnRecord, state: &WorldState) -> Result<()> {
        self.append_turn(record)?;
        self.save_state(state)
    }

    /// Sessions that have a stored state.
    ///
    /// # Errors
    /// Storage failures.
    fn list_sessions(&self) -> Result<Vec<SessionId>>;

    /// Take a backup if the backend supports it.
    ///
    /// # Errors
    /// Backup failures.
    fn create_backup(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the backend selected by `config`.
///
/// # Errors
/// Returns an error if the database or directory cannot be opened.
pub fn open_store(config: &PersistenceConfig) -> Result<Box<dyn SessionStore>> {
    match config.backend {
        StoreBackend::Sqlite => Ok(Box::new(SqliteSessionStore::open(&config.path, config)?)),
        StoreBackend::Json => Ok(Box::new(JsonSessionStore::open(&config.path)?)),
    }
}
