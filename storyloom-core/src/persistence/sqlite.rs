//! SQLite session store.
//!
//! ```sql
//! CREATE TABLE world_snapshots (session_id TEXT PRIMARY KEY, data BLOB, created_at TEXT, checksum TEXT);
//! CREATE TABLE session_state   (session_id TEXT PRIMARY KEY, data BLOB, last_turn_id INTEGER, updated_at TEXT, checksum TEXT);
//! CREATE TABLE turn_log        (session_id TEXT, turn_id INTEGER, data BLOB, committed_at TEXT, checksum TEXT,
//!                               PRIMARY KEY (session_id, turn_id));
//! ```
//!
//! - WAL mode so readers never wait on the turn writer.
//! - JSON inside BLOB columns keeps the schema stable as the types evolve.
//! - Optional CRC-32 checksum column detects corrupted rows.
//! - `commit_turn` writes the log row and the state row in one transaction.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::SessionStore;
use crate::checksum::crc32_hex;
use crate::config::PersistenceConfig;
use crate::error::{Result, StoryError};
use crate::turn::TurnRecord;
use crate::types::SessionId;
use crate::world::{WorldSnapshot, WorldState};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS world_snapshots (
        session_id TEXT PRIMARY KEY,
        data       BLOB NOT NULL,
        created_at TEXT NOT NULL,
        checksum   TEXT
    );
    CREATE TABLE IF NOT EXISTS session_state (
        session_id   TEXT PRIMARY KEY,
        data         BLOB NOT NULL,
        last_turn_id INTEGER NOT NULL,
        updated_at   TEXT NOT NULL,
        checksum     TEXT
    );
    CREATE TABLE IF NOT EXISTS turn_log (
        session_id   TEXT NOT NULL,
        turn_id      INTEGER NOT NULL,
        data         BLOB NOT NULL,
        committed_at TEXT NOT NULL,
        checksum     TEXT,
        PRIMARY KEY (session_id, turn_id)
    );
";

/// Session store backed by a single SQLite database.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteSessionStore {
    /// Open (or create) the database at `path`, creating parent directories
    /// and the schema as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Database`] on SQLite failures or
    /// [`StoryError::Io`] if the parent directory cannot be created.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Session store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn checksum(&self, data: &[u8]) -> Option<String> {
        self.config.checksum_enabled.then(|| crc32_hex(data))
    }

    /// Decode a row, warning when its checksum does not match.
    fn decode<T: DeserializeOwned>(
        &self,
        what: &'static str,
        session_id: &SessionId,
        data: &[u8],
        stored: Option<&str>,
    ) -> Result<T> {
        if self.config.checksum_enabled {
            if let Some(expected) = stored {
                let actual = crc32_hex(data);
                if expected != actual {
                    warn!(
                        session = %session_id,
                        table = what,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch, possible corruption"
                    );
                }
            }
        }
        Ok(serde_json::from_slice(data)?)
    }

    fn write_state(&self, conn: &Connection, state: &WorldState) -> Result<usize> {
        let json = serde_json::to_vec(state)?;
        let last_turn = i64::try_from(state.last_turn_id)
            .map_err(|_| StoryError::Serialization("turn id exceeds i64".to_string()))?;
        conn.execute(
            "INSERT INTO session_state (session_id, data, last_turn_id, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                data = excluded.data,
                last_turn_id = excluded.last_turn_id,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![
                state.session_id.as_str(),
                json,
                last_turn,
                Utc::now().to_rfc3339(),
                self.checksum(&json)
            ],
        )?;
        Ok(json.len())
    }

    fn write_turn(&self, conn: &Connection, record: &TurnRecord) -> Result<usize> {
        let json = serde_json::to_vec(record)?;
        let turn_id = i64::try_from(record.turn_id)
            .map_err(|_| StoryError::Serialization("turn id exceeds i64".to_string()))?;
        conn.execute(
            "INSERT INTO turn_log (session_id, turn_id, data, committed_at, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.session_id.as_str(),
                turn_id,
                json,
                record.timestamp.to_rfc3339(),
                self.checksum(&json)
            ],
        )?;
        Ok(json.len())
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let conn = self.conn.lock();
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Write `<db>.bak.1`, shifting older backups up and keeping at most
    /// `backup_count` of them.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Database`] or [`StoryError::Io`] on failure.
    pub fn create_rotating_backup(&self) -> Result<()> {
        if self.db_path.as_os_str() == ":memory:" {
            return Ok(());
        }
        let max = self.config.backup_count;
        if max == 0 {
            return Ok(());
        }

        for i in (1..max).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                std::fs::rename(&src, self.backup_path(i + 1))?;
            }
        }
        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }

        self.backup(self.backup_path(1))?;
        info!(max_backups = max, "Rotating backup created");
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    /// Database file, or `:memory:`.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `PRAGMA integrity_check`; `Ok(false)` means corruption.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

impl SessionStore for SqliteSessionStore {
    fn save_snapshot(&self, session_id: &SessionId, snapshot: &WorldSnapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)?;
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO world_snapshots (session_id, data, created_at, checksum)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id.as_str(),
                json,
                Utc::now().to_rfc3339(),
                self.checksum(&json)
            ],
        )?;
        if inserted == 0 {
            return Err(StoryError::SnapshotExists(session_id.clone()));
        }
        debug!(session = %session_id, bytes = json.len(), "Saved world snapshot");
        Ok(())
    }

    fn load_snapshot(&self, session_id: &SessionId) -> Result<Option<WorldSnapshot>> {
        let row: Option<(Vec<u8>, Option<String>)> = self
            .conn
            .lock()
            .prepare_cached("SELECT data, checksum FROM world_snapshots WHERE session_id = ?1")?
            .query_row(params![session_id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        row.map(|(data, sum)| self.decode("world_snapshots", session_id, &data, sum.as_deref()))
            .transpose()
    }

    fn save_state(&self, state: &WorldState) -> Result<()> {
        let start = Instant::now();
        let bytes = self.write_state(&self.conn.lock(), state)?;
        debug!(
            session = %state.session_id,
            turn = state.last_turn_id,
            bytes,
            elapsed_us = start.elapsed().as_micros(),
            "Saved session state"
        );
        Ok(())
    }

    fn load_state(&self, session_id: &SessionId) -> Result<Option<WorldState>> {
        let start = Instant::now();
        let row: Option<(Vec<u8>, Option<String>)> = self
            .conn
            .lock()
            .prepare_cached("SELECT data, checksum FROM session_state WHERE session_id = ?1")?
            .query_row(params![session_id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((data, sum)) = row else {
            return Ok(None);
        };
        let state: WorldState = self.decode("session_state", session_id, &data, sum.as_deref())?;
        debug!(
            session = %session_id,
            turn = state.last_turn_id,
            elapsed_us = start.elapsed().as_micros(),
            "Loaded session state"
        );
        Ok(Some(state))
    }

    fn append_turn(&self, record: &TurnRecord) -> Result<()> {
        let bytes = self.write_turn(&self.conn.lock(), record)?;
        debug!(session = %record.session_id, turn = record.turn_id, bytes, "Appended turn");
        Ok(())
    }

    fn read_turns(&self, session_id: &SessionId, limit: Option<usize>) -> Result<Vec<TurnRecord>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT data, checksum FROM turn_log WHERE session_id = ?1
             ORDER BY turn_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id.as_str(), limit], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (data, sum) = row?;
            turns.push(self.decode("turn_log", session_id, &data, sum.as_deref())?);
        }
        turns.reverse();
        Ok(turns)
    }

    fn commit_turn(&self, record: &TurnRecord, state: &WorldState) -> Result<()> {
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let log_bytes = self.write_turn(&tx, record)?;
        let state_bytes = self.write_state(&tx, state)?;
        tx.commit()?;
        debug!(
            session = %state.session_id,
            turn = record.turn_id,
            log_bytes,
            state_bytes,
            elapsed_us = start.elapsed().as_micros(),
            "Committed turn"
        );
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT session_id FROM session_state ORDER BY session_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut sessions = Vec::new();
        for row in rows {
            let raw = row?;
            match SessionId::parse(&raw) {
                Ok(id) => sessions.push(id),
                Err(_) => warn!(id = %raw, "Skipping row with invalid session id"),
            }
        }
        Ok(sessions)
    }

    fn create_backup(&self) -> Result<()> {
        self.create_rotating_backup()
    }
}

/// Adds `.optional()` to `rusqlite::Result`, mapping `QueryReturnedNoRows`
/// to `Ok(None)`.
trait OptionalExt<T> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
