//! Plain-file session store.
//!
//! ```text
//! <root>/<session_id>/world.json    snapshot, written once
//! <root>/<session_id>/state.json    current state, replaced via rename
//! <root>/<session_id>/turns.jsonl   one TurnRecord per line
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::SessionStore;
use crate::error::{Result, StoryError};
use crate::turn::TurnRecord;
use crate::types::SessionId;
use crate::world::{WorldSnapshot, WorldState};

const WORLD_FILE: &str = "world.json";
const STATE_FILE: &str = "state.json";
const TURNS_FILE: &str = "turns.jsonl";

/// Session store writing JSON files under a root directory.
#[derive(Debug)]
pub struct JsonSessionStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonSessionStore {
    /// Use `root` as the sessions directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Io`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(path = %root.display(), "JSON session store opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    // SessionId only admits [A-Za-z0-9_-], so the join cannot escape root.
    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn ensure_dir(&self, session_id: &SessionId) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = Self::write_tmp(path, bytes)?;
        Self::publish(&tmp, path)
    }

    /// Write `bytes` next to `path` and sync them; nothing is visible yet.
    fn write_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
        let tmp = path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(tmp)
    }

    /// Move a synced temp file into place and make the rename durable.
    fn publish(tmp: &Path, path: &Path) -> Result<()> {
        fs::rename(tmp, path)?;
        match path.parent() {
            Some(dir) => Self::sync_dir(dir),
            None => Ok(()),
        }
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> Result<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> Result<()> {
        Ok(())
    }

    /// Append one record and return the log length before the write.
    ///
    /// A failed write is cut back off so no torn line is left behind.
    fn append_line(path: &Path, record: &TurnRecord) -> Result<u64> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let before = file.metadata()?.len();
        if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
            if let Err(cut) = file.set_len(before) {
                warn!(path = %path.display(), error = %cut, "Could not trim partial turn log line");
            }
            return Err(e.into());
        }
        Ok(before)
    }

    fn truncate_log(path: &Path, len: u64) {
        let trimmed = OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_len(len).and_then(|()| file.sync_data()));
        if let Err(e) = trimmed {
            warn!(path = %path.display(), len, error = %e, "Could not roll back turn log");
        }
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionStore for JsonSessionStore {
    fn save_snapshot(&self, session_id: &SessionId, snapshot: &WorldSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.ensure_dir(session_id)?.join(WORLD_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoryError::SnapshotExists(session_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let json = serde_json::to_vec_pretty(snapshot)?;
        file.write_all(&json)?;
        file.sync_all()?;
        debug!(session = %session_id, bytes = json.len(), "Saved world snapshot");
        Ok(())
    }

    fn load_snapshot(&self, session_id: &SessionId) -> Result<Option<WorldSnapshot>> {
        let path = self.session_dir(session_id).join(WORLD_FILE);
        Self::read_optional(&path)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoryError::from))
            .transpose()
    }

    fn save_state(&self, state: &WorldState) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.ensure_dir(&state.session_id)?.join(STATE_FILE);
        let json = serde_json::to_vec_pretty(state)?;
        Self::write_atomic(&path, &json)?;
        debug!(session = %state.session_id, turn = state.last_turn_id, bytes = json.len(), "Saved session state");
        Ok(())
    }

    fn load_state(&self, session_id: &SessionId) -> Result<Option<WorldState>> {
        let path = self.session_dir(session_id).join(STATE_FILE);
        Self::read_optional(&path)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoryError::from))
            .transpose()
    }

    fn append_turn(&self, record: &TurnRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.ensure_dir(&record.session_id)?.join(TURNS_FILE);
        Self::append_line(&path, record)?;
        debug!(session = %record.session_id, turn = record.turn_id, "Appended turn");
        Ok(())
    }

    /// Stage the state, append the record, then publish the state.
    ///
    /// If the rename fails the log is cut back to its previous length, so a
    /// failed commit leaves neither file changed.
    fn commit_turn(&self, record: &TurnRecord, state: &WorldState) -> Result<()> {
        let _guard = self.write_lock.lock();
        let dir = self.ensure_dir(&state.session_id)?;
        let state_path = dir.join(STATE_FILE);
        let log_path = dir.join(TURNS_FILE);

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = Self::write_tmp(&state_path, &json)?;
        let log_len = match Self::append_line(&log_path, record) {
            Ok(len) => len,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, &state_path) {
            Self::truncate_log(&log_path, log_len);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        // Both files now hold the turn; only the rename's durability is left.
        Self::sync_dir(&dir)?;
        debug!(session = %state.session_id, turn = record.turn_id, bytes = json.len(), "Committed turn");
        Ok(())
    }

    fn read_turns(&self, session_id: &SessionId, limit: Option<usize>) -> Result<Vec<TurnRecord>> {
        let path = self.session_dir(session_id).join(TURNS_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut turns = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TurnRecord>(&line) {
                Ok(record) => turns.push(record),
                Err(e) => warn!(session = %session_id, line = n + 1, error = %e, "Skipping corrupt turn log line"),
            }
        }
        if let Some(limit) = limit {
            let skip = turns.len().saturating_sub(limit);
            turns.drain(..skip);
        }
        Ok(turns)
    }

    fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(STATE_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match SessionId::parse(&name) {
                Ok(id) => sessions.push(id),
                Err(_) => warn!(dir = %name, "Skipping directory with invalid session id"),
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}
