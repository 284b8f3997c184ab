//! On-disk persistence for the state document.
//!
//! `state.json` is written atomically (temp file, fsync, rename); the prior
//! content is copied to `state.json.bak` first so the diff reporter can show
//! what the last apply changed. A missing file reads as empty initialized
//! state; a corrupt file is surfaced as an error, never silently reset.

use super::{STATE_SCHEMA_VERSION, State};
use crate::core::TomeiError;
use crate::utils::fs::ensure_dir;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join("state.json.bak")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("state.lock")
    }

    /// Reads the current state. Absent file means empty state; a present but
    /// undecodable file refuses to proceed.
    pub fn load(&self) -> Result<State, TomeiError> {
        read_state(&self.state_path())?.map_or_else(|| Ok(State::new()), Ok)
    }

    /// Reads the backup snapshot, if one exists.
    pub fn load_backup(&self) -> Result<Option<State>, TomeiError> {
        read_state(&self.backup_path())
    }

    /// Persists atomically: write `state.json.tmp`, copy the previous
    /// `state.json` to `state.json.bak`, then rename the temp file over
    /// `state.json`.
    pub fn save(&self, state: &State) -> Result<(), TomeiError> {
        let state_path = self.state_path();
        ensure_dir(&self.data_dir)
            .map_err(|e| io_error(&self.data_dir, std::io::Error::other(e.to_string())))?;

        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| io_error(&state_path, std::io::Error::other(e.to_string())))?;

        let temp_path = self.data_dir.join("state.json.tmp");
        {
            let mut file =
                fs::File::create(&temp_path).map_err(|e| io_error(&temp_path, e))?;
            file.write_all(&content).map_err(|e| io_error(&temp_path, e))?;
            file.sync_all().map_err(|e| io_error(&temp_path, e))?;
        }

        if state_path.exists() {
            fs::copy(&state_path, self.backup_path())
                .map_err(|e| io_error(&self.backup_path(), e))?;
        }

        fs::rename(&temp_path, &state_path).map_err(|e| io_error(&state_path, e))?;
        debug!(path = %state_path.display(), "state saved");
        Ok(())
    }
}

fn read_state(path: &Path) -> Result<Option<State>, TomeiError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };

    // Peek at the schema version before a full decode so a newer layout is
    // reported as a version problem, not as corruption.
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| TomeiError::StateCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let version = value.get("schemaVersion").and_then(|v| v.as_str()).unwrap_or("");
    if version != STATE_SCHEMA_VERSION {
        return Err(TomeiError::StateVersion {
            path: path.to_path_buf(),
            version: version.to_string(),
        });
    }

    let state: State = serde_json::from_value(value).map_err(|e| TomeiError::StateCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(state))
}

fn io_error(path: &Path, source: std::io::Error) -> TomeiError {
    TomeiError::StateIo { path: path.to_path_buf(), source }
}
