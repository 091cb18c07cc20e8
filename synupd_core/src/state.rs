/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::state
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Durable key/value state shared between runs: the retained
    artifact path and the periodic-check registration record.

  Security / Safety Notes:
    Stored in an operator-owned file; contains local paths and
    timestamps only.

  Dependencies:
    serde_json for the on-disk document.

  Operational Scope:
    Read and written by the download pipeline (retained path)
    and the scheduler (registration debounce).

  Revision History:
    2025-11-12 COD  Introduced persistent run state.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Read-modify-write under a single lock
    - Write-then-rename for crash consistency
    - Corrupt state degrades to defaults
============================================================*/

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynupdError};

/// Persisted registration of the periodic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// When the schedule was (re)registered, epoch millis.
    pub set_at_ms: i64,
    pub interval_minutes: u64,
}

/// On-disk state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Artifact kept from the last completed download.
    #[serde(default)]
    pub saved_file: Option<PathBuf>,
    #[serde(default)]
    pub schedule: Option<ScheduleRecord>,
}

/// Cloneable handle to the state file; all clones share one lock.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state; a missing or unreadable file reads as default.
    #[cfg(test)]
    pub fn load(&self) -> RunState {
        let _guard = self.lock.lock().unwrap_or_else(|poison| poison.into_inner());
        self.read_unlocked()
    }

    /// Apply `change` to the stored state atomically relative to other
    /// callers of this store, returning the value `change` produced.
    pub fn update<T>(&self, change: impl FnOnce(&mut RunState) -> T) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|poison| poison.into_inner());
        let mut state = self.read_unlocked();
        let outcome = change(&mut state);
        self.write_unlocked(&state)?;
        Ok(outcome)
    }

    #[cfg(test)]
    pub fn saved_file(&self) -> Option<PathBuf> {
        self.load().saved_file
    }

    pub fn set_saved_file(&self, path: Option<PathBuf>) -> Result<()> {
        self.update(|state| state.saved_file = path)
    }

    /// Forget and delete the previously retained artifact. Deletion is
    /// best-effort; the removed path is returned when one was recorded.
    pub fn remove_saved_file(&self) -> Result<Option<PathBuf>> {
        let previous = self.update(|state| state.saved_file.take())?;
        if let Some(path) = &previous {
            let _ = fs::remove_file(path);
        }
        Ok(previous)
    }

    fn read_unlocked(&self) -> RunState {
        fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn write_unlocked(&self, state: &RunState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                SynupdError::Filesystem(format!(
                    "Failed to create state directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let payload = serde_json::to_vec_pretty(state)
            .map_err(|err| SynupdError::Serialization(format!("Failed to encode state: {err}")))?;

        let mut temp_os = self.path.as_os_str().to_os_string();
        temp_os.push(".tmp");
        let temp_path = PathBuf::from(temp_os);
        fs::write(&temp_path, payload).map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to write state file {}: {err}",
                temp_path.display()
            ))
        })?;
        fs::rename(&temp_path, &self.path).map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to replace state file {}: {err}",
                self.path.display()
            ))
        })?;
        Ok(())
    }
}
