//! Run State & Locking
//!
//! Persists the engine's run state as atomic JSON under
//! `<root>/state/state.json` and guards mutating operations with an
//! advisory OS-level lock on `<root>/state/.lock`. A second concurrent
//! invocation sees busy instead of a torn install.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::error::SetupError;
use crate::fsutil;
use crate::types::{RunState, RunStatus, SetupStep};

/// Only state documents with this schema version are accepted on load.
pub const SCHEMA_VERSION: u32 = 1;

impl RunState {
    /// Fresh in-progress state at the start of a mutating run.
    pub fn begin(config_path: PathBuf, keys_path: PathBuf) -> RunState {
        let now = Utc::now().to_rfc3339();
        RunState {
            schema_version: SCHEMA_VERSION,
            status: RunStatus::InProgress,
            current_step: None,
            completed_steps: Vec::new(),
            start_time: now.clone(),
            last_updated: now,
            errors: Vec::new(),
            warnings: Vec::new(),
            config_path,
            keys_path,
            extra: serde_json::Map::new(),
        }
    }

    /// Load a state document, rejecting unknown shapes rather than guessing.
    pub fn load(path: &Path) -> Result<RunState, SetupError> {
        let corrupt = |reason: String| SetupError::StateCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let contents = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        let state: RunState =
            serde_json::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema_version {}",
                state.schema_version
            )));
        }
        Ok(state)
    }

    pub fn load_if_exists(path: &Path) -> Result<Option<RunState>, SetupError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Persist atomically, advancing `last_updated`. This is the recovery
    /// boundary between pipeline steps.
    pub fn save(&mut self, path: &Path) -> Result<(), SetupError> {
        self.last_updated = Utc::now().to_rfc3339();
        let json = serde_json::to_string_pretty(self).map_err(|e| SetupError::StateCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fsutil::write_atomic(path, json.as_bytes(), 0o644)?;
        debug!(status = ?self.status, step = ?self.current_step, "persisted run state");
        Ok(())
    }

    pub fn mark_step_started(&mut self, step: SetupStep) {
        self.current_step = Some(step);
    }

    pub fn mark_step_completed(&mut self, step: SetupStep) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.current_step = None;
    }

    pub fn mark_failed(&mut self, step: SetupStep, error: &SetupError) {
        self.status = RunStatus::Failed;
        self.current_step = Some(step);
        self.errors.push(format!("{}: {}: {}", step, error.code(), error));
    }
}

// ─── Advisory lock ───────────────────────────────────────────────

/// How long `status` waits for a shared lock before giving up.
const SHARED_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const SHARED_LOCK_POLL: Duration = Duration::from_millis(100);

/// RAII guard for the install's advisory lock. The lock is released when the
/// guard (and its file handle) drops.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    fn open(path: &Path) -> Result<File, SetupError> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| crate::error::write_error(path, e))
    }

    /// Exclusive lock for the full duration of a mutating operation.
    /// Non-blocking: a held lock surfaces as `lock_busy`.
    ///
    /// Trait-qualified call: std 1.89 grew inherent `File::try_lock_*`
    /// methods with a different error type, and inherent methods shadow the
    /// `fs4` trait.
    pub fn exclusive(path: &Path) -> Result<StateLock, SetupError> {
        let file = Self::open(path)?;
        match fs4::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "acquired exclusive lock");
                Ok(StateLock {
                    _file: file,
                    path: path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(SetupError::LockBusy {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(crate::error::write_error(path, err)),
        }
    }

    /// Shared lock for read-only inspection. Polls briefly so a status call
    /// racing a short mutation still succeeds, then times out.
    pub fn shared(path: &Path) -> Result<StateLock, SetupError> {
        let file = Self::open(path)?;
        let start = Instant::now();
        loop {
            match fs4::FileExt::try_lock_shared(&file) {
                Ok(()) => {
                    return Ok(StateLock {
                        _file: file,
                        path: path.to_path_buf(),
                    })
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= SHARED_LOCK_TIMEOUT {
                        return Err(SetupError::LockTimeout {
                            path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(SHARED_LOCK_POLL);
                }
                Err(err) => return Err(crate::error::write_error(path, err)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = RunState::begin(
            dir.path().join("config/manager.yaml"),
            dir.path().join("keys"),
        );
        state.mark_step_completed(SetupStep::Validate);
        state.warnings.push("no_network: offline".to_string());
        state.save(&path).unwrap();

        let loaded = RunState::load(&path).unwrap();
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
        assert_eq!(loaded.status, RunStatus::InProgress);
        assert_eq!(loaded.completed_steps, vec![SetupStep::Validate]);
        assert_eq!(loaded.warnings, state.warnings);
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = RunState::begin(PathBuf::from("/c"), PathBuf::from("/k"));
        state.save(&path).unwrap();

        // A future writer adds a key this binary does not know about.
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["future_field"] = serde_json::json!({"keep": true});
        fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();

        let mut reloaded = RunState::load(&path).unwrap();
        assert!(reloaded.extra.contains_key("future_field"));
        reloaded.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["future_field"]["keep"], serde_json::json!(true));
    }

    #[test]
    fn test_wrong_schema_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::begin(PathBuf::from("/c"), PathBuf::from("/k"));
        state.schema_version = 2;
        let json = serde_json::to_string(&state).unwrap();
        fs::write(&path, json).unwrap();

        let err = RunState::load(&path).unwrap_err();
        assert_eq!(err.code(), "state/state_corrupt");
    }

    #[test]
    fn test_garbage_state_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let err = RunState::load(&path).unwrap_err();
        assert_eq!(err.code(), "state/state_corrupt");
    }

    #[test]
    fn test_mark_failed_records_code() {
        let mut state = RunState::begin(PathBuf::from("/c"), PathBuf::from("/k"));
        let err = SetupError::KeygenFailed {
            reason: "no entropy".to_string(),
        };
        state.mark_failed(SetupStep::Keygen, &err);
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.errors[0].starts_with("keygen: crypto/keygen_failed"));
    }

    #[test]
    fn test_exclusive_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let first = StateLock::exclusive(&path).unwrap();
        let err = StateLock::exclusive(&path).unwrap_err();
        assert_eq!(err.code(), "state/lock_busy");
        assert!(err.is_busy());

        drop(first);
        StateLock::exclusive(&path).unwrap();
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let _a = StateLock::shared(&path).unwrap();
        let _b = StateLock::shared(&path).unwrap();
    }

    #[test]
    fn test_shared_lock_times_out_against_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let _writer = StateLock::exclusive(&path).unwrap();
        let err = StateLock::shared(&path).unwrap_err();
        assert_eq!(err.code(), "state/lock_timeout");
    }
}
