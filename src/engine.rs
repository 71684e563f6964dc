//! Setup Engine
//!
//! The state machine that binds probe, validator, provisioner, and emitter
//! into the setup pipeline, persisting run state after every successful step
//! so an interrupted run can resume or be diagnosed. Exposes `setup`,
//! `status`, `reset`, and `repair`; all mutating operations hold the
//! exclusive advisory lock for their full duration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use tracing::{info, warn};

use crate::config;
use crate::error::SetupError;
use crate::fsutil;
use crate::keys;
use crate::layout::Layout;
use crate::probe::{gather_facts, PlatformProbe};
use crate::service;
use crate::state::StateLock;
use crate::types::{
    EnvironmentFacts, RunState, RunStatus, SetupOptions, SetupStep, ValidationVerdict,
};
use crate::validate::{validate, MIN_DISK_BYTES};

// ─── Reports ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Pipeline ran to completion.
    Completed,
    /// A healthy install was already present; nothing was re-provisioned.
    AlreadyInstalled,
    /// Validation errors blocked the run and `force` was not set.
    ValidationBlocked,
    /// `--validate-only`: verdict reported, nothing mutated.
    ValidateOnly,
}

#[derive(Clone, Debug)]
pub struct SetupReport {
    pub outcome: SetupOutcome,
    pub verdict: ValidationVerdict,
    pub warnings: Vec<String>,
    pub fingerprint: Option<String>,
    pub config_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallHealth {
    /// Completed install, every artifact present and parseable.
    Healthy,
    /// No install root or no run state on disk.
    NotInstalled,
    /// Install exists but something is missing or unreadable.
    Degraded(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct StatusReport {
    pub health: InstallHealth,
    pub state: Option<RunState>,
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub fingerprint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Removed,
    NothingToRemove,
    /// Confirmation was not given.
    Refused,
}

// ─── Engine ──────────────────────────────────────────────────────

pub struct SetupEngine {
    probe: Box<dyn PlatformProbe>,
    options: SetupOptions,
    home: PathBuf,
    layout: Layout,
    config_path: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl SetupEngine {
    /// Resolve the home directory and layout for this invocation. The engine
    /// owns all mutable handles; components only ever see read-only
    /// snapshots.
    pub fn new(probe: Box<dyn PlatformProbe>, options: SetupOptions) -> Result<SetupEngine, SetupError> {
        let home = match &options.home_dir_override {
            Some(path) => path.clone(),
            None => dirs::home_dir().ok_or_else(|| SetupError::NoWritableHome {
                path: PathBuf::new(),
            })?,
        };
        let layout = Layout::resolve(&home, None);
        let config_path = options
            .config_path_override
            .clone()
            .unwrap_or_else(|| layout.config_file());

        Ok(SetupEngine {
            probe,
            options,
            home,
            layout,
            config_path,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Flag checked between pipeline steps. Wire this to a signal handler;
    /// a step that has begun always runs to completion.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn check_cancelled(&self) -> Result<(), SetupError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(SetupError::Interrupted)
        } else {
            Ok(())
        }
    }

    // ─── setup ───────────────────────────────────────────────────

    pub async fn setup(&self) -> Result<SetupReport, SetupError> {
        let (facts, probe_warnings) = gather_facts(self.probe.as_ref(), &self.home).await?;
        let verdict = validate(&facts);

        if self.options.validate_only {
            return Ok(SetupReport {
                outcome: SetupOutcome::ValidateOnly,
                verdict,
                warnings: probe_warnings,
                fingerprint: self.current_fingerprint(),
                config_path: self.config_path.clone(),
            });
        }

        // Blocked validation must leave nothing on disk, so the verdict is
        // decided before the root (and the lock under it) exists.
        if !verdict.can_proceed && !self.options.force {
            return Ok(SetupReport {
                outcome: SetupOutcome::ValidationBlocked,
                verdict,
                warnings: probe_warnings,
                fingerprint: None,
                config_path: self.config_path.clone(),
            });
        }

        fsutil::ensure_dir(&self.layout.root, 0o755)?;
        fsutil::ensure_dir(&self.layout.state, 0o755)?;
        let _lock = StateLock::exclusive(&self.layout.lock_file())?;

        let state_file = self.layout.state_file();
        let existing = match RunState::load_if_exists(&state_file) {
            Ok(existing) => existing,
            // A forced run may discard an unreadable state document.
            Err(_) if self.options.force => None,
            Err(err) => return Err(err),
        };

        if let Some(state) = existing {
            if state.status == RunStatus::Completed && !self.options.force {
                let issues = self.verify_artifacts();
                if issues.is_empty() {
                    // Service registration is honored even when nothing else
                    // needs provisioning.
                    let mut warnings = probe_warnings;
                    if self.options.install_service {
                        match service::install(&self.layout, facts.os_family)? {
                            Ok(path) => {
                                info!(path = %path.display(), "service definition installed")
                            }
                            Err(warning) => warnings.push(warning),
                        }
                    }
                    let mut state = state;
                    state.save(&state_file)?;
                    info!("install already complete and healthy");
                    return Ok(SetupReport {
                        outcome: SetupOutcome::AlreadyInstalled,
                        verdict,
                        warnings,
                        fingerprint: self.current_fingerprint(),
                        config_path: self.config_path.clone(),
                    });
                }
                warn!(?issues, "completed install has missing artifacts, repairing");
            }
            if state.status == RunStatus::Completed && self.options.force {
                fsutil::backup_rename(&self.config_path, &fsutil::backup_timestamp())?;
            }
        }

        let report = self
            .run_pipeline(&facts, &verdict, probe_warnings, self.options.force)
            .await?;
        Ok(report)
    }

    // ─── status ──────────────────────────────────────────────────

    /// Inspect the install without mutating it.
    pub fn status(&self) -> Result<StatusReport, SetupError> {
        let state_file = self.layout.state_file();
        if !self.layout.root.is_dir() || !state_file.exists() {
            return Ok(StatusReport {
                health: InstallHealth::NotInstalled,
                state: None,
                root: self.layout.root.clone(),
                config_path: self.config_path.clone(),
                fingerprint: None,
            });
        }

        let _lock = StateLock::shared(&self.layout.lock_file())?;

        let (state, mut issues) = match RunState::load(&state_file) {
            Ok(state) => (Some(state), Vec::new()),
            Err(err) => (None, vec![format!("state: {}", err)]),
        };

        issues.extend(self.verify_artifacts());
        if let Some(ref state) = state {
            if state.status != RunStatus::Completed {
                issues.push(format!(
                    "state: last run did not complete (status {:?})",
                    state.status
                ));
            }
        }

        let health = if issues.is_empty() {
            InstallHealth::Healthy
        } else {
            InstallHealth::Degraded(issues)
        };

        Ok(StatusReport {
            health,
            state,
            root: self.layout.root.clone(),
            config_path: self.config_path.clone(),
            fingerprint: self.current_fingerprint(),
        })
    }

    // ─── reset ───────────────────────────────────────────────────

    /// Delete the entire install root. Touches nothing outside it.
    pub fn reset(&self, confirmed: bool) -> Result<ResetOutcome, SetupError> {
        if !confirmed && !self.options.force {
            return Ok(ResetOutcome::Refused);
        }
        if !self.layout.root.exists() {
            return Ok(ResetOutcome::NothingToRemove);
        }

        // Exclude concurrent mutators for the duration of the delete. The
        // lock file itself lives under root; on POSIX the held descriptor
        // stays valid after the unlink.
        let _lock = StateLock::exclusive(&self.layout.lock_file())?;
        fs::remove_dir_all(&self.layout.root).map_err(|source| SetupError::RemoveFailed {
            path: self.layout.root.clone(),
            source,
        })?;
        info!(root = %self.layout.root.display(), "install removed");
        Ok(ResetOutcome::Removed)
    }

    // ─── repair ──────────────────────────────────────────────────

    /// Re-run every step whose effect is missing on disk. Present-and-valid
    /// artifacts are never overwritten.
    pub async fn repair(&self) -> Result<SetupReport, SetupError> {
        let state_file = self.layout.state_file();
        if !self.layout.root.is_dir() || !state_file.exists() {
            return Err(SetupError::StateCorrupt {
                path: state_file,
                reason: "no install to repair".to_string(),
            });
        }

        let _lock = StateLock::exclusive(&self.layout.lock_file())?;
        // Unknown state shapes are rejected, not repaired around.
        let _previous = RunState::load(&state_file)?;

        let (facts, probe_warnings) = gather_facts(self.probe.as_ref(), &self.home).await?;
        if let Some(err) = blocking_error(&facts) {
            if !self.options.force {
                return Err(err.in_step(SetupStep::Validate));
            }
        }
        let verdict = validate(&facts);

        self.run_pipeline(&facts, &verdict, probe_warnings, false).await
    }

    // ─── pipeline ────────────────────────────────────────────────

    /// The sequential step pipeline. Caller holds the exclusive lock. Run
    /// state is persisted after every successful step; that persist is the
    /// recovery boundary.
    ///
    /// `force_rekey` only controls key regeneration; overridden validation
    /// errors are recorded whenever the run itself was forced, so forced
    /// repairs stay as auditable as forced setups.
    async fn run_pipeline(
        &self,
        facts: &EnvironmentFacts,
        verdict: &ValidationVerdict,
        probe_warnings: Vec<String>,
        force_rekey: bool,
    ) -> Result<SetupReport, SetupError> {
        let state_file = self.layout.state_file();
        let mut state = RunState::begin(self.config_path.clone(), self.layout.keys.clone());
        state.warnings.extend(probe_warnings.iter().cloned());
        state.warnings.extend(verdict.warnings.iter().cloned());
        if self.options.force && !verdict.can_proceed {
            for error in &verdict.errors {
                state.warnings.push(format!("forced: {}", error));
            }
        }

        let setup_timestamp = Utc::now().to_rfc3339();
        let mut fingerprint = None;

        for step in SetupStep::ALL {
            self.check_cancelled()
                .or_else(|err| self.fail_step(&mut state, &state_file, step, err))?;

            state.mark_step_started(step);
            let result = match step {
                // Validation itself happened before the lock; the step
                // records its verdict in the run state.
                SetupStep::Validate => Ok(()),
                SetupStep::Provision => self.step_provision(),
                SetupStep::Keygen => match self.step_keygen(force_rekey) {
                    Ok(fp) => {
                        fingerprint = Some(fp);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
                SetupStep::EmitConfig => {
                    self.step_emit_config(facts, &setup_timestamp, &mut state.warnings)
                }
                SetupStep::PersistState => {
                    state.status = RunStatus::Completed;
                    Ok(())
                }
            };
            result.or_else(|err| self.fail_step(&mut state, &state_file, step, err))?;

            state.mark_step_completed(step);
            state.save(&state_file)?;
        }

        info!(
            fingerprint = fingerprint.as_deref().unwrap_or(""),
            "setup pipeline completed"
        );
        Ok(SetupReport {
            outcome: SetupOutcome::Completed,
            verdict: verdict.clone(),
            warnings: state.warnings,
            fingerprint,
            config_path: self.config_path.clone(),
        })
    }

    /// Record a step failure into the run state (best effort) and surface
    /// the wrapped error. Nothing is retried.
    fn fail_step(
        &self,
        state: &mut RunState,
        state_file: &Path,
        step: SetupStep,
        err: SetupError,
    ) -> Result<(), SetupError> {
        state.mark_failed(step, &err);
        if let Err(save_err) = state.save(state_file) {
            warn!(%save_err, "could not persist failed run state");
        }
        Err(err.in_step(step))
    }

    fn step_provision(&self) -> Result<(), SetupError> {
        self.layout.provision()?;
        // Pre-create the agent's log file so every path the config document
        // references exists after setup.
        let log_file = self.layout.log_file();
        if !log_file.exists() {
            fsutil::write_atomic(&log_file, b"", 0o644)?;
        }
        Ok(())
    }

    fn step_keygen(&self, force: bool) -> Result<String, SetupError> {
        let (key, _outcome) = keys::ensure_owner_key(
            &self.layout.private_key_file(),
            &self.layout.public_key_file(),
            force,
        )?;
        Ok(key.fingerprint)
    }

    /// Emit the configuration document unless a valid one for the current
    /// key is already present.
    fn step_emit_config(
        &self,
        facts: &EnvironmentFacts,
        setup_timestamp: &str,
        warnings: &mut Vec<String>,
    ) -> Result<(), SetupError> {
        let public = keys::load_public_key(&self.layout.public_key_file())?;
        let key = crate::types::OwnerKey {
            algorithm: "ed25519",
            public_bytes: public,
            fingerprint: keys::fingerprint(&public),
            created_at: setup_timestamp.to_string(),
        };

        let reusable = config::load(&self.config_path)
            .map(|doc| doc.owner_key.public_key == BASE64.encode(public))
            .unwrap_or(false);
        if !reusable {
            let doc = config::build_document(
                &self.layout,
                &self.config_path,
                &key,
                facts,
                setup_timestamp,
            );
            if let Some(parent) = self.config_path.parent() {
                fsutil::ensure_dir(parent, 0o755)?;
            }
            config::emit(&doc, &self.config_path)?;
        }

        if self.options.install_service {
            match service::install(&self.layout, facts.os_family)? {
                Ok(path) => info!(path = %path.display(), "service definition installed"),
                Err(warning) => warnings.push(warning),
            }
        }
        Ok(())
    }

    // ─── shared verification ─────────────────────────────────────

    /// Issues preventing the install from being considered healthy. Empty
    /// for a complete install.
    fn verify_artifacts(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for name in self.layout.missing_directories() {
            issues.push(format!("directory missing: {}", name));
        }

        let private = self.layout.private_key_file();
        let public = self.layout.public_key_file();
        match (
            keys::parse_private_key(&private),
            keys::load_public_key(&public),
        ) {
            (Ok(signing), Ok(stored)) => {
                if signing.verifying_key().to_bytes() != stored {
                    issues.push("owner key halves do not match".to_string());
                }
            }
            (Err(err), _) => issues.push(format!("private key: {}", err)),
            (_, Err(err)) => issues.push(format!("public key: {}", err)),
        }

        match config::load(&self.config_path) {
            Ok(doc) => {
                for path in config::referenced_paths(&doc) {
                    if !path.exists() {
                        issues.push(format!("config references missing path: {}", path.display()));
                    }
                }
                if let Ok(stored) = keys::load_public_key(&public) {
                    if doc.owner_key.public_key != BASE64.encode(stored) {
                        issues.push("config public_key does not match key file".to_string());
                    }
                }
            }
            Err(err) => issues.push(format!("config: {}", err)),
        }

        issues
    }

    /// Fingerprint of the on-disk public key, if readable.
    fn current_fingerprint(&self) -> Option<String> {
        keys::load_public_key(&self.layout.public_key_file())
            .ok()
            .map(|public| keys::fingerprint(&public))
    }
}

/// The structured form of a blocking validation failure, for operations that
/// must surface it as a hard error rather than a verdict.
fn blocking_error(facts: &EnvironmentFacts) -> Option<SetupError> {
    if facts.available_disk_bytes < MIN_DISK_BYTES {
        return Some(SetupError::InsufficientDisk {
            available: facts.available_disk_bytes,
            required: MIN_DISK_BYTES,
        });
    }
    if facts.home_directory.as_os_str().is_empty() || !facts.home_writable {
        return Some(SetupError::NoWritableHome {
            path: facts.home_directory.clone(),
        });
    }
    None
}
