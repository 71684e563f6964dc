//! Syntropy Setup - Type Definitions
//!
//! Shared types for the setup pipeline: probe facts, validation verdicts,
//! run state, and the configuration document schema.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─── Platform Facts ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Darwin,
    Other,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Windows => "windows",
            OsFamily::Darwin => "darwin",
            OsFamily::Other => "other",
        }
    }

    /// Families the grid agent is packaged for.
    pub fn is_supported(&self) -> bool {
        !matches!(self, OsFamily::Other)
    }
}

/// Immutable snapshot of the host, produced once per run by the platform
/// probe and never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFacts {
    pub os_family: OsFamily,
    pub os_version: String,
    pub kernel: String,
    pub architecture: String,
    pub home_directory: PathBuf,
    pub home_writable: bool,
    pub has_admin: bool,
    pub available_disk_bytes: u64,
    pub total_memory_bytes: u64,
    pub cpu_count: usize,
    pub has_network: bool,
    pub missing_tools: Vec<String>,
}

// ─── Validation ──────────────────────────────────────────────────

/// Verdict derived from `EnvironmentFacts` against the fixed policy minima.
/// Errors block the run unless forced; warnings never block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub can_proceed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ─── Owner Key ───────────────────────────────────────────────────

/// The public half of the install's Ed25519 identity. Private bytes are
/// scoped to the provisioning step and never carried in this struct.
#[derive(Clone, Debug)]
pub struct OwnerKey {
    pub algorithm: &'static str,
    pub public_bytes: [u8; 32],
    pub fingerprint: String,
    pub created_at: String,
}

// ─── Setup Options ───────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct SetupOptions {
    /// Override an existing install (backs up config and keys first).
    pub force: bool,
    /// Request OS service registration where the platform supports it.
    pub install_service: bool,
    /// Probe and validate only; mutate nothing.
    pub validate_only: bool,
    pub config_path_override: Option<PathBuf>,
    pub home_dir_override: Option<PathBuf>,
    pub verbose: bool,
    pub quiet: bool,
}

// ─── Run State ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    Validate,
    Provision,
    Keygen,
    EmitConfig,
    PersistState,
}

impl SetupStep {
    /// Pipeline order. The engine walks this slice strictly sequentially.
    pub const ALL: [SetupStep; 5] = [
        SetupStep::Validate,
        SetupStep::Provision,
        SetupStep::Keygen,
        SetupStep::EmitConfig,
        SetupStep::PersistState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStep::Validate => "validate",
            SetupStep::Provision => "provision",
            SetupStep::Keygen => "keygen",
            SetupStep::EmitConfig => "emit_config",
            SetupStep::PersistState => "persist_state",
        }
    }
}

impl std::fmt::Display for SetupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted run state under `<root>/state/state.json`.
///
/// Unknown keys survive a load/save cycle via the flattened `extra` map so
/// newer writers can add fields without older binaries dropping them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<SetupStep>,
    pub completed_steps: Vec<SetupStep>,
    pub start_time: String,
    pub last_updated: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub config_path: PathBuf,
    pub keys_path: PathBuf,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ─── Configuration Document ──────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logical name → default file path map carried inside the config document.
/// Field order is the emitted key order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultPaths {
    pub config: PathBuf,
    pub owner_key: PathBuf,
    pub state: PathBuf,
    pub log: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagerSection {
    pub home_dir: PathBuf,
    pub log_level: LogLevel,
    pub api_endpoint: String,
    pub directories: crate::layout::Layout,
    pub default_paths: DefaultPaths,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerKeySection {
    #[serde(rename = "type")]
    pub key_type: String,
    pub path: PathBuf,
    /// Base64 of the raw public key bytes; equals the trimmed content of the
    /// `.pub` file.
    pub public_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentSection {
    pub os: String,
    pub architecture: String,
    pub home_dir: PathBuf,
    pub setup_timestamp: String,
}

/// The canonical serialized artifact written to `<config>/manager.yaml`.
///
/// Top-level shape: `owner_key` sits beside `manager`, not under it. Loaders
/// reject documents missing any of the three sections rather than guessing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationDocument {
    pub manager: ManagerSection,
    pub owner_key: OwnerKeySection,
    pub environment: EnvironmentSection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_step_serializes_snake_case() {
        let json = serde_json::to_string(&SetupStep::EmitConfig).unwrap();
        assert_eq!(json, "\"emit_config\"");
        let json = serde_json::to_string(&SetupStep::PersistState).unwrap();
        assert_eq!(json, "\"persist_state\"");
    }

    #[test]
    fn test_step_order_is_pipeline_order() {
        let names: Vec<&str> = SetupStep::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            ["validate", "provision", "keygen", "emit_config", "persist_state"]
        );
    }

    #[test]
    fn test_os_family_strings() {
        assert_eq!(OsFamily::Linux.as_str(), "linux");
        assert!(OsFamily::Darwin.is_supported());
        assert!(!OsFamily::Other.is_supported());
    }

    #[test]
    fn test_log_level_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
    }
}
