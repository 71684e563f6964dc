//! Configuration Emitter
//!
//! Builds the resolved configuration document and writes it atomically to
//! `<config>/manager.yaml`. Emission is deterministic: struct field order is
//! the key order, UTF-8, LF line endings, no trailing whitespace, so
//! re-emitting unchanged inputs is byte-for-byte identical.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::error::SetupError;
use crate::fsutil;
use crate::layout::Layout;
use crate::types::{
    ConfigurationDocument, DefaultPaths, EnvironmentFacts, EnvironmentSection, LogLevel,
    ManagerSection, OwnerKey, OwnerKeySection,
};

/// Default grid API endpoint baked into fresh configs.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.syntropy.network";

/// Assemble the document from the resolved layout, the owner key, and the
/// probe facts. `setup_timestamp` is stamped by the engine so repeated calls
/// within one run agree.
pub fn build_document(
    layout: &Layout,
    config_path: &Path,
    key: &OwnerKey,
    facts: &EnvironmentFacts,
    setup_timestamp: &str,
) -> ConfigurationDocument {
    ConfigurationDocument {
        manager: ManagerSection {
            home_dir: facts.home_directory.clone(),
            log_level: LogLevel::Info,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            directories: layout.clone(),
            default_paths: DefaultPaths {
                config: config_path.to_path_buf(),
                owner_key: layout.private_key_file(),
                state: layout.state_file(),
                log: layout.log_file(),
            },
        },
        owner_key: OwnerKeySection {
            key_type: key.algorithm.to_string(),
            path: layout.private_key_file(),
            public_key: BASE64.encode(key.public_bytes),
        },
        environment: EnvironmentSection {
            os: facts.os_family.as_str().to_string(),
            architecture: facts.architecture.clone(),
            home_dir: facts.home_directory.clone(),
            setup_timestamp: setup_timestamp.to_string(),
        },
    }
}

/// Serialize and write the document atomically.
pub fn emit(doc: &ConfigurationDocument, path: &Path) -> Result<(), SetupError> {
    let yaml =
        serde_yaml::to_string(doc).map_err(|source| SetupError::SerializeFailed { source })?;
    fsutil::write_atomic(path, yaml.as_bytes(), 0o644)?;
    debug!(path = %path.display(), "wrote configuration document");
    Ok(())
}

/// Load and parse a previously emitted document. Documents missing any of
/// the three top-level sections are rejected, not guessed at.
pub fn load(path: &Path) -> Result<ConfigurationDocument, SetupError> {
    let contents = fs::read_to_string(path).map_err(|e| SetupError::ParseFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&contents).map_err(|e| SetupError::ParseFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Every path the document references. A successful setup guarantees all of
/// them exist on disk.
pub fn referenced_paths(doc: &ConfigurationDocument) -> Vec<PathBuf> {
    let dirs = &doc.manager.directories;
    let mut paths: Vec<PathBuf> = dirs.directories().iter().map(|(_, p)| p.to_path_buf()).collect();
    paths.push(doc.manager.home_dir.clone());
    paths.push(doc.manager.default_paths.config.clone());
    paths.push(doc.manager.default_paths.owner_key.clone());
    paths.push(doc.manager.default_paths.state.clone());
    paths.push(doc.manager.default_paths.log.clone());
    paths.push(doc.owner_key.path.clone());
    paths
}
