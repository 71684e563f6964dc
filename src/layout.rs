//! Install Layout
//!
//! The on-disk directory tree for a Syntropy agent install. Every path is a
//! descendant of `root`, which lives directly under the user's home unless
//! overridden.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::fsutil;

/// Directory name under the user's home for all install data.
#[cfg(windows)]
pub const ROOT_DIR_NAME: &str = "Syntropy";
#[cfg(not(windows))]
pub const ROOT_DIR_NAME: &str = ".syntropy";

pub const CONFIG_FILENAME: &str = "manager.yaml";
pub const STATE_FILENAME: &str = "state.json";
pub const LOCK_FILENAME: &str = ".lock";
pub const KEY_FILENAME: &str = "owner.key";
pub const PUB_KEY_FILENAME: &str = "owner.key.pub";
pub const LOG_FILENAME: &str = "agent.log";

/// Logical name → absolute path mapping for the install tree.
/// Field order is the key order emitted into the configuration document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub config: PathBuf,
    pub keys: PathBuf,
    pub state: PathBuf,
    pub logs: PathBuf,
    pub data: PathBuf,
    pub bin: PathBuf,
    pub services: PathBuf,
    pub backups: PathBuf,
}

impl Layout {
    /// Resolve the layout for a home directory, honoring a root override.
    pub fn resolve(home: &Path, root_override: Option<&Path>) -> Layout {
        let root = match root_override {
            Some(p) => p.to_path_buf(),
            None => home.join(ROOT_DIR_NAME),
        };
        Layout {
            config: root.join("config"),
            keys: root.join("keys"),
            state: root.join("state"),
            logs: root.join("logs"),
            data: root.join("data"),
            bin: root.join("bin"),
            services: root.join("services"),
            backups: root.join("backups"),
            root,
        }
    }

    /// All logical directories in creation order, root first.
    pub fn directories(&self) -> [(&'static str, &Path); 9] {
        [
            ("root", &self.root),
            ("config", &self.config),
            ("keys", &self.keys),
            ("state", &self.state),
            ("logs", &self.logs),
            ("data", &self.data),
            ("bin", &self.bin),
            ("services", &self.services),
            ("backups", &self.backups),
        ]
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILENAME)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state.join(STATE_FILENAME)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state.join(LOCK_FILENAME)
    }

    pub fn private_key_file(&self) -> PathBuf {
        self.keys.join(KEY_FILENAME)
    }

    pub fn public_key_file(&self) -> PathBuf {
        self.keys.join(PUB_KEY_FILENAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs.join(LOG_FILENAME)
    }

    /// Create every logical directory with mode 0755 (or the platform
    /// equivalent). Idempotent; a non-directory node at any path is fatal.
    pub fn provision(&self) -> Result<(), SetupError> {
        for (_, dir) in self.directories() {
            fsutil::ensure_dir(dir, 0o755)?;
        }
        Ok(())
    }

    /// Logical directories whose on-disk node is currently missing or not a
    /// directory. Empty for a healthy install.
    pub fn missing_directories(&self) -> Vec<&'static str> {
        self.directories()
            .into_iter()
            .filter(|(_, dir)| !dir.is_dir())
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under_home() {
        let layout = Layout::resolve(Path::new("/home/alice"), None);
        assert_eq!(layout.root, Path::new("/home/alice").join(ROOT_DIR_NAME));
        assert_eq!(layout.keys, layout.root.join("keys"));
        assert_eq!(layout.config_file(), layout.root.join("config/manager.yaml"));
    }

    #[test]
    fn test_every_directory_is_under_root() {
        let layout = Layout::resolve(Path::new("/home/alice"), None);
        for (name, dir) in layout.directories() {
            assert!(
                dir.starts_with(&layout.root),
                "{} escapes the install root",
                name
            );
        }
    }

    #[test]
    fn test_root_override() {
        let layout = Layout::resolve(Path::new("/home/alice"), Some(Path::new("/srv/agent")));
        assert_eq!(layout.root, Path::new("/srv/agent"));
        assert_eq!(layout.state_file(), Path::new("/srv/agent/state/state.json"));
    }

    #[test]
    fn test_provision_is_idempotent() {
        let home = tempfile::tempdir().unwrap();
        let layout = Layout::resolve(home.path(), None);
        layout.provision().unwrap();
        layout.provision().unwrap();
        assert!(layout.missing_directories().is_empty());
        for (_, dir) in layout.directories() {
            assert!(dir.is_dir());
        }
    }

    #[test]
    fn test_provision_rejects_file_in_the_way() {
        let home = tempfile::tempdir().unwrap();
        let layout = Layout::resolve(home.path(), None);
        std::fs::create_dir_all(&layout.root).unwrap();
        std::fs::write(&layout.keys, b"not a dir").unwrap();
        let err = layout.provision().unwrap_err();
        assert_eq!(err.code(), "filesystem/mkdir_failed");
    }

    #[test]
    fn test_missing_directories_reports_gaps() {
        let home = tempfile::tempdir().unwrap();
        let layout = Layout::resolve(home.path(), None);
        layout.provision().unwrap();
        std::fs::remove_dir_all(&layout.logs).unwrap();
        assert_eq!(layout.missing_directories(), vec!["logs"]);
    }
}
