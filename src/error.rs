//! Error Taxonomy
//!
//! Structured errors with stable codes. Every component returns these;
//! the engine wraps them with the failing step name and persists them into
//! the run state before surfacing. Nothing is retried internally.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::SetupStep;

#[derive(Debug, Error)]
pub enum SetupError {
    // validation/*
    #[error("insufficient disk space: {available} bytes available, {required} required")]
    InsufficientDisk { available: u64, required: u64 },

    #[error("home directory {path} is missing or not writable")]
    NoWritableHome { path: PathBuf },

    #[error("unsupported operating system family: {family}")]
    UnsupportedOsFamily { family: String },

    // filesystem/*
    #[error("failed to create directory {path}")]
    MkdirFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path {path} exists but is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to write {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("failed to rename {from} to {to}")]
    AtomicRenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // crypto/*
    #[error("system entropy source unavailable: {reason}")]
    EntropyUnavailable { reason: String },

    #[error("failed to generate owner key: {reason}")]
    KeygenFailed { reason: String },

    #[error("owner key material at {path} is corrupt or incomplete: {reason}")]
    CorruptKeyMaterial { path: PathBuf, reason: String },

    // state/*
    #[error("run state at {path} is corrupt: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("another process holds the lock at {path}")]
    LockBusy { path: PathBuf },

    #[error("timed out waiting for the lock at {path}")]
    LockTimeout { path: PathBuf },

    #[error("operation interrupted before the next step")]
    Interrupted,

    // config/*
    #[error("failed to serialize configuration document")]
    SerializeFailed {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    #[error("{capability} is not implemented on this platform")]
    NotImplemented { capability: String },

    /// A pipeline step failed. Carries the step name for run-state recording.
    #[error("step {step} failed: {source}")]
    Step {
        step: SetupStep,
        #[source]
        source: Box<SetupError>,
    },
}

impl SetupError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::InsufficientDisk { .. } => "validation/insufficient_disk",
            SetupError::NoWritableHome { .. } => "validation/no_writable_home",
            SetupError::UnsupportedOsFamily { .. } => "validation/unsupported_os_family",
            SetupError::MkdirFailed { .. } | SetupError::NotADirectory { .. } => {
                "filesystem/mkdir_failed"
            }
            SetupError::WriteFailed { .. } => "filesystem/write_failed",
            SetupError::PermissionDenied { .. } => "filesystem/permission_denied",
            SetupError::AtomicRenameFailed { .. } => "filesystem/atomic_rename_failed",
            SetupError::RemoveFailed { .. } => "filesystem/remove_failed",
            SetupError::EntropyUnavailable { .. } => "crypto/entropy_unavailable",
            SetupError::KeygenFailed { .. } => "crypto/keygen_failed",
            SetupError::CorruptKeyMaterial { .. } => "crypto/corrupt_key_material",
            SetupError::StateCorrupt { .. } => "state/state_corrupt",
            SetupError::LockBusy { .. } => "state/lock_busy",
            SetupError::LockTimeout { .. } => "state/lock_timeout",
            SetupError::Interrupted => "state/interrupted",
            SetupError::SerializeFailed { .. } => "config/serialize_failed",
            SetupError::ParseFailed { .. } => "config/parse_failed",
            SetupError::NotImplemented { .. } => "not_implemented",
            SetupError::Step { source, .. } => source.code(),
        }
    }

    /// The only non-fatal category: a second concurrent invocation should
    /// exit with the busy code rather than report a failure.
    pub fn is_busy(&self) -> bool {
        match self {
            SetupError::LockBusy { .. } => true,
            SetupError::Step { source, .. } => source.is_busy(),
            _ => false,
        }
    }

    /// Wrap this error with the step it occurred in.
    pub fn in_step(self, step: SetupStep) -> SetupError {
        SetupError::Step {
            step,
            source: Box::new(self),
        }
    }
}

/// Map an io error at `path` to the matching filesystem error kind.
pub fn write_error(path: &std::path::Path, source: io::Error) -> SetupError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        SetupError::PermissionDenied {
            path: path.to_path_buf(),
        }
    } else {
        SetupError::WriteFailed {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = SetupError::InsufficientDisk {
            available: 1,
            required: 2,
        };
        assert_eq!(err.code(), "validation/insufficient_disk");

        let err = SetupError::LockBusy {
            path: PathBuf::from("/tmp/.lock"),
        };
        assert_eq!(err.code(), "state/lock_busy");
        assert!(err.is_busy());
    }

    #[test]
    fn test_step_wrapper_preserves_code_and_busy() {
        let err = SetupError::LockBusy {
            path: PathBuf::from("/tmp/.lock"),
        }
        .in_step(SetupStep::Provision);
        assert_eq!(err.code(), "state/lock_busy");
        assert!(err.is_busy());
        assert!(err.to_string().contains("provision"));
    }

    #[test]
    fn test_permission_denied_classification() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let err = write_error(std::path::Path::new("/etc/x"), denied);
        assert_eq!(err.code(), "filesystem/permission_denied");

        let other = io::Error::from(io::ErrorKind::NotFound);
        let err = write_error(std::path::Path::new("/etc/x"), other);
        assert_eq!(err.code(), "filesystem/write_failed");
    }
}
