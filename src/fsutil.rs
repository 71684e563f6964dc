//! Filesystem Helpers
//!
//! Atomic writes (temp file + rename on the same filesystem), idempotent
//! directory creation, and permission handling shared by every component
//! that touches disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{write_error, SetupError};

/// Ensure a directory exists with the given POSIX mode.
///
/// Idempotent: an existing directory is accepted as-is. An existing
/// non-directory node at the path is a fatal error.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<(), SetupError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(SetupError::NotADirectory {
                path: path.to_path_buf(),
            })
        }
        Err(_) => {}
    }

    fs::create_dir_all(path).map_err(|source| SetupError::MkdirFailed {
        path: path.to_path_buf(),
        source,
    })?;
    set_mode(path, mode)?;
    Ok(())
}

/// Write `bytes` to `path` atomically: a temp file in the same directory is
/// written, given its final mode, then renamed over the destination. A reader
/// sees either the old or the new content, never a torn file.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<(), SetupError> {
    let tmp = tmp_path(path);

    let result = (|| -> Result<(), SetupError> {
        let mut file = create_with_mode(&tmp, mode).map_err(|e| write_error(&tmp, e))?;
        file.write_all(bytes).map_err(|e| write_error(&tmp, e))?;
        file.sync_all().map_err(|e| write_error(&tmp, e))?;
        drop(file);
        set_mode(&tmp, mode)?;
        fs::rename(&tmp, path).map_err(|source| SetupError::AtomicRenameFailed {
            from: tmp.clone(),
            to: path.to_path_buf(),
            source,
        })
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Create the temp file carrying the destination's mode from the start, so
/// secret content is never readable by other users even mid-write. The
/// `set_mode` call afterwards still normalises bits the umask may have
/// cleared.
fn create_with_mode(path: &Path, mode: u32) -> std::io::Result<fs::File> {
    // A stale temp from a crashed run with the same pid would block
    // create_new.
    let _ = fs::remove_file(path);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Temp sibling for an atomic write. Same directory, so the final rename
/// never crosses a filesystem boundary.
fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

/// Set POSIX permissions. A no-op on non-unix hosts, where the parent
/// directory's ACL is inherited instead.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<(), SetupError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| write_error(path, e))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<(), SetupError> {
    Ok(())
}

/// Check whether the current user can write into `path` without mutating it.
#[cfg(unix)]
pub fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: cpath is a valid NUL-terminated string for the duration of
    // the call.
    unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
pub fn is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

/// Rename `path` to `path.bak.<timestamp>` if it exists. Returns the backup
/// path when a rename happened.
pub fn backup_rename(path: &Path, timestamp: &str) -> Result<Option<PathBuf>, SetupError> {
    if !path.exists() {
        return Ok(None);
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let backup = path.with_file_name(format!("{}.bak.{}", name, timestamp));
    fs::rename(path, &backup).map_err(|source| SetupError::AtomicRenameFailed {
        from: path.to_path_buf(),
        to: backup.clone(),
        source,
    })?;
    Ok(Some(backup))
}

/// Compact UTC timestamp used for backup suffixes.
pub fn backup_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_file_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"hello\n", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello\n");

        // No temp litter left behind.
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"one", 0o644).unwrap();
        write_atomic(&path, b"two", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        write_atomic(&path, b"s", 0o600).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_tmp_file_is_never_wider_than_final_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tmp = tmp_path(&dir.path().join("owner.key"));

        // The temp file must carry the restrictive mode from creation, not
        // only after the content has been written.
        let _file = create_with_mode(&tmp, 0o600).unwrap();
        let mode = fs::metadata(&tmp).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "group/other bits set on temp: {:o}", mode);
    }

    #[test]
    fn test_write_atomic_replaces_stale_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(tmp_path(&path), b"stale").unwrap();
        write_atomic(&path, b"fresh", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fresh");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b");
        ensure_dir(&path, 0o755).unwrap();
        ensure_dir(&path, 0o755).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn test_ensure_dir_rejects_file_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node");
        fs::write(&path, b"x").unwrap();
        let err = ensure_dir(&path, 0o755).unwrap_err();
        assert_eq!(err.code(), "filesystem/mkdir_failed");
    }

    #[test]
    fn test_backup_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("owner.key");
        fs::write(&path, b"k").unwrap();

        let backup = backup_rename(&path, "20260825120000").unwrap().unwrap();
        assert!(!path.exists());
        assert!(backup.ends_with("owner.key.bak.20260825120000"));
        assert_eq!(fs::read(&backup).unwrap(), b"k");

        // Missing source is a no-op.
        assert!(backup_rename(&path, "x").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable(dir.path()));
        assert!(!is_writable(Path::new("/nonexistent-syntropy-test")));
    }
}
