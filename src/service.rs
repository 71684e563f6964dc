//! Service Registration
//!
//! Renders an OS service definition for the grid agent when requested via
//! `--install-service`. Only the unit file is produced; activation is left
//! to the user or a later tool. Platforms without a renderer surface
//! `not_implemented/install_service` as a warning, never an error.

use std::path::PathBuf;

use tracing::info;

use crate::error::SetupError;
use crate::fsutil;
use crate::layout::Layout;
use crate::types::OsFamily;

pub const SERVICE_UNIT_FILENAME: &str = "syntropy-agent.service";

/// Render the systemd user unit for this install.
fn render_systemd_unit(layout: &Layout) -> String {
    format!(
        "[Unit]\n\
         Description=Syntropy grid agent\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={bin}/syntropy-agent --config {config}\n\
         Restart=on-failure\n\
         RestartSec=10\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        bin = layout.bin.display(),
        config = layout.config_file().display(),
    )
}

/// Write the service definition into `<root>/services` where the platform
/// supports one. Returns the written path, or the warning to surface.
pub fn install(layout: &Layout, family: OsFamily) -> Result<Result<PathBuf, String>, SetupError> {
    match family {
        OsFamily::Linux => {
            let path = layout.services.join(SERVICE_UNIT_FILENAME);
            fsutil::write_atomic(&path, render_systemd_unit(layout).as_bytes(), 0o644)?;
            info!(path = %path.display(), "rendered service unit");
            Ok(Ok(path))
        }
        _ => {
            let warning = format!(
                "not_implemented/install_service: service registration is not available on {}",
                family.as_str()
            );
            Ok(Err(warning))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_linux_unit_is_written() {
        let home = tempfile::tempdir().unwrap();
        let layout = Layout::resolve(home.path(), None);
        layout.provision().unwrap();

        let result = install(&layout, OsFamily::Linux).unwrap();
        let path = result.unwrap();
        assert!(path.starts_with(&layout.services));

        let unit = std::fs::read_to_string(&path).unwrap();
        assert!(unit.starts_with("[Unit]"));
        assert!(unit.contains("ExecStart="));
        assert!(unit.contains(layout.bin.to_str().unwrap()));
    }

    #[test]
    fn test_other_platforms_warn() {
        let layout = Layout::resolve(Path::new("/home/x"), None);
        let result = install(&layout, OsFamily::Darwin).unwrap();
        let warning = result.unwrap_err();
        assert!(warning.starts_with("not_implemented/install_service"));
    }
}
