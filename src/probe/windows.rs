//! Windows Probe
//!
//! Version via `cmd /C ver`; elevation via a `net session` probe, which
//! succeeds only for an elevated token.

use async_trait::async_trait;

use crate::error::SetupError;
use crate::types::OsFamily;

use super::{command_line, OsReport, PlatformProbe};

pub struct WindowsProbe;

#[async_trait]
impl PlatformProbe for WindowsProbe {
    fn detect_os(&self) -> Result<OsReport, SetupError> {
        let version =
            command_line("cmd", &["/C", "ver"]).unwrap_or_else(|| "Windows".to_string());

        Ok(OsReport {
            family: OsFamily::Windows,
            version,
            kernel: String::new(),
            architecture: std::env::consts::ARCH.to_string(),
            warnings: Vec::new(),
        })
    }

    fn check_admin(&self) -> bool {
        std::process::Command::new("net")
            .arg("session")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["powershell"]
    }
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "windows")]
    #[test]
    fn test_detect_os_reports_windows() {
        use super::*;
        let report = WindowsProbe.detect_os().unwrap();
        assert_eq!(report.family, OsFamily::Windows);
    }
}
