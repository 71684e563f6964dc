//! Linux Probe
//!
//! Reads `/etc/os-release` for the distribution string and `uname` for the
//! kernel release.

use std::fs;

use async_trait::async_trait;

use crate::error::SetupError;
use crate::types::OsFamily;

use super::{command_line, OsReport, PlatformProbe};

pub struct LinuxProbe;

/// Extract `PRETTY_NAME` from os-release contents.
fn pretty_name(contents: &str) -> Option<String> {
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

#[async_trait]
impl PlatformProbe for LinuxProbe {
    fn detect_os(&self) -> Result<OsReport, SetupError> {
        let version = fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|contents| pretty_name(&contents))
            .unwrap_or_else(|| "Linux".to_string());

        let kernel = command_line("uname", &["-r"]).unwrap_or_default();

        Ok(OsReport {
            family: OsFamily::Linux,
            version,
            kernel,
            architecture: std::env::consts::ARCH.to_string(),
            warnings: Vec::new(),
        })
    }

    fn check_admin(&self) -> bool {
        #[cfg(unix)]
        {
            super::posix_has_admin()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["sh", "uname", "tar", "curl"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_name_parsing() {
        let contents = "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 24.04 LTS\"\nID=ubuntu\n";
        assert_eq!(pretty_name(contents).unwrap(), "Ubuntu 24.04 LTS");
        assert!(pretty_name("NAME=x\n").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detect_os_reports_linux() {
        let report = LinuxProbe.detect_os().unwrap();
        assert_eq!(report.family, OsFamily::Linux);
        assert!(!report.version.is_empty());
    }
}
