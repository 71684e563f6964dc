//! Darwin Probe
//!
//! macOS identification via `sw_vers` and `uname`.

use async_trait::async_trait;

use crate::error::SetupError;
use crate::types::OsFamily;

use super::{command_line, OsReport, PlatformProbe};

pub struct DarwinProbe;

#[async_trait]
impl PlatformProbe for DarwinProbe {
    fn detect_os(&self) -> Result<OsReport, SetupError> {
        let product = command_line("sw_vers", &["-productVersion"])
            .map(|v| format!("macOS {}", v))
            .unwrap_or_else(|| "macOS".to_string());

        let kernel = command_line("uname", &["-r"]).unwrap_or_default();

        Ok(OsReport {
            family: OsFamily::Darwin,
            version: product,
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
    #[cfg(target_os = "macos")]
    #[test]
    fn test_detect_os_reports_darwin() {
        use super::*;
        let report = DarwinProbe.detect_os().unwrap();
        assert_eq!(report.family, OsFamily::Darwin);
        assert!(report.version.starts_with("macOS"));
    }
}
