//! Generic Probe
//!
//! Fallback for unrecognised hosts: reasonable defaults with every uncertain
//! field flagged as a warning. Setup can still proceed under these facts;
//! the validator turns the unknown family into a warning, not an error.

use async_trait::async_trait;

use crate::error::SetupError;
use crate::types::OsFamily;

use super::{OsReport, PlatformProbe};

pub struct GenericProbe;

#[async_trait]
impl PlatformProbe for GenericProbe {
    fn detect_os(&self) -> Result<OsReport, SetupError> {
        Ok(OsReport {
            family: OsFamily::Other,
            version: std::env::consts::OS.to_string(),
            kernel: String::new(),
            architecture: std::env::consts::ARCH.to_string(),
            warnings: vec![
                "os_version is best-effort on an unrecognised platform".to_string(),
                "admin detection unavailable on an unrecognised platform".to_string(),
            ],
        })
    }

    fn check_admin(&self) -> bool {
        false
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_probe_flags_uncertainty() {
        let report = GenericProbe.detect_os().unwrap();
        assert_eq!(report.family, OsFamily::Other);
        assert!(!report.warnings.is_empty());
        assert!(GenericProbe.required_tools().is_empty());
    }
}
