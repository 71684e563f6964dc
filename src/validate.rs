//! Environment Validator
//!
//! Pure function from probe facts to a verdict against the fixed policy
//! minima. Errors block setup unless the run is forced; warnings are
//! surfaced but never block.

use crate::types::{EnvironmentFacts, ValidationVerdict};

/// Minimum free disk on the volume holding the install root.
pub const MIN_DISK_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB

pub fn validate(facts: &EnvironmentFacts) -> ValidationVerdict {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if facts.available_disk_bytes < MIN_DISK_BYTES {
        errors.push(format!(
            "insufficient_disk: {} bytes available, {} required",
            facts.available_disk_bytes, MIN_DISK_BYTES
        ));
    }

    if facts.home_directory.as_os_str().is_empty() || !facts.home_writable {
        errors.push(format!(
            "no_writable_home: {} is missing or not writable",
            facts.home_directory.display()
        ));
    }

    if !facts.os_family.is_supported() {
        warnings.push(format!(
            "unsupported_os_family: {} ({})",
            facts.os_family.as_str(),
            facts.os_version
        ));
    }

    if !facts.has_admin {
        warnings.push(
            "no_admin_rights: running without elevated privileges; service install may be limited"
                .to_string(),
        );
    }

    if !facts.has_network {
        warnings.push("no_network: grid endpoint unreachable during setup".to_string());
    }

    if !facts.missing_tools.is_empty() {
        warnings.push(format!(
            "missing_tools: {}",
            facts.missing_tools.join(", ")
        ));
    }

    ValidationVerdict {
        can_proceed: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OsFamily;
    use std::path::PathBuf;

    fn healthy_facts() -> EnvironmentFacts {
        EnvironmentFacts {
            os_family: OsFamily::Linux,
            os_version: "Ubuntu 24.04".to_string(),
            kernel: "6.8.0".to_string(),
            architecture: "x86_64".to_string(),
            home_directory: PathBuf::from("/home/alice"),
            home_writable: true,
            has_admin: true,
            available_disk_bytes: 100 * 1024 * 1024 * 1024,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            cpu_count: 8,
            has_network: true,
            missing_tools: Vec::new(),
        }
    }

    #[test]
    fn test_healthy_environment_proceeds_clean() {
        let verdict = validate(&healthy_facts());
        assert!(verdict.can_proceed);
        assert!(verdict.errors.is_empty());
        assert!(verdict.warnings.is_empty());
    }

    #[test]
    fn test_low_disk_blocks() {
        let mut facts = healthy_facts();
        facts.available_disk_bytes = MIN_DISK_BYTES / 2;
        let verdict = validate(&facts);
        assert!(!verdict.can_proceed);
        assert!(verdict.errors[0].starts_with("insufficient_disk"));
    }

    #[test]
    fn test_exactly_one_gib_passes() {
        let mut facts = healthy_facts();
        facts.available_disk_bytes = MIN_DISK_BYTES;
        assert!(validate(&facts).can_proceed);
    }

    #[test]
    fn test_unwritable_home_blocks() {
        let mut facts = healthy_facts();
        facts.home_writable = false;
        let verdict = validate(&facts);
        assert!(!verdict.can_proceed);
        assert!(verdict.errors[0].starts_with("no_writable_home"));
    }

    #[test]
    fn test_unknown_os_warns_but_proceeds() {
        let mut facts = healthy_facts();
        facts.os_family = OsFamily::Other;
        let verdict = validate(&facts);
        assert!(verdict.can_proceed);
        assert!(verdict
            .warnings
            .iter()
            .any(|w| w.starts_with("unsupported_os_family")));
    }

    #[test]
    fn test_missing_admin_and_network_only_warn() {
        let mut facts = healthy_facts();
        facts.has_admin = false;
        facts.has_network = false;
        let verdict = validate(&facts);
        assert!(verdict.can_proceed);
        assert!(verdict.warnings.iter().any(|w| w.starts_with("no_admin_rights")));
        assert!(verdict.warnings.iter().any(|w| w.starts_with("no_network")));
    }

    #[test]
    fn test_missing_tools_listed_in_warning() {
        let mut facts = healthy_facts();
        facts.missing_tools = vec!["tar".to_string(), "curl".to_string()];
        let verdict = validate(&facts);
        assert!(verdict.can_proceed);
        assert!(verdict
            .warnings
            .iter()
            .any(|w| w.contains("tar") && w.contains("curl")));
    }

    #[test]
    fn test_errors_are_ordered_disk_first() {
        let mut facts = healthy_facts();
        facts.available_disk_bytes = 0;
        facts.home_writable = false;
        let verdict = validate(&facts);
        assert!(verdict.errors[0].starts_with("insufficient_disk"));
        assert!(verdict.errors[1].starts_with("no_writable_home"));
    }
}
