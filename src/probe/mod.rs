//! Platform Probe
//!
//! Reports host facts behind a small capability interface. A per-OS variant
//! is selected at construction time; the engine only ever sees the trait.
//! Tests substitute a fake variant.

pub mod darwin;
pub mod generic;
pub mod linux;
pub mod windows;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SetupError;
use crate::fsutil;
use crate::types::{EnvironmentFacts, OsFamily};

pub use darwin::DarwinProbe;
pub use generic::GenericProbe;
pub use linux::LinuxProbe;
pub use windows::WindowsProbe;

/// Well-known grid host used for the single reachability check.
pub const NETWORK_PROBE_URL: &str = "https://api.syntropy.network/healthz";

/// Bound on the reachability check. The only network wait in the whole tool.
pub const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// OS identification subset of the facts.
#[derive(Clone, Debug)]
pub struct OsReport {
    pub family: OsFamily,
    pub version: String,
    pub kernel: String,
    pub architecture: String,
    /// Uncertain fields flagged by the variant (GenericProbe mostly).
    pub warnings: Vec<String>,
}

/// Coarse resource snapshot. Never fails on a live system; denial degrades
/// to zero with a recorded warning.
#[derive(Clone, Debug, Default)]
pub struct ResourceReport {
    pub available_disk_bytes: u64,
    pub total_memory_bytes: u64,
    pub cpu_count: usize,
    pub warnings: Vec<String>,
}

/// The capability set every platform variant implements.
#[async_trait]
pub trait PlatformProbe: Send + Sync {
    /// Identify the host. Fails only if the host is unrecognisable;
    /// otherwise fills in best-effort strings.
    fn detect_os(&self) -> Result<OsReport, SetupError>;

    /// Free disk for the volume containing `home` plus a memory/CPU snapshot.
    fn measure_resources(&self, home: &Path) -> ResourceReport {
        measure_with_sysinfo(home)
    }

    /// Whether the current user holds elevated privileges.
    fn check_admin(&self) -> bool;

    /// Single bounded HTTP GET against a well-known host; any 2xx/3xx is
    /// success. Failure yields `false`, never an error.
    async fn check_network(&self) -> bool {
        http_reachable(NETWORK_PROBE_URL).await
    }

    /// Tools the agent expects on this platform.
    fn required_tools(&self) -> &'static [&'static str];

    /// Pure `PATH` lookup; returns the missing subset of `tools`.
    fn find_tools(&self, tools: &[&str]) -> Vec<String> {
        missing_from_path(tools)
    }
}

/// Select the probe variant for the detected OS family.
pub fn for_host() -> Box<dyn PlatformProbe> {
    match env::consts::OS {
        "linux" => Box::new(LinuxProbe),
        "macos" => Box::new(DarwinProbe),
        "windows" => Box::new(WindowsProbe),
        other => {
            warn!(os = other, "unrecognised host OS, using generic probe");
            Box::new(GenericProbe)
        }
    }
}

/// Assemble the immutable facts snapshot from the probe capabilities.
/// Returns probe-level warnings alongside the facts.
pub async fn gather_facts(
    probe: &dyn PlatformProbe,
    home: &Path,
) -> Result<(EnvironmentFacts, Vec<String>), SetupError> {
    let os = probe.detect_os()?;
    let resources = probe.measure_resources(home);
    let has_admin = probe.check_admin();
    let has_network = probe.check_network().await;
    let missing_tools = probe.find_tools(probe.required_tools());
    let home_writable = home.is_dir() && fsutil::is_writable(home);

    let mut warnings = os.warnings;
    warnings.extend(resources.warnings);

    let facts = EnvironmentFacts {
        os_family: os.family,
        os_version: os.version,
        kernel: os.kernel,
        architecture: os.architecture,
        home_directory: home.to_path_buf(),
        home_writable,
        has_admin,
        available_disk_bytes: resources.available_disk_bytes,
        total_memory_bytes: resources.total_memory_bytes,
        cpu_count: resources.cpu_count,
        has_network,
        missing_tools,
    };
    debug!(
        os = facts.os_family.as_str(),
        disk = facts.available_disk_bytes,
        network = facts.has_network,
        "gathered environment facts"
    );
    Ok((facts, warnings))
}

// ─── Shared capability implementations ───────────────────────────

/// Disk and memory via `sysinfo`. Free disk is read from the mounted volume
/// with the longest path prefix of `home`.
pub fn measure_with_sysinfo(home: &Path) -> ResourceReport {
    let mut report = ResourceReport {
        cpu_count: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        ..Default::default()
    };

    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut best_len = 0usize;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if home.starts_with(mount) && mount.as_os_str().len() >= best_len {
            best_len = mount.as_os_str().len();
            report.available_disk_bytes = disk.available_space();
        }
    }
    if report.available_disk_bytes == 0 && best_len == 0 {
        report
            .warnings
            .push("could not determine free disk space for the home volume".to_string());
    }

    let mut system = sysinfo::System::new();
    system.refresh_memory();
    report.total_memory_bytes = system.total_memory();

    report
}

/// Bounded reachability check. Any transport or status failure is `false`.
pub async fn http_reachable(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(NETWORK_PROBE_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status();
            status.is_success() || status.is_redirection()
        }
        Err(err) => {
            debug!(%err, "network probe failed");
            false
        }
    }
}

/// Scan `PATH` for each tool; return the subset that is nowhere on it.
pub fn missing_from_path(tools: &[&str]) -> Vec<String> {
    let path_var = env::var_os("PATH").unwrap_or_default();
    let dirs: Vec<PathBuf> = env::split_paths(&path_var).collect();

    tools
        .iter()
        .filter(|tool| {
            !dirs.iter().any(|dir| {
                let candidate = dir.join(tool);
                if candidate.is_file() {
                    return true;
                }
                if cfg!(windows) {
                    return dir.join(format!("{}.exe", tool)).is_file();
                }
                false
            })
        })
        .map(|t| t.to_string())
        .collect()
}

/// POSIX privilege check: effective UID 0, or a non-interactive sudo probe.
#[cfg(unix)]
pub fn posix_has_admin() -> bool {
    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }
    std::process::Command::new("sudo")
        .args(["-n", "true"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// First line of a command's stdout, best effort.
pub(crate) fn command_line(cmd: &str, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(cmd).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_from_path_finds_common_tool() {
        // `sh` exists on any unix CI host; a nonsense name never does.
        let missing = missing_from_path(&["sh", "definitely-not-a-real-tool-xyz"]);
        #[cfg(unix)]
        assert_eq!(missing, vec!["definitely-not-a-real-tool-xyz"]);
        #[cfg(not(unix))]
        assert!(missing.contains(&"definitely-not-a-real-tool-xyz".to_string()));
    }

    #[test]
    fn test_measure_resources_never_zero_cpu() {
        let report = measure_with_sysinfo(Path::new("/"));
        assert!(report.cpu_count >= 1);
    }

    #[test]
    fn test_for_host_selects_a_variant() {
        // Smoke test: selection never panics and detect_os succeeds on any
        // host this test suite runs on.
        let probe = for_host();
        let report = probe.detect_os().unwrap();
        assert!(!report.architecture.is_empty());
    }
}
