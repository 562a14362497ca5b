#![allow(clippy::module_name_repetitions)]
//! Host platform detection.
//!
//! Pure and side-effect-free beyond reading a handful of `/proc` and `/sys`
//! files plus `uname`. Results are memoized behind a single [`PlatformProbe`]
//! constructed once per invocation rather than cached in process-wide
//! globals, so call sites thread an explicit value instead of reaching for
//! ambient state.

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Linux,
    MacOs,
    Wsl2,
    Wsl1,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Linux => "linux",
            PlatformKind::MacOs => "macos",
            PlatformKind::Wsl2 => "wsl2",
            PlatformKind::Wsl1 => "wsl1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeccompMode {
    Disabled,
    Strict,
    Filter,
    Unknown,
}

impl SeccompMode {
    fn from_value(v: &str) -> Self {
        match v.trim() {
            "0" => SeccompMode::Disabled,
            "1" => SeccompMode::Strict,
            "2" => SeccompMode::Filter,
            _ => SeccompMode::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlatformProbe {
    pub kind: PlatformKind,
    pub arch: String,
    pub pid1_seccomp: SeccompMode,
    pub desktop_variant: Option<String>,
}

impl PlatformProbe {
    /// Run all host-side detections once.
    pub fn detect() -> Self {
        Self::detect_with_proc_root(Path::new("/proc"))
    }

    /// Testable entry point: all `/proc` reads are rooted under `proc_root` instead
    /// of the real `/proc`, so unit tests can fabricate a fake kernel signature.
    pub fn detect_with_proc_root(proc_root: &Path) -> Self {
        let kind = detect_kind(proc_root);
        let arch = normalize_arch(std::env::consts::ARCH);
        let pid1_seccomp = read_seccomp_mode(&proc_root.join("1").join("status"));
        let desktop_variant = detect_desktop_variant();
        PlatformProbe {
            kind,
            arch,
            pid1_seccomp,
            desktop_variant,
        }
    }
}

fn detect_kind(proc_root: &Path) -> PlatformKind {
    if cfg!(target_os = "macos") {
        return PlatformKind::MacOs;
    }
    let version = fs::read_to_string(proc_root.join("version")).unwrap_or_default();
    let version_lower = version.to_ascii_lowercase();
    if version_lower.contains("microsoft-standard") || version_lower.contains("wsl2") {
        PlatformKind::Wsl2
    } else if version_lower.contains("microsoft") {
        PlatformKind::Wsl1
    } else {
        PlatformKind::Linux
    }
}

fn normalize_arch(raw: &str) -> String {
    match raw {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

fn read_seccomp_mode(status_path: &Path) -> SeccompMode {
    let Ok(contents) = fs::read_to_string(status_path) else {
        return SeccompMode::Unknown;
    };
    for line in contents.lines() {
        if let Some(v) = line.strip_prefix("Seccomp:") {
            return SeccompMode::from_value(v);
        }
    }
    SeccompMode::Unknown
}

/// Best-effort Docker Desktop detection: presence of the desktop app's settings
/// file. Not authoritative; Doctor cross-checks via `docker info`.
fn detect_desktop_variant() -> Option<String> {
    let home = home::home_dir()?;
    let candidates = [
        home.join("Library/Group Containers/group.com.docker/settings.json"),
        home.join(".docker/desktop/settings-store.json"),
    ];
    for c in candidates {
        if c.exists() {
            return Some("Docker Desktop".to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn fake_proc(version: &str, seccomp: &str) -> tempfile::TempDir {
        let td = tempdir().unwrap();
        fs::write(td.path().join("version"), version).unwrap();
        fs::create_dir_all(td.path().join("1")).unwrap();
        fs::write(
            td.path().join("1").join("status"),
            format!("Name:\tsystemd\nSeccomp:\t{seccomp}\n"),
        )
        .unwrap();
        td
    }

    #[test]
    fn detects_wsl2_from_kernel_tag() {
        let td = fake_proc("Linux version 5.15.90.1-microsoft-standard-WSL2", "0");
        let probe = PlatformProbe::detect_with_proc_root(td.path());
        assert_eq!(probe.kind, PlatformKind::Wsl2);
    }

    #[test]
    fn detects_wsl1_distinct_from_wsl2() {
        let td = fake_proc("Linux version 4.4.0-19041-Microsoft", "0");
        let probe = PlatformProbe::detect_with_proc_root(td.path());
        assert_eq!(probe.kind, PlatformKind::Wsl1);
    }

    #[test]
    fn reports_seccomp_filter_mode() {
        let td = fake_proc("Linux version 5.15.90.1-microsoft-standard-WSL2", "2");
        let probe = PlatformProbe::detect_with_proc_root(td.path());
        assert_eq!(probe.pid1_seccomp, SeccompMode::Filter);
    }

    #[test]
    fn falls_back_to_native_linux() {
        let td = fake_proc("Linux version 6.5.0-generic", "0");
        let probe = PlatformProbe::detect_with_proc_root(td.path());
        assert_eq!(probe.kind, PlatformKind::Linux);
    }
}
