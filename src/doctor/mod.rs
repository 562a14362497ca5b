#![allow(clippy::module_name_repetitions)]
//! `cai doctor`: an ordered, independent check suite over [`PlatformProbe`]
//! and [`RuntimeAdapter`], aggregated into a human report and a stable JSON
//! shape (§4.4, §6).

use serde::Serialize;

use crate::color::{log_error, log_ok, log_warn};
use crate::platform::{PlatformProbe, SeccompMode};
use crate::provisioner::HARDENED_RUNTIME_NAME;
use crate::runtime::{Outcome, RuntimeAdapter, RuntimeEndpoint, SandboxFeatureState};

/// Minimum desktop-variant version required for the sandbox path. Informal
/// dotted-triple compare; anything unparsable is treated as not meeting it.
pub const MIN_DESKTOP_VERSION: &str = "4.30.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl CheckStatus {
    fn worse(self, other: CheckStatus) -> CheckStatus {
        use CheckStatus::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Warn, _) | (_, Warn) => Warn,
            _ => Ok,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DockerDesktopInfo {
    pub version: Option<String>,
    pub sandboxes_available: bool,
    pub sandboxes_enabled: bool,
    pub eci_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SysboxInfo {
    pub available: bool,
    pub runtime: Option<String>,
    pub context_exists: bool,
    pub context_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub arch: String,
    pub seccomp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub eci_enabled: bool,
    pub sysbox_ok: bool,
    pub isolation_available: bool,
    pub recommended_action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorJson {
    pub docker_desktop: DockerDesktopInfo,
    pub sysbox: SysboxInfo,
    pub platform: PlatformInfo,
    pub summary: Summary,
}

#[derive(Debug, Clone)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub json: DoctorJson,
}

impl DoctorReport {
    /// Exit code `0` iff at least one isolation path is ready.
    pub fn gate_ok(&self) -> bool {
        self.json.summary.isolation_available
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.json)
    }

    pub fn print_text(&self) {
        for check in &self.checks {
            match check.status {
                CheckStatus::Ok => log_ok(&format!("{}: {}", check.name, check.message)),
                CheckStatus::Warn => log_warn(&format!("{}: {}", check.name, check.message)),
                CheckStatus::Error => log_error(&format!("{}: {}", check.name, check.message)),
            }
        }
    }
}

fn push(checks: &mut Vec<CheckResult>, name: &str, status: CheckStatus, message: impl Into<String>) {
    checks.push(CheckResult {
        name: name.to_string(),
        status,
        message: message.into(),
    });
}

/// Run the full ordered check suite. `adapter` should be bound to the
/// default endpoint; the hardened-endpoint check constructs its own scoped
/// call internally.
pub fn run(adapter: &RuntimeAdapter, platform: &PlatformProbe) -> DoctorReport {
    let mut checks = Vec::new();
    let mut desktop = DockerDesktopInfo::default();
    let mut sysbox = SysboxInfo {
        context_name: RuntimeEndpoint::hardened_name(),
        ..Default::default()
    };

    // 1. CLI present; daemon reachable.
    if !adapter.cli_present() {
        push(
            &mut checks,
            "cli",
            CheckStatus::Error,
            "container CLI not found on PATH",
        );
    } else {
        push(&mut checks, "cli", CheckStatus::Ok, "container CLI present");
        match adapter.daemon_reachable(None) {
            Outcome::Ok(()) => push(&mut checks, "daemon", CheckStatus::Ok, "daemon reachable"),
            Outcome::Classified { class, stderr } => push(
                &mut checks,
                "daemon",
                CheckStatus::Error,
                format!("daemon unreachable ({class}): {stderr}"),
            ),
            Outcome::Timeout => {
                push(&mut checks, "daemon", CheckStatus::Error, "daemon probe timed out")
            }
            Outcome::Unknown { stderr } => push(
                &mut checks,
                "daemon",
                CheckStatus::Error,
                format!("daemon probe failed: {stderr}"),
            ),
        }
    }

    // 2. Desktop variant + version.
    match adapter.desktop_version(None) {
        Outcome::Ok(Some(version)) => {
            desktop.version = Some(version.clone());
            if version_at_least(&version, MIN_DESKTOP_VERSION) {
                push(
                    &mut checks,
                    "desktop-version",
                    CheckStatus::Ok,
                    format!("desktop version {version} meets minimum {MIN_DESKTOP_VERSION}"),
                );
            } else {
                push(
                    &mut checks,
                    "desktop-version",
                    CheckStatus::Warn,
                    format!("desktop version {version} below minimum {MIN_DESKTOP_VERSION}"),
                );
            }
        }
        Outcome::Ok(None) => push(
            &mut checks,
            "desktop-version",
            CheckStatus::Ok,
            "not applicable (no desktop variant reported)",
        ),
        _ => push(
            &mut checks,
            "desktop-version",
            CheckStatus::Warn,
            "could not determine desktop version",
        ),
    }

    // 3. Sandbox subcommand present; sandbox feature enabled.
    let subcommand_present = match adapter.sandbox_subcommand_present(None) {
        Outcome::Ok(present) => present,
        _ => false,
    };
    desktop.sandboxes_available = subcommand_present;
    if !subcommand_present {
        push(
            &mut checks,
            "sandbox-subcommand",
            CheckStatus::Warn,
            "sandbox subcommand not present",
        );
    } else {
        push(
            &mut checks,
            "sandbox-subcommand",
            CheckStatus::Ok,
            "sandbox subcommand present",
        );
        match adapter.sandbox_feature_enabled(None) {
            Outcome::Ok(state) => {
                let (status, enabled, msg) = match state {
                    SandboxFeatureState::Enabled => {
                        (CheckStatus::Ok, true, "sandbox feature enabled")
                    }
                    SandboxFeatureState::EmptyListOk => {
                        (CheckStatus::Ok, true, "sandbox feature enabled (no sandboxes yet)")
                    }
                    SandboxFeatureState::DisabledByPolicy => {
                        (CheckStatus::Error, false, "sandbox feature disabled by policy")
                    }
                    SandboxFeatureState::DisabledByUserSettings => {
                        (CheckStatus::Warn, false, "sandbox feature disabled in user settings")
                    }
                    SandboxFeatureState::RequirementsNotMet => {
                        (CheckStatus::Warn, false, "sandbox feature requirements not met")
                    }
                };
                desktop.sandboxes_enabled = enabled;
                push(&mut checks, "sandbox-feature", status, msg);
            }
            _ => push(
                &mut checks,
                "sandbox-feature",
                CheckStatus::Warn,
                "could not determine sandbox feature state",
            ),
        }
    }

    // 4. Enhanced-isolation flag: feature enabled but isolation disabled is a warn, not an error.
    desktop.eci_enabled = desktop.sandboxes_available && desktop.sandboxes_enabled;
    if desktop.sandboxes_available && !desktop.eci_enabled {
        push(
            &mut checks,
            "enhanced-isolation",
            CheckStatus::Warn,
            "sandbox subcommand present but enhanced isolation is not enabled",
        );
    } else if desktop.eci_enabled {
        push(
            &mut checks,
            "enhanced-isolation",
            CheckStatus::Ok,
            "enhanced isolation enabled",
        );
    } else {
        push(
            &mut checks,
            "enhanced-isolation",
            CheckStatus::Warn,
            "enhanced isolation not available on this host",
        );
    }

    // 5. Hardened-runtime endpoint present and runtime registered.
    let hardened_name = RuntimeEndpoint::hardened_name();
    sysbox.context_exists = matches!(adapter.context_exists(&hardened_name), Outcome::Ok(true));
    if sysbox.context_exists {
        let endpoint = match adapter.context_inspect(&hardened_name) {
            Outcome::Ok(ep) => Some(ep),
            _ => None,
        };
        match adapter.info(endpoint.as_ref()) {
            Outcome::Ok(info) => {
                let registered = info.runtimes.iter().any(|r| r == HARDENED_RUNTIME_NAME);
                sysbox.available = registered;
                sysbox.runtime = registered.then(|| HARDENED_RUNTIME_NAME.to_string());
                if registered {
                    push(
                        &mut checks,
                        "hardened-runtime",
                        CheckStatus::Ok,
                        format!("{hardened_name} endpoint present; {HARDENED_RUNTIME_NAME} registered"),
                    );
                } else {
                    push(
                        &mut checks,
                        "hardened-runtime",
                        CheckStatus::Warn,
                        format!("{hardened_name} endpoint present but {HARDENED_RUNTIME_NAME} not registered"),
                    );
                }
            }
            _ => push(
                &mut checks,
                "hardened-runtime",
                CheckStatus::Warn,
                format!("{hardened_name} endpoint present but unreachable"),
            ),
        }
    } else {
        push(
            &mut checks,
            "hardened-runtime",
            CheckStatus::Warn,
            format!("{hardened_name} endpoint not found; run `cai setup`"),
        );
    }

    // 6. Platform-specific: WSL2 seccomp mode.
    if platform.kind == crate::platform::PlatformKind::Wsl2 {
        let seccomp_status = match platform.pid1_seccomp {
            SeccompMode::Filter => CheckStatus::Warn,
            SeccompMode::Unknown => CheckStatus::Warn,
            _ => CheckStatus::Ok,
        };
        push(
            &mut checks,
            "wsl2-seccomp",
            seccomp_status,
            format!("PID 1 seccomp mode: {:?}", platform.pid1_seccomp),
        );
    }

    let isolation_available = desktop.eci_enabled || sysbox.available;
    let recommended_action = if isolation_available {
        "ready"
    } else if desktop.sandboxes_available {
        "enable_eci"
    } else {
        "setup_required"
    }
    .to_string();

    let overall = checks.iter().fold(CheckStatus::Ok, |acc, c| acc.worse(c.status));
    let _ = overall; // not a gate by itself; gate is isolation_available (documented above)

    let json = DoctorJson {
        docker_desktop: desktop,
        sysbox: sysbox.clone(),
        platform: PlatformInfo {
            kind: platform.kind.as_str().to_string(),
            arch: platform.arch.clone(),
            seccomp: Some(format!("{:?}", platform.pid1_seccomp)),
        },
        summary: Summary {
            eci_enabled: json_desktop_eci(&checks),
            sysbox_ok: sysbox.available,
            isolation_available,
            recommended_action,
        },
    };

    DoctorReport { checks, json }
}

fn json_desktop_eci(checks: &[CheckResult]) -> bool {
    checks
        .iter()
        .any(|c| c.name == "enhanced-isolation" && c.status == CheckStatus::Ok)
}

/// Best-effort dotted-version comparison; non-numeric components sort as
/// less than a missing minimum, so unparsable versions are treated as not
/// meeting it rather than panicking.
fn version_at_least(actual: &str, minimum: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.').filter_map(|p| p.parse::<u64>().ok()).collect()
    };
    let a = parse(actual);
    let m = parse(minimum);
    if a.is_empty() {
        return false;
    }
    a >= m
}

/// Regenerate the hardened-runtime configuration templates that Provisioner
/// would otherwise materialize at install time, for `--build-templates`.
pub fn build_templates(platform: &PlatformProbe) -> Vec<(&'static str, String)> {
    crate::provisioner::templates::render_all(platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_compare_basic() {
        assert!(version_at_least("4.30.0", "4.30.0"));
        assert!(version_at_least("4.31.2", "4.30.0"));
        assert!(!version_at_least("4.29.9", "4.30.0"));
        assert!(!version_at_least("not-a-version", "4.30.0"));
    }

    #[test]
    fn status_worse_escalates_to_error() {
        assert_eq!(CheckStatus::Ok.worse(CheckStatus::Warn), CheckStatus::Warn);
        assert_eq!(CheckStatus::Warn.worse(CheckStatus::Error), CheckStatus::Error);
        assert_eq!(CheckStatus::Ok.worse(CheckStatus::Ok), CheckStatus::Ok);
    }

    #[test]
    fn run_reports_error_when_cli_missing() {
        let adapter = RuntimeAdapter::new("containai-definitely-not-a-real-binary");
        let probe = PlatformProbe {
            kind: crate::platform::PlatformKind::Linux,
            arch: "amd64".to_string(),
            pid1_seccomp: SeccompMode::Unknown,
            desktop_variant: None,
        };
        let report = run(&adapter, &probe);
        assert!(!report.gate_ok());
        assert!(report
            .checks
            .iter()
            .any(|c| c.name == "cli" && c.status == CheckStatus::Error));
    }
}
