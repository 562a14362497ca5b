#![allow(clippy::module_name_repetitions)]
//! Streams a data volume to a local `.tgz` through a disposable helper
//! container (§4.9): the volume is bind-mounted read-only, the output
//! directory read-write, and the archive is written with the invoking
//! user's UID/GID so the host never ends up owning it as root.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ContainAiError, Result};
use crate::runtime::{adapter::timeouts, Outcome, RuntimeAdapter, RuntimeEndpoint};
use crate::util::{self, ShellScript};

const HELPER_IMAGE: &str = "ghcr.io/containai/sync-helper:latest";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub no_excludes: bool,
}

pub struct ExportEngine<'a> {
    adapter: &'a RuntimeAdapter,
    endpoint: Option<RuntimeEndpoint>,
}

impl<'a> ExportEngine<'a> {
    pub fn new(adapter: &'a RuntimeAdapter, endpoint: Option<RuntimeEndpoint>) -> Self {
        Self { adapter, endpoint }
    }

    /// Write `volume_name` to a `.tgz`, resolving `output` per the
    /// empty/directory/literal rules, and returning the absolute archive
    /// path on success.
    pub fn export(
        &self,
        volume_name: &str,
        output: Option<&Path>,
        excludes: &[String],
        opts: &ExportOptions,
    ) -> Result<PathBuf> {
        util::validate_volume_name(volume_name).map_err(ContainAiError::usage)?;

        let archive_path = resolve_output_path(output, volume_name)?;
        let output_dir = archive_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&output_dir)?;
        verify_writable(&output_dir)?;

        let archive_name = archive_path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ContainAiError::usage("output path has no file name"))?;

        let effective_excludes: &[String] = if opts.no_excludes { &[] } else { excludes };
        for e in effective_excludes {
            util::reject_newlines(e, "exclude entry").map_err(ContainAiError::usage)?;
        }

        let (uid, gid) = host_uid_gid();

        let mut tar_cmd = format!("tar czf {}", util::shell_escape(&format!("/output/{archive_name}")));
        for e in effective_excludes {
            tar_cmd.push_str(&format!(
                " --exclude={} --exclude={}",
                util::shell_escape(&format!("./{e}")),
                util::shell_escape(e)
            ));
        }
        tar_cmd.push_str(" -C /source .");

        let mut script = ShellScript::new();
        script.push(tar_cmd);
        let built = script.build().map_err(|e| ContainAiError::FatalSync(e.to_string()))?;

        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "--network".into(),
            "none".into(),
            "--user".into(),
            format!("{uid}:{gid}").into(),
            "-v".into(),
            format!("{volume_name}:/source:ro").into(),
            "-v".into(),
            format!("{}:/output", output_dir.display()).into(),
            HELPER_IMAGE.into(),
            "/bin/sh".into(),
            "-c".into(),
            built.into(),
        ];

        match self.adapter.run_helper(self.endpoint.as_ref(), args, timeouts::SYNC) {
            Outcome::Ok(out) if out.success() => Ok(archive_path),
            Outcome::Ok(out) => Err(ContainAiError::FatalSync(format!(
                "export helper exited {}: {}",
                out.status, out.stderr
            ))),
            other => Err(outcome_to_fatal("export", other)),
        }
    }
}

fn outcome_to_fatal<T>(operation: &str, outcome: Outcome<T>) -> ContainAiError {
    match outcome {
        Outcome::Ok(_) => unreachable!("outcome_to_fatal called on Ok outcome"),
        Outcome::Classified { class, stderr } => ContainAiError::ClassifiedTransient {
            operation: operation.to_string(),
            class,
            detail: stderr,
        },
        Outcome::Timeout => ContainAiError::FatalSync(format!("{operation} timed out")),
        Outcome::Unknown { stderr } => ContainAiError::FatalSync(format!("{operation} failed: {stderr}")),
    }
}

/// Empty path -> timestamped default in the current directory; an existing
/// directory -> timestamped default within it; anything else is used
/// verbatim. The result is always made absolute.
fn resolve_output_path(output: Option<&Path>, volume_name: &str) -> Result<PathBuf> {
    let resolved = match output {
        None => PathBuf::from(timestamped_name(volume_name)),
        Some(p) if p.as_os_str().is_empty() => PathBuf::from(timestamped_name(volume_name)),
        Some(p) if p.is_dir() => p.join(timestamped_name(volume_name)),
        Some(p) => p.to_path_buf(),
    };
    absolute_path(&resolved)
}

fn absolute_path(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(p))
}

fn timestamped_name(volume_name: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("containai-{volume_name}-{secs}.tgz")
}

fn verify_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".containai-export-probe-{}", std::process::id()));
    std::fs::write(&probe, b"").map_err(|e| {
        ContainAiError::precondition(
            format!("output directory {} is not writable: {e}", dir.display()),
            None,
        )
    })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

fn host_uid_gid() -> (u32, u32) {
    (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_output_empty_uses_timestamped_default_in_cwd() {
        let path = resolve_output_path(None, "my-vol").unwrap();
        assert!(path.is_absolute());
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("containai-my-vol-"));
        assert!(path.to_str().unwrap().ends_with(".tgz"));
    }

    #[test]
    fn resolve_output_directory_uses_timestamped_default_within_it() {
        let td = tempdir().unwrap();
        let path = resolve_output_path(Some(td.path()), "my-vol").unwrap();
        assert_eq!(path.parent().unwrap(), td.path());
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("containai-my-vol-"));
    }

    #[test]
    fn resolve_output_literal_path_is_used_verbatim() {
        let td = tempdir().unwrap();
        let literal = td.path().join("archive.tgz");
        let path = resolve_output_path(Some(&literal), "my-vol").unwrap();
        assert_eq!(path, literal);
    }

    #[test]
    fn resolve_output_relative_literal_is_made_absolute() {
        let path = resolve_output_path(Some(Path::new("archive.tgz")), "my-vol").unwrap();
        assert!(path.is_absolute());
        assert_eq!(path.file_name().unwrap(), "archive.tgz");
    }

    #[test]
    fn verify_writable_accepts_a_real_directory() {
        let td = tempdir().unwrap();
        assert!(verify_writable(td.path()).is_ok());
    }

    #[test]
    fn verify_writable_rejects_nonexistent_directory() {
        let td = tempdir().unwrap();
        let missing = td.path().join("nope");
        assert!(verify_writable(&missing).is_err());
    }
}
