#![allow(clippy::module_name_repetitions)]
//! Executes the declarative source-to-target map through a disposable
//! helper container, drives post-sync JSON transforms, and handles
//! `.tgz` restore (§4.6).

pub mod map;
pub mod transforms;

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use tar::EntryType;

use crate::error::{ContainAiError, Result};
use crate::runtime::{adapter::timeouts, Outcome, RuntimeAdapter, RuntimeEndpoint};
use crate::util::{self, ShellScript};
use map::{SyncFlag, SyncMapEntry};

/// In-container UID/GID every `s`-flagged entry is chowned to, by
/// convention (§4.6).
pub const AGENT_UID: u32 = 1000;
pub const AGENT_GID: u32 = 1000;

const HELPER_IMAGE: &str = "ghcr.io/containai/sync-helper:latest";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub no_excludes: bool,
    pub no_secrets: bool,
    pub verbose: bool,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub entries_planned: usize,
    /// Transform names that failed validation and were skipped (warn, not fatal).
    pub transform_warnings: Vec<String>,
}

pub struct SyncEngine<'a> {
    adapter: &'a RuntimeAdapter,
    endpoint: Option<RuntimeEndpoint>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(adapter: &'a RuntimeAdapter, endpoint: Option<RuntimeEndpoint>) -> Self {
        Self { adapter, endpoint }
    }

    /// Run the sync map against `volume_name`, creating it first if absent.
    pub fn sync(
        &self,
        host_source_root: &Path,
        volume_name: &str,
        map_entries: &[SyncMapEntry],
        excludes: &[String],
        opts: &SyncOptions,
    ) -> Result<SyncReport> {
        util::validate_volume_name(volume_name).map_err(ContainAiError::usage)?;

        match self.adapter.volume_exists(self.endpoint.as_ref(), volume_name) {
            Outcome::Ok(true) => {}
            Outcome::Ok(false) => {
                if let Outcome::Classified { class, stderr } =
                    self.adapter.volume_create(self.endpoint.as_ref(), volume_name)
                {
                    return Err(ContainAiError::ClassifiedTransient {
                        operation: "volume create".to_string(),
                        class,
                        detail: stderr,
                    });
                }
            }
            outcome => return Err(outcome_to_fatal("volume inspect", outcome)),
        }

        let effective_excludes: Vec<&str> = if opts.no_excludes {
            Vec::new()
        } else {
            excludes.iter().map(String::as_str).collect()
        };
        for e in &effective_excludes {
            util::reject_newlines(e, "exclude entry").map_err(ContainAiError::usage)?;
        }

        let script = build_sync_script(map_entries, &effective_excludes, opts);
        let excludes_b64 = BASE64.encode(effective_excludes.join("\n"));

        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "--network".into(),
            "none".into(),
            "-v".into(),
            format!("{}:/source:ro", host_source_root.display()).into(),
            "-v".into(),
            format!("{volume_name}:/target").into(),
            "-e".into(),
            format!("EXCLUDES_B64={excludes_b64}").into(),
            "-e".into(),
            format!("DRY_RUN={}", if opts.dry_run { "1" } else { "0" }).into(),
            HELPER_IMAGE.into(),
            "/bin/sh".into(),
            "-c".into(),
            script.clone().into(),
        ];

        match self
            .adapter
            .run_helper(self.endpoint.as_ref(), args, timeouts::SYNC)
        {
            Outcome::Ok(out) if out.success() => Ok(SyncReport {
                entries_planned: map_entries.len(),
                transform_warnings: Vec::new(),
            }),
            Outcome::Ok(out) => Err(ContainAiError::FatalSync(format!(
                "sync helper exited {}: {}",
                out.status, out.stderr
            ))),
            other => Err(outcome_to_fatal("sync", other)),
        }
    }

    /// Run the post-sync JSON transforms. Each reads one or more host
    /// files, transforms, and writes through a disposable helper
    /// container; a validation failure in any one transform warns and
    /// continues rather than aborting the sync.
    pub fn run_post_sync_transforms(
        &self,
        volume_name: &str,
        host_plugins_json: Option<&Path>,
        host_marketplaces_json: Option<&Path>,
        host_settings_json: Option<&Path>,
        host_plugin_root: &str,
        container_plugin_root: &str,
        opts: &SyncOptions,
    ) -> Result<Vec<String>> {
        if opts.dry_run {
            return Ok(Vec::new());
        }
        let mut warnings = Vec::new();

        if let Some(path) = host_plugins_json {
            if let Err(w) = self.apply_json_transform(
                path,
                ".config/containai/plugins.json",
                volume_name,
                |input| transforms::rewrite_installed_plugins(input, host_plugin_root, container_plugin_root),
            ) {
                warnings.push(format!("installed-plugins rewrite: {w}"));
            }
        }
        if let Some(path) = host_marketplaces_json {
            if let Err(w) = self.apply_json_transform(
                path,
                ".config/containai/marketplaces.json",
                volume_name,
                |input| transforms::rewrite_marketplaces(input, host_plugin_root, container_plugin_root),
            ) {
                warnings.push(format!("marketplaces rewrite: {w}"));
            }
        }
        if let Some(path) = host_settings_json {
            if let Err(w) = self.apply_settings_merge(path, volume_name) {
                warnings.push(format!("settings merge: {w}"));
            }
        }

        if let Outcome::Classified { class, stderr } = self.cleanup_orphan_markers(volume_name) {
            warnings.push(format!("orphan-marker cleanup ({class}): {stderr}"));
        }

        Ok(warnings)
    }

    fn apply_json_transform(
        &self,
        host_path: &Path,
        volume_relative_target: &str,
        volume_name: &str,
        transform: impl FnOnce(&serde_json::Value) -> Result<serde_json::Value, transforms::TransformError>,
    ) -> std::result::Result<(), String> {
        let raw = std::fs::read_to_string(host_path).map_err(|e| e.to_string())?;
        let parsed: serde_json::Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let output = transform(&parsed).map_err(|e| e.to_string())?;
        let serialized = serde_json::to_string(&output).map_err(|e| e.to_string())?;
        self.write_json_into_volume(volume_name, volume_relative_target, &serialized)
            .map_err(|e| e.to_string())
    }

    fn apply_settings_merge(&self, host_path: &Path, volume_name: &str) -> std::result::Result<(), String> {
        let raw = std::fs::read_to_string(host_path).map_err(|e| e.to_string())?;
        let host_settings: serde_json::Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let existing = self.read_json_from_volume(volume_name, ".config/containai/settings.json");
        let merged = transforms::merge_settings(existing.as_ref(), &host_settings).map_err(|e| e.to_string())?;
        let serialized = serde_json::to_string(&merged).map_err(|e| e.to_string())?;
        self.write_json_into_volume(volume_name, ".config/containai/settings.json", &serialized)
            .map_err(|e| e.to_string())
    }

    fn read_json_from_volume(&self, volume_name: &str, relative_path: &str) -> Option<serde_json::Value> {
        let target = format!("/target/{relative_path}");
        let mut script = ShellScript::new();
        script.push(format!("cat {} 2>/dev/null || true", util::shell_escape(&target)));
        let built = script.build().ok()?;
        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "-v".into(),
            format!("{volume_name}:/target:ro").into(),
            HELPER_IMAGE.into(),
            "/bin/sh".into(),
            "-c".into(),
            built.into(),
        ];
        match self.adapter.run_helper(self.endpoint.as_ref(), args, timeouts::INSPECT) {
            Outcome::Ok(out) => serde_json::from_str(out.stdout.trim()).ok(),
            _ => None,
        }
    }

    fn write_json_into_volume(&self, volume_name: &str, relative_path: &str, content: &str) -> Result<()> {
        let target = format!("/target/{relative_path}");
        let content_b64 = BASE64.encode(content);
        let mut script = ShellScript::new();
        script
            .push(format!("mkdir -p $(dirname {})", util::shell_escape(&target)))
            .push(format!(
                "echo {} | base64 -d > {}.tmp",
                util::shell_escape(&content_b64),
                util::shell_escape(&target)
            ))
            .push(format!("mv {}.tmp {}", util::shell_escape(&target), util::shell_escape(&target)));
        let built = script.build().map_err(|e| ContainAiError::FatalSync(e.to_string()))?;
        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "-v".into(),
            format!("{volume_name}:/target").into(),
            HELPER_IMAGE.into(),
            "/bin/sh".into(),
            "-c".into(),
            built.into(),
        ];
        match self.adapter.run_helper(self.endpoint.as_ref(), args, timeouts::INSPECT) {
            Outcome::Ok(out) if out.success() => Ok(()),
            other => Err(outcome_to_fatal("write transform output", other)),
        }
    }

    fn cleanup_orphan_markers(&self, volume_name: &str) -> Outcome<()> {
        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "-v".into(),
            format!("{volume_name}:/target").into(),
            HELPER_IMAGE.into(),
            "find".into(),
            "/target".into(),
            "-name".into(),
            ".orphaned_at".into(),
            "-delete".into(),
        ];
        self.adapter
            .run_helper(self.endpoint.as_ref(), args, timeouts::INSPECT)
            .map(|_| ())
    }

    /// Validate and restore a `.tgz` archive into `volume_name`, replacing
    /// its contents. Idempotent.
    pub fn restore(&self, archive_path: &Path, volume_name: &str) -> Result<()> {
        util::validate_volume_name(volume_name).map_err(ContainAiError::usage)?;
        validate_archive(archive_path)?;

        match self.adapter.volume_exists(self.endpoint.as_ref(), volume_name) {
            Outcome::Ok(false) => {
                if let Outcome::Classified { class, stderr } =
                    self.adapter.volume_create(self.endpoint.as_ref(), volume_name)
                {
                    return Err(ContainAiError::ClassifiedTransient {
                        operation: "volume create".to_string(),
                        class,
                        detail: stderr,
                    });
                }
            }
            Outcome::Ok(true) => {}
            other => return Err(outcome_to_fatal("volume inspect", other)),
        }

        let mut script = ShellScript::new();
        script
            .push("find /target -mindepth 1 -delete")
            .push("tar xzf /restore.tgz -C /target");
        let built = script.build().map_err(|e| ContainAiError::FatalSync(e.to_string()))?;

        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "--network".into(),
            "none".into(),
            "-v".into(),
            format!("{}:/restore.tgz:ro", archive_path.display()).into(),
            "-v".into(),
            format!("{volume_name}:/target").into(),
            HELPER_IMAGE.into(),
            "/bin/sh".into(),
            "-c".into(),
            built.into(),
        ];
        match self
            .adapter
            .run_helper(self.endpoint.as_ref(), args, timeouts::RESTORE)
        {
            Outcome::Ok(out) if out.success() => Ok(()),
            Outcome::Ok(out) => Err(ContainAiError::FatalSync(format!(
                "restore helper exited {}: {}",
                out.status, out.stderr
            ))),
            other => Err(outcome_to_fatal("restore", other)),
        }
    }
}

fn outcome_to_fatal<T>(op: &str, outcome: Outcome<T>) -> ContainAiError {
    match outcome {
        Outcome::Ok(_) => unreachable!("caller only routes non-ok outcomes here"),
        Outcome::Classified { class, stderr } => ContainAiError::ClassifiedTransient {
            operation: op.to_string(),
            class,
            detail: stderr,
        },
        Outcome::Timeout => ContainAiError::FatalSync(format!("{op} timed out")),
        Outcome::Unknown { stderr } => ContainAiError::FatalSync(format!("{op} failed: {stderr}")),
    }
}

/// Build the shell fragment executed inside the helper container. In
/// `--dry-run` mode, mutating commands are replaced with `echo` lines
/// itemizing what would happen; the helper never mutates `/target` in that
/// mode.
fn build_sync_script(entries: &[SyncMapEntry], excludes: &[&str], opts: &SyncOptions) -> String {
    let mut script = ShellScript::new();
    script.push("set -e");

    let exclude_args: String = excludes
        .iter()
        .map(|e| format!(" --exclude={}", util::shell_escape(e)))
        .collect();

    for entry in entries {
        let src = format!("/source/{}", entry.source);
        let dst = format!("/target/{}", entry.target);
        let src_q = util::shell_escape(&src);
        let dst_q = util::shell_escape(&dst);

        if opts.dry_run {
            script.push(format!("test -e {src_q} && echo \"[PLAN] sync {} -> {}\" || true", entry.source, entry.target));
            continue;
        }

        if entry.has(SyncFlag::Directory) {
            let mut rsync_flags = String::from("-a");
            if entry.has(SyncFlag::Mirror) {
                rsync_flags.push_str(" --delete");
            }
            if !opts.no_excludes {
                if entry.has(SyncFlag::ExcludeSystemSubtree) {
                    rsync_flags.push_str(" --exclude=.system/");
                }
                rsync_flags.push_str(&exclude_args);
            }
            script.push(format!(
                "test -e {src_q} && mkdir -p $(dirname {dst_q}) && rsync {rsync_flags} {src_q}/ {dst_q}/ || true"
            ));
        } else if entry.has(SyncFlag::File) {
            script.push(format!(
                "test -e {src_q} && mkdir -p $(dirname {dst_q}) && cp -a {src_q} {dst_q} || true"
            ));
        }

        if entry.has(SyncFlag::InitJson) {
            script.push(format!("test -s {dst_q} || echo '{{}}' > {dst_q}"));
        }

        if entry.has(SyncFlag::Secret) && !opts.no_secrets {
            let mode = if entry.has(SyncFlag::Directory) { "0700" } else { "0600" };
            let recursive = if entry.has(SyncFlag::Directory) { "-R" } else { "" };
            script.push(format!("test -e {dst_q} && chmod {recursive} {mode} {dst_q} || true"));
            script.push(format!(
                "test -e {dst_q} && chown {recursive} {AGENT_UID}:{AGENT_GID} {dst_q} || true"
            ));
        }
    }

    script.build().unwrap_or_else(|e| format!("echo 'malformed sync script: {e}' >&2; exit 1"))
}

/// Validate a `.tgz` as a restore candidate: readable as gzip-tar, no
/// absolute paths, no `..` components, and only regular files and
/// directories (symlinks, hardlinks, devices, fifos, sockets rejected).
fn validate_archive(path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .map_err(|e| ContainAiError::FatalSync(format!("cannot open archive: {e}")))?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| ContainAiError::FatalSync(format!("not a valid gzip-tar stream: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| ContainAiError::FatalSync(format!("corrupt archive entry: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| ContainAiError::FatalSync(format!("invalid entry path: {e}")))?;
        if entry_path.is_absolute() {
            return Err(ContainAiError::FatalSync(format!(
                "archive contains an absolute path: {}",
                entry_path.display()
            )));
        }
        if entry_path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(ContainAiError::FatalSync(format!(
                "archive contains a parent-traversal entry: {}",
                entry_path.display()
            )));
        }
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Directory => {}
            other => {
                return Err(ContainAiError::FatalSync(format!(
                    "archive contains a disallowed entry type {other:?} at {}",
                    entry_path.display()
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_tgz(build: impl FnOnce(&mut tar::Builder<GzEncoder<std::fs::File>>)) -> tempfile::TempDir {
        let td = tempdir().unwrap();
        let path = td.path().join("archive.tgz");
        let file = std::fs::File::create(&path).unwrap();
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);
        build(&mut builder);
        builder.into_inner().unwrap().finish().unwrap();
        td
    }

    #[test]
    fn validate_archive_accepts_well_formed_tgz() {
        let td = write_tgz(|b| {
            let mut header = tar::Header::new_gnu();
            header.set_size(5);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            b.append_data(&mut header, "a/file.txt", "hello".as_bytes()).unwrap();
        });
        assert!(validate_archive(&td.path().join("archive.tgz")).is_ok());
    }

    #[test]
    fn validate_archive_rejects_absolute_path() {
        let td = write_tgz(|b| {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            b.append_data(&mut header, "/etc/passwd", &[][..]).unwrap();
        });
        assert!(validate_archive(&td.path().join("archive.tgz")).is_err());
    }

    #[test]
    fn validate_archive_rejects_parent_traversal() {
        let td = write_tgz(|b| {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            b.append_data(&mut header, "../escape.txt", &[][..]).unwrap();
        });
        assert!(validate_archive(&td.path().join("archive.tgz")).is_err());
    }

    #[test]
    fn validate_archive_rejects_symlinks() {
        let td = write_tgz(|b| {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_entry_type(EntryType::Symlink);
            header.set_cksum();
            b.append_link(&mut header, "link", "target").unwrap();
        });
        assert!(validate_archive(&td.path().join("archive.tgz")).is_err());
    }

    #[test]
    fn validate_archive_rejects_non_gzip_input() {
        let td = tempdir().unwrap();
        let path = td.path().join("not-a-tgz");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"definitely not gzip")
            .unwrap();
        assert!(validate_archive(&path).is_err());
    }

    #[test]
    fn build_sync_script_is_a_single_line_and_contains_every_entry() {
        let script = build_sync_script(map::DEFAULT_SYNC_MAP, &[], &SyncOptions::default());
        assert!(!script.contains('\n'));
        for entry in map::DEFAULT_SYNC_MAP {
            assert!(script.contains(entry.source), "missing {entry}");
        }
    }

    #[test]
    fn build_sync_script_dry_run_never_mutates() {
        let opts = SyncOptions { dry_run: true, ..Default::default() };
        let script = build_sync_script(map::DEFAULT_SYNC_MAP, &[], &opts);
        assert!(!script.contains("rsync"));
        assert!(!script.contains("chown"));
        assert!(script.contains("[PLAN]"));
    }

    #[test]
    fn build_sync_script_no_secrets_skips_chown_chmod() {
        let opts = SyncOptions { no_secrets: true, ..Default::default() };
        let script = build_sync_script(map::DEFAULT_SYNC_MAP, &[], &opts);
        assert!(!script.contains("chown"));
    }

    #[test]
    fn build_sync_script_applies_excludes_to_directory_entries() {
        let opts = SyncOptions::default();
        let script = build_sync_script(map::DEFAULT_SYNC_MAP, &["node_modules"], &opts);
        assert!(script.contains("--exclude=node_modules"));
    }

    #[test]
    fn build_sync_script_no_excludes_drops_both_global_and_x_flag_excludes() {
        let opts = SyncOptions { no_excludes: true, ..Default::default() };
        let script = build_sync_script(map::DEFAULT_SYNC_MAP, &["node_modules"], &opts);
        assert!(!script.contains("--exclude=node_modules"));
        assert!(!script.contains("--exclude=.system/"));
    }
}
