#![allow(clippy::module_name_repetitions)]
//! Allowlist-driven environment-variable capture and atomic `.env` write
//! into the data volume (§4.7). Silently no-ops when `[env]` is absent.

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::color::log_warn;
use crate::error::{ContainAiError, Result};
use crate::runtime::{adapter::timeouts, Outcome, RuntimeAdapter, RuntimeEndpoint};
use crate::util::{self, ShellScript};

const HELPER_IMAGE: &str = "ghcr.io/containai/sync-helper:latest";
pub const AGENT_UID: u32 = 1000;
pub const AGENT_GID: u32 = 1000;

/// POSIX variable-name rule: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Default)]
pub struct EnvSpec {
    pub import: Vec<String>,
    pub from_host: bool,
    /// Workspace-relative path to a dotenv-style file.
    pub env_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
}

/// The merged, allowlist-filtered set of name/value pairs ready to write.
/// Values are never logged; only `names()` is safe to print.
#[derive(Debug, Default)]
pub struct MergedEnv {
    values: BTreeMap<String, String>,
}

impl MergedEnv {
    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn render_dotenv(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.values {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }
}

pub struct EnvImporter<'a> {
    adapter: &'a RuntimeAdapter,
    endpoint: Option<RuntimeEndpoint>,
}

impl<'a> EnvImporter<'a> {
    pub fn new(adapter: &'a RuntimeAdapter, endpoint: Option<RuntimeEndpoint>) -> Self {
        Self { adapter, endpoint }
    }

    /// Build the allowlist from `spec.import`, validating and deduplicating
    /// names. Invalid names are dropped with a warning rather than failing
    /// the whole import.
    fn allowlist(spec: &EnvSpec) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for name in &spec.import {
            if !is_valid_env_name(name) {
                log_warn(&format!("skipping invalid env name in allowlist: {name}"));
                continue;
            }
            if seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
        out
    }

    /// Merge the workspace file (base) and host environment (overrides),
    /// restricted to the allowlist.
    pub fn merge(&self, workspace_root: &Path, spec: &EnvSpec) -> Result<MergedEnv> {
        let allowlist = Self::allowlist(spec);
        let mut merged = BTreeMap::new();

        if let Some(rel) = &spec.env_file {
            let from_file = read_env_file(workspace_root, rel)?;
            for (k, v) in from_file {
                if allowlist.contains(&k) {
                    merged.insert(k, v);
                }
            }
        }

        if spec.from_host {
            for name in &allowlist {
                if let Ok(v) = std::env::var(name) {
                    if v.contains('\n') {
                        log_warn(&format!("skipping host env var '{name}': value contains a newline"));
                        continue;
                    }
                    merged.insert(name.clone(), v);
                }
            }
        }

        Ok(MergedEnv { values: merged })
    }

    /// Atomically write the merged env into `/.env` inside the data volume
    /// via a disposable helper container: write as root to a temp file,
    /// chown to the agent UID/GID, chmod 0600, verify neither the mount
    /// point nor the target is a symlink, then rename into place.
    pub fn write_into_volume(
        &self,
        volume_name: &str,
        merged: &MergedEnv,
        opts: &ImportOptions,
    ) -> Result<()> {
        if merged.is_empty() || opts.dry_run {
            return Ok(());
        }
        util::validate_volume_name(volume_name).map_err(ContainAiError::usage)?;

        let content_b64 = BASE64.encode(merged.render_dotenv());
        let mut script = ShellScript::new();
        script
            .push("test -L /target || true")
            .push("if [ -L /target/.env ]; then echo 'refusing to write through a symlink' >&2; exit 1; fi")
            .push(format!("echo {} | base64 -d > /target/.env.tmp", util::shell_escape(&content_b64)))
            .push(format!("chown {AGENT_UID}:{AGENT_GID} /target/.env.tmp"))
            .push("chmod 0600 /target/.env.tmp")
            .push("mv /target/.env.tmp /target/.env");
        let built = script.build().map_err(|e| ContainAiError::FatalSync(e.to_string()))?;

        let args: Vec<std::ffi::OsString> = vec![
            "--rm".into(),
            "--network".into(),
            "none".into(),
            "-v".into(),
            format!("{volume_name}:/target").into(),
            HELPER_IMAGE.into(),
            "/bin/sh".into(),
            "-c".into(),
            built.into(),
        ];
        match self.adapter.run_helper(self.endpoint.as_ref(), args, timeouts::INSPECT) {
            Outcome::Ok(out) if out.success() => Ok(()),
            Outcome::Ok(out) => Err(ContainAiError::FatalSync(format!(
                "env write helper exited {}: {}",
                out.status, out.stderr
            ))),
            Outcome::Classified { class, stderr } => Err(ContainAiError::ClassifiedTransient {
                operation: "env import write".to_string(),
                class,
                detail: stderr,
            }),
            Outcome::Timeout => Err(ContainAiError::FatalSync("env import write timed out".to_string())),
            Outcome::Unknown { stderr } => Err(ContainAiError::FatalSync(format!("env import write failed: {stderr}"))),
        }
    }
}

/// Strictly-workspace-relative dotenv parser: `#`-comments and blanks
/// skipped, optional leading `export `, split on first `=` only, CRLF
/// stripped, keys failing the name pattern rejected, unclosed quoted
/// multi-line values rejected (logging key only, never the value).
fn read_env_file(workspace_root: &Path, relative: &str) -> Result<BTreeMap<String, String>> {
    let rel_path = Path::new(relative);
    if rel_path.is_absolute() || rel_path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(ContainAiError::usage(format!(
            "env_file must be workspace-relative with no parent traversal: {relative}"
        )));
    }
    let full = workspace_root.join(rel_path);
    if full.is_symlink() {
        return Err(ContainAiError::precondition(
            format!("env_file {relative} is a symlink"),
            Some("point env_file at a regular file".to_string()),
        ));
    }
    let contents = match std::fs::read_to_string(&full) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(ContainAiError::from(e)),
    };

    let mut out = BTreeMap::new();
    for (lineno, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((key, value)) = line.split_once('=') else {
            log_warn(&format!("{relative}:{}: skipping malformed line (no '=')", lineno + 1));
            continue;
        };
        let key = key.trim();
        if !is_valid_env_name(key) {
            log_warn(&format!("{relative}:{}: skipping invalid variable name '{key}'", lineno + 1));
            continue;
        }
        let value = unquote(value.trim());
        match value {
            Some(v) => {
                out.insert(key.to_string(), v);
            }
            None => {
                log_warn(&format!(
                    "{relative}:{}: skipping key '{key}': unclosed quoted value",
                    lineno + 1
                ));
            }
        }
    }
    Ok(out)
}

/// Strip a single layer of matching quotes; `None` if quoted but unclosed.
fn unquote(v: &str) -> Option<String> {
    if let Some(inner) = v.strip_prefix('"') {
        return inner.strip_suffix('"').map(str::to_string);
    }
    if let Some(inner) = v.strip_prefix('\'') {
        return inner.strip_suffix('\'').map(str::to_string);
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validates_posix_names() {
        assert!(is_valid_env_name("FOO_BAR"));
        assert!(is_valid_env_name("_private"));
        assert!(!is_valid_env_name("1FOO"));
        assert!(!is_valid_env_name("FOO-BAR"));
        assert!(!is_valid_env_name(""));
    }

    #[test]
    fn read_env_file_parses_exports_and_comments() {
        let td = tempdir().unwrap();
        std::fs::write(
            td.path().join(".env"),
            "# comment\nexport FOO=bar\nBAZ=\"qux\"\n\nBAD LINE\n",
        )
        .unwrap();
        let parsed = read_env_file(td.path(), ".env").unwrap();
        assert_eq!(parsed.get("FOO").unwrap(), "bar");
        assert_eq!(parsed.get("BAZ").unwrap(), "qux");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn read_env_file_rejects_absolute_and_traversal_paths() {
        let td = tempdir().unwrap();
        assert!(read_env_file(td.path(), "/etc/passwd").is_err());
        assert!(read_env_file(td.path(), "../escape").is_err());
    }

    #[test]
    fn read_env_file_missing_file_is_empty_not_error() {
        let td = tempdir().unwrap();
        let parsed = read_env_file(td.path(), "nope.env").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn read_env_file_skips_unclosed_quoted_value() {
        let td = tempdir().unwrap();
        std::fs::write(td.path().join(".env"), "FOO=\"unterminated\nBAR=ok\n").unwrap();
        let parsed = read_env_file(td.path(), ".env").unwrap();
        assert!(!parsed.contains_key("FOO"));
        assert_eq!(parsed.get("BAR").unwrap(), "ok");
    }

    #[test]
    fn merge_allowlist_filters_to_declared_names() {
        let td = tempdir().unwrap();
        std::fs::write(td.path().join(".env"), "KEPT=1\nDROPPED=2\n").unwrap();
        let adapter = RuntimeAdapter::default();
        let importer = EnvImporter::new(&adapter, None);
        let spec = EnvSpec {
            import: vec!["KEPT".to_string()],
            from_host: false,
            env_file: Some(".env".to_string()),
        };
        let merged = importer.merge(td.path(), &spec).unwrap();
        assert_eq!(merged.names(), vec!["KEPT"]);
    }

    #[test]
    fn merge_host_overrides_file_on_collision() {
        let td = tempdir().unwrap();
        std::fs::write(td.path().join(".env"), "CONTAINAI_TEST_ENV_IMPORT_NAME=from-file\n").unwrap();
        std::env::set_var("CONTAINAI_TEST_ENV_IMPORT_NAME", "from-host");
        let adapter = RuntimeAdapter::default();
        let importer = EnvImporter::new(&adapter, None);
        let spec = EnvSpec {
            import: vec!["CONTAINAI_TEST_ENV_IMPORT_NAME".to_string()],
            from_host: true,
            env_file: Some(".env".to_string()),
        };
        let merged = importer.merge(td.path(), &spec).unwrap();
        assert_eq!(
            merged.values.get("CONTAINAI_TEST_ENV_IMPORT_NAME").unwrap(),
            "from-host"
        );
        std::env::remove_var("CONTAINAI_TEST_ENV_IMPORT_NAME");
    }

    #[test]
    fn allowlist_deduplicates_and_drops_invalid_names() {
        let spec = EnvSpec {
            import: vec!["FOO".to_string(), "FOO".to_string(), "1BAD".to_string()],
            from_host: false,
            env_file: None,
        };
        assert_eq!(EnvImporter::allowlist(&spec), vec!["FOO".to_string()]);
    }
}
