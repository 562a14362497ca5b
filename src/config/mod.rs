#![allow(clippy::module_name_repetitions)]
//! Workspace-scoped configuration resolution (§3, §4.3).
//!
//! Discovery walks from the workspace toward the filesystem root, stopping
//! at the first `.containai/config.toml` or at a git root marker; absent
//! either, it falls back to the user-global config under the XDG config
//! directory. [`ConfigStore::effective`] resolves the longest-prefix
//! `[workspace."P"]` match and merges in `[agent]` and built-in defaults.

pub mod agents;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::color::{log_debug, log_warn};
use crate::error::{ContainAiError, Result};

pub const DEFAULT_DATA_VOLUME: &str = "containai-data";

#[derive(Debug, Deserialize, Default, Clone)]
struct RawConfig {
    agent: Option<AgentSection>,
    // `BTreeMap` rather than `HashMap`: tie-break below depends on
    // iterating keys in deterministic lexicographic order.
    workspace: Option<BTreeMap<String, WorkspaceSection>>,
    default_excludes: Option<Vec<String>>,
    env: Option<EnvSection>,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct AgentSection {
    default_agent: Option<String>,
    data_volume: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct WorkspaceSection {
    data_volume: Option<String>,
    #[serde(default)]
    excludes: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct EnvSection {
    #[serde(default)]
    import: Vec<String>,
    #[serde(default)]
    from_host: bool,
    env_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnvImportSpec {
    pub import: Vec<String>,
    pub from_host: bool,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub data_volume: String,
    pub excludes: Vec<String>,
    pub agent: String,
    pub env: EnvImportSpec,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    raw: RawConfig,
    pub source: Option<PathBuf>,
}

impl ConfigStore {
    /// Lenient auto-discovery: a malformed config warns and falls back to
    /// built-in defaults rather than failing the command.
    pub fn discover(workspace: &Path) -> Self {
        match find_config_path(workspace) {
            Some(path) => match read_and_parse(&path) {
                Ok(raw) => {
                    log_debug(&format!("config: loaded {}", path.display()));
                    ConfigStore {
                        raw,
                        source: Some(path),
                    }
                }
                Err(e) => {
                    log_warn(&format!(
                        "config: failed to parse {}: {e}; falling back to defaults",
                        path.display()
                    ));
                    ConfigStore {
                        raw: RawConfig::default(),
                        source: None,
                    }
                }
            },
            None => ConfigStore {
                raw: RawConfig::default(),
                source: None,
            },
        }
    }

    /// Strict explicit `--config PATH`: a parse error fails the command.
    pub fn load_explicit(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(ContainAiError::usage(format!(
                "--config requires an absolute path, got {}",
                path.display()
            )));
        }
        let raw = read_and_parse(path).map_err(|e| {
            ContainAiError::usage(format!("failed to parse config {}: {e}", path.display()))
        })?;
        Ok(ConfigStore {
            raw,
            source: Some(path.to_path_buf()),
        })
    }

    /// Resolve the effective configuration for a canonical, absolute
    /// workspace path.
    pub fn effective(&self, workspace: &Path) -> EffectiveConfig {
        let matched = self.longest_prefix_match(workspace);

        let data_volume = std::env::var("CONTAINAI_DATA_VOLUME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| matched.and_then(|(_, s)| s.data_volume.clone()))
            .or_else(|| self.raw.agent.as_ref().and_then(|a| a.data_volume.clone()))
            .unwrap_or_else(|| DEFAULT_DATA_VOLUME.to_string());

        let default_excludes = self.raw.default_excludes.clone().unwrap_or_default();
        let workspace_excludes = matched.map(|(_, s)| s.excludes.clone()).unwrap_or_default();
        let excludes = merge_excludes(&default_excludes, &workspace_excludes);

        let agent = self
            .raw
            .agent
            .as_ref()
            .and_then(|a| a.default_agent.clone())
            .unwrap_or_else(|| agents::DEFAULT_AGENT.to_string());

        let env = self
            .raw
            .env
            .as_ref()
            .map(|e| EnvImportSpec {
                import: dedup_preserve_order(&e.import),
                from_host: e.from_host,
                env_file: e.env_file.as_ref().map(PathBuf::from),
            })
            .unwrap_or_default();

        EffectiveConfig {
            data_volume,
            excludes,
            agent,
            env,
        }
    }

    /// Among `[workspace."P"]` sections where P is a proper ancestor of (or
    /// equal to) `workspace`, the one with the most path segments; ties
    /// broken by the textually-first key.
    fn longest_prefix_match<'a>(&'a self, workspace: &Path) -> Option<(&'a str, &'a WorkspaceSection)> {
        let sections = self.raw.workspace.as_ref()?;
        sections
            .iter()
            .filter(|(k, _)| {
                let p = Path::new(k.as_str());
                p.is_absolute() && workspace.starts_with(p)
            })
            .map(|(k, v)| (k.as_str(), v))
            .max_by(|(ka, _), (kb, _)| {
                let segs = |k: &str| Path::new(k).components().count();
                segs(ka).cmp(&segs(kb)).then_with(|| kb.cmp(ka))
            })
    }
}

fn merge_excludes(default_excludes: &[String], workspace_excludes: &[String]) -> Vec<String> {
    let combined = default_excludes
        .iter()
        .chain(workspace_excludes.iter())
        .cloned();
    dedup_preserve_order_iter(combined)
}

fn dedup_preserve_order(items: &[String]) -> Vec<String> {
    dedup_preserve_order_iter(items.iter().cloned())
}

fn dedup_preserve_order_iter(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if item.contains('\n') || item.contains('\r') {
            continue;
        }
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

fn read_and_parse(path: &Path) -> std::result::Result<RawConfig, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    toml::from_str(&contents).map_err(|e| e.to_string())
}

/// Walk from `workspace` toward the root looking for `.containai/config.toml`,
/// stopping at the first git root marker (`.git`) encountered without a
/// config present there. Falls back to the XDG config path.
fn find_config_path(workspace: &Path) -> Option<PathBuf> {
    let mut dir = Some(workspace);
    while let Some(d) = dir {
        let candidate = d.join(".containai").join("config.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
        if d.join(".git").exists() {
            break;
        }
        dir = d.parent();
    }
    xdg_config_path().filter(|p| p.is_file())
}

fn xdg_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("containai").join("config.toml"));
        }
    }
    home::home_dir().map(|h| h.join(".config").join("containai").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn longest_prefix_selects_deepest_workspace_section() {
        let toml = r#"
[workspace."/home/u"]
data_volume = "outer"

[workspace."/home/u/proj"]
data_volume = "inner"
"#;
        let raw: RawConfig = toml::from_str(toml).unwrap();
        let store = ConfigStore {
            raw,
            source: None,
        };
        let eff = store.effective(Path::new("/home/u/proj/sub"));
        assert_eq!(eff.data_volume, "inner");
    }

    #[test]
    fn equal_segment_count_ties_break_on_textually_first_key() {
        // Both keys normalize to the same component count and are both
        // ancestors of the workspace below; "/home/u/proj" sorts before
        // "/home/u/proj/" lexicographically, so it must win.
        let toml = r#"
[workspace."/home/u/proj/"]
data_volume = "trailing-slash"

[workspace."/home/u/proj"]
data_volume = "no-trailing-slash"
"#;
        let raw: RawConfig = toml::from_str(toml).unwrap();
        let store = ConfigStore { raw, source: None };
        let eff = store.effective(Path::new("/home/u/proj"));
        assert_eq!(eff.data_volume, "no-trailing-slash");
    }

    #[test]
    fn excludes_cumulate_and_dedup_preserving_order() {
        let toml = r#"
default_excludes = ["cache/", "logs/"]

[workspace."/home/u"]
excludes = ["logs/", "tmp/"]
"#;
        let raw: RawConfig = toml::from_str(toml).unwrap();
        let store = ConfigStore { raw, source: None };
        let eff = store.effective(Path::new("/home/u"));
        assert_eq!(eff.excludes, vec!["cache/", "logs/", "tmp/"]);
    }

    #[test]
    fn env_override_takes_precedence_over_config() {
        std::env::set_var("CONTAINAI_DATA_VOLUME", "from-env");
        let store = ConfigStore {
            raw: RawConfig::default(),
            source: None,
        };
        let eff = store.effective(Path::new("/anywhere"));
        assert_eq!(eff.data_volume, "from-env");
        std::env::remove_var("CONTAINAI_DATA_VOLUME");
    }

    #[test]
    fn falls_back_to_builtin_default_volume() {
        let store = ConfigStore {
            raw: RawConfig::default(),
            source: None,
        };
        std::env::remove_var("CONTAINAI_DATA_VOLUME");
        let eff = store.effective(Path::new("/anywhere"));
        assert_eq!(eff.data_volume, DEFAULT_DATA_VOLUME);
    }

    #[test]
    fn discover_stops_at_git_root_without_config() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join(".git")).unwrap();
        let sub = td.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        std::env::set_var("XDG_CONFIG_HOME", td.path().join("xdg-nonexistent"));
        let store = ConfigStore::discover(&sub);
        assert!(store.source.is_none());
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    fn discover_finds_repo_local_config() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join(".git")).unwrap();
        write(
            &td.path().join(".containai").join("config.toml"),
            "[agent]\ndefault_agent = \"gemini\"\n",
        );
        let store = ConfigStore::discover(td.path());
        assert_eq!(store.effective(td.path()).agent, "gemini");
    }

    #[test]
    fn load_explicit_rejects_relative_path() {
        let err = ConfigStore::load_explicit(Path::new("relative/config.toml")).unwrap_err();
        assert!(matches!(err, ContainAiError::Usage(_)));
    }

    #[test]
    fn load_explicit_fails_on_malformed_toml() {
        let td = tempdir().unwrap();
        let path = td.path().join("bad.toml");
        fs::write(&path, "not valid [[[ toml").unwrap();
        assert!(ConfigStore::load_explicit(&path).is_err());
    }
}
