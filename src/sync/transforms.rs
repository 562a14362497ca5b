//! Post-sync JSON transforms (§4.6). Each is a pure function over
//! `serde_json::Value` so it can be unit-tested without a container; the
//! caller in [`super::SyncEngine`] is responsible for reading the host
//! input, invoking the transform, and writing the result into the volume,
//! treating any transform failure here as a warn-and-continue.

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Rewrite each entry's install path from `host_root` to `container_root`,
/// force `scope="user"`, and drop any `projectPath` field.
pub fn rewrite_installed_plugins(
    input: &Value,
    host_root: &str,
    container_root: &str,
) -> Result<Value, TransformError> {
    let obj = input.as_object().ok_or(TransformError::NotAnObject)?;
    let mut out = Map::new();
    for (key, entry) in obj {
        let mut entry = entry.as_object().cloned().ok_or_else(|| {
            TransformError::Malformed(format!("entry '{key}' is not an object"))
        })?;
        if let Some(Value::String(path)) = entry.get("installPath") {
            if let Some(rewritten) = path.strip_prefix(host_root) {
                entry.insert(
                    "installPath".to_string(),
                    Value::String(format!("{container_root}{rewritten}")),
                );
            }
        }
        entry.insert("scope".to_string(), Value::String("user".to_string()));
        entry.remove("projectPath");
        out.insert(key.clone(), Value::Object(entry));
    }
    Ok(Value::Object(out))
}

/// Rewrite `installLocation` fields by the same host-root to container-root
/// substitution used for plugins.
pub fn rewrite_marketplaces(
    input: &Value,
    host_root: &str,
    container_root: &str,
) -> Result<Value, TransformError> {
    let obj = input.as_object().ok_or(TransformError::NotAnObject)?;
    let mut out = Map::new();
    for (key, entry) in obj {
        let mut entry = entry.as_object().cloned().ok_or_else(|| {
            TransformError::Malformed(format!("entry '{key}' is not an object"))
        })?;
        if let Some(Value::String(loc)) = entry.get("installLocation") {
            if let Some(rewritten) = loc.strip_prefix(host_root) {
                entry.insert(
                    "installLocation".to_string(),
                    Value::String(format!("{container_root}{rewritten}")),
                );
            }
        }
        out.insert(key.clone(), Value::Object(entry));
    }
    Ok(Value::Object(out))
}

/// Default settings object used when the volume has no prior settings file
/// or it fails to parse as an object.
fn canonical_default_settings() -> Value {
    let mut m = Map::new();
    m.insert("enabledPlugins".to_string(), Value::Object(Map::new()));
    Value::Object(m)
}

/// Overlay the host settings' `enabledPlugins` map onto the existing volume
/// settings' `enabledPlugins`, preserving the rest of the volume settings.
pub fn merge_settings(
    existing_volume_settings: Option<&Value>,
    host_settings: &Value,
) -> Result<Value, TransformError> {
    let host_enabled = host_settings
        .get("enabledPlugins")
        .and_then(Value::as_object)
        .cloned()
        .ok_or(TransformError::NotAnObject)?;

    let mut base = match existing_volume_settings {
        Some(v) if v.is_object() => v.clone(),
        _ => canonical_default_settings(),
    };
    let base_obj = base.as_object_mut().ok_or(TransformError::NotAnObject)?;
    let enabled = base_obj
        .entry("enabledPlugins".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let enabled_map = enabled.as_object_mut().ok_or(TransformError::NotAnObject)?;
    for (k, v) in host_enabled {
        enabled_map.insert(k, v);
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrites_install_path_and_strips_project_path() {
        let input = json!({
            "plugin-a": {"installPath": "/home/user/.config/plugins/a", "projectPath": "/work/proj"}
        });
        let out = rewrite_installed_plugins(&input, "/home/user/.config/plugins", "/home/coder/.config/plugins").unwrap();
        assert_eq!(
            out["plugin-a"]["installPath"],
            json!("/home/coder/.config/plugins/a")
        );
        assert_eq!(out["plugin-a"]["scope"], json!("user"));
        assert!(out["plugin-a"].get("projectPath").is_none());
    }

    #[test]
    fn rewrite_installed_plugins_rejects_non_object_entry() {
        let input = json!({"plugin-a": "not-an-object"});
        assert!(rewrite_installed_plugins(&input, "/a", "/b").is_err());
    }

    #[test]
    fn rewrites_marketplace_install_location() {
        let input = json!({"market-a": {"installLocation": "/home/user/.config/m/a"}});
        let out = rewrite_marketplaces(&input, "/home/user/.config/m", "/home/coder/.config/m").unwrap();
        assert_eq!(out["market-a"]["installLocation"], json!("/home/coder/.config/m/a"));
    }

    #[test]
    fn merge_settings_overlays_enabled_plugins_preserving_rest() {
        let existing = json!({"enabledPlugins": {"a": true}, "theme": "dark"});
        let host = json!({"enabledPlugins": {"a": false, "b": true}});
        let merged = merge_settings(Some(&existing), &host).unwrap();
        assert_eq!(merged["theme"], json!("dark"));
        assert_eq!(merged["enabledPlugins"]["a"], json!(false));
        assert_eq!(merged["enabledPlugins"]["b"], json!(true));
    }

    #[test]
    fn merge_settings_falls_back_to_canonical_default_when_volume_settings_missing() {
        let host = json!({"enabledPlugins": {"a": true}});
        let merged = merge_settings(None, &host).unwrap();
        assert_eq!(merged["enabledPlugins"]["a"], json!(true));
    }

    #[test]
    fn merge_settings_falls_back_when_volume_settings_invalid() {
        let existing = json!("not-an-object");
        let host = json!({"enabledPlugins": {"a": true}});
        let merged = merge_settings(Some(&existing), &host).unwrap();
        assert_eq!(merged["enabledPlugins"]["a"], json!(true));
    }

    #[test]
    fn merge_settings_rejects_host_without_enabled_plugins() {
        let host = json!({"theme": "dark"});
        assert!(merge_settings(None, &host).is_err());
    }
}
