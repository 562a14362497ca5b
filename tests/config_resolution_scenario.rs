use std::fs;

use containai::config::ConfigStore;

/// Spec §8 scenario 2: the deepest matching `[workspace."P"]` section wins,
/// even though its parent section is also an ancestor of the workspace.
#[test]
fn longest_prefix_match_scenario() {
    let td = tempfile::tempdir().unwrap();
    let home = td.path().join("home").join("u");
    let proj = home.join("proj");
    let sub = proj.join("sub");
    fs::create_dir_all(&sub).unwrap();

    let config_dir = sub.join(".containai");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        format!(
            "[workspace.\"{home}\"]\ndata_volume = \"outer\"\n\n[workspace.\"{proj}\"]\ndata_volume = \"inner\"\n",
            home = home.display(),
            proj = proj.display(),
        ),
    )
    .unwrap();

    let store = ConfigStore::discover(&sub);
    let effective = store.effective(&sub);
    assert_eq!(effective.data_volume, "inner");
}

/// Spec §8 scenario 3: effective excludes are the union of
/// `default_excludes` and the matched workspace's `excludes`, deduplicated
/// in first-occurrence order.
#[test]
fn excludes_cumulation_scenario() {
    let td = tempfile::tempdir().unwrap();
    let ws = td.path().join("ws");
    fs::create_dir_all(&ws).unwrap();

    let config_dir = ws.join(".containai");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        format!(
            "default_excludes = [\"cache/\", \"logs/\"]\n\n[workspace.\"{ws}\"]\nexcludes = [\"logs/\", \"tmp/\"]\n",
            ws = ws.display(),
        ),
    )
    .unwrap();

    let store = ConfigStore::discover(&ws);
    let effective = store.effective(&ws);
    assert_eq!(effective.excludes, vec!["cache/", "logs/", "tmp/"]);
}

#[test]
fn explicit_config_strict_mode_fails_command_on_malformed_toml() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("broken.toml");
    fs::write(&path, "this is not [[[ valid toml").unwrap();
    assert!(ConfigStore::load_explicit(&path).is_err());
}
