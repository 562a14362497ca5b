use std::fs;

use containai::env_import::{EnvImporter, EnvSpec};
use containai::runtime::RuntimeAdapter;

/// §4.7: merge order is file base, host overrides file on name collision,
/// and the merge is restricted to the allowlist regardless of source.
#[test]
fn host_env_overrides_workspace_file_within_the_allowlist() {
    let td = tempfile::tempdir().unwrap();
    fs::write(
        td.path().join(".env.local"),
        "API_KEY=from-file\nNOT_ALLOWED=should-be-dropped\n# comment\n\nexport OTHER=val\n",
    )
    .unwrap();

    std::env::set_var("API_KEY", "from-host");
    let adapter = RuntimeAdapter::default();
    let importer = EnvImporter::new(&adapter, None);
    let spec = EnvSpec {
        import: vec!["API_KEY".to_string(), "OTHER".to_string()],
        from_host: true,
        env_file: Some(".env.local".to_string()),
    };

    let merged = importer.merge(td.path(), &spec).unwrap();
    std::env::remove_var("API_KEY");

    assert_eq!(merged.names().len(), 2);
    assert!(merged.names().contains(&"API_KEY"));
    assert!(merged.names().contains(&"OTHER"));
    assert!(!merged.names().contains(&"NOT_ALLOWED"));
}

#[test]
fn absent_env_section_is_a_silent_noop() {
    let td = tempfile::tempdir().unwrap();
    let adapter = RuntimeAdapter::default();
    let importer = EnvImporter::new(&adapter, None);
    let spec = EnvSpec {
        import: Vec::new(),
        from_host: false,
        env_file: None,
    };
    let merged = importer.merge(td.path(), &spec).unwrap();
    assert!(merged.is_empty());
}
