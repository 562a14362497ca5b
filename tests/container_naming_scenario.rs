use std::path::Path;
use std::process::Command;

use containai::lifecycle::naming::{derive_container_name, sanitize};

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .status()
        .expect("git must be available to run this test");
    assert!(status.success(), "git {args:?} failed in {}", repo.display());
}

/// Spec §8 scenario 1: workspace `/home/u/MyApp-Repo`, branch `feature/x.y`,
/// no override -> container name `myapp-repo-feature-x-y`.
#[test]
fn name_derivation_matches_the_literal_spec_scenario() {
    let td = tempfile::tempdir().unwrap();
    let repo = td.path().join("MyApp-Repo");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["config", "user.email", "test@example.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    std::fs::write(repo.join("f.txt"), "x").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "init"]);
    git(&repo, &["checkout", "-q", "-b", "feature/x.y"]);

    assert_eq!(derive_container_name(&repo), "myapp-repo-feature-x-y");
}

#[test]
fn sanitize_is_idempotent_on_already_clean_names() {
    let clean = "already-clean-name-123";
    assert_eq!(sanitize(clean), clean);
    assert_eq!(sanitize(&sanitize(clean)), clean);
}
