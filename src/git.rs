//! Minimal git subprocess wrappers used for container-name derivation.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Run a git command with optional `-C <repo>`. Returns `Output` on invocation success.
pub fn git(repo: Option<&Path>, args: &[&str]) -> std::io::Result<Output> {
    let mut cmd = Command::new("git");
    if let Some(r) = repo {
        cmd.arg("-C").arg(r);
    }
    for a in args {
        cmd.arg(a);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.output()
}

/// Run a git command and capture trimmed stdout as a UTF-8 string on success.
pub fn git_stdout_str(repo: Option<&Path>, args: &[&str]) -> Option<String> {
    git(repo, args).ok().and_then(|o| {
        if o.status.success() {
            Some(String::from_utf8_lossy(&o.stdout).trim().to_string())
        } else {
            None
        }
    })
}

/// Toplevel of the git repository containing `dir`, or `None` outside a checkout.
pub fn repo_root(dir: &Path) -> Option<PathBuf> {
    git_stdout_str(Some(dir), &["rev-parse", "--show-toplevel"]).map(PathBuf::from)
}

/// `feature/x` when on a named branch, or the short detached SHA when HEAD is detached.
/// `None` when the directory is not inside a git checkout at all.
pub fn branch_or_detached_sha(dir: &Path) -> Option<String> {
    let branch = git_stdout_str(Some(dir), &["symbolic-ref", "--short", "-q", "HEAD"]);
    match branch {
        Some(b) if !b.is_empty() => Some(b),
        _ => git_stdout_str(Some(dir), &["rev-parse", "--short", "HEAD"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            StdCommand::new("git")
                .arg("-C")
                .arg(dir)
                .args(args)
                .status()
                .expect("git available");
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("f.txt"), "x").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn repo_root_detects_toplevel() {
        let td = tempdir().unwrap();
        init_repo(td.path());
        let root = repo_root(td.path()).expect("should find repo root");
        assert_eq!(
            std::fs::canonicalize(&root).unwrap(),
            std::fs::canonicalize(td.path()).unwrap()
        );
    }

    #[test]
    fn repo_root_none_outside_git() {
        let td = tempdir().unwrap();
        assert!(repo_root(td.path()).is_none());
    }

    #[test]
    fn branch_or_sha_reports_branch_name() {
        let td = tempdir().unwrap();
        init_repo(td.path());
        let b = branch_or_detached_sha(td.path());
        assert!(b.is_some());
    }
}
