use std::process::Command;

#[test]
fn doctor_build_templates_never_touches_the_runtime() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let out = Command::new(bin)
        .arg("doctor")
        .arg("--build-templates")
        .output()
        .expect("failed to run cai doctor --build-templates");
    assert!(
        out.status.success(),
        "cai doctor --build-templates exited {:?}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(!stdout.trim().is_empty(), "expected rendered templates on stdout");
}

#[test]
fn help_is_exit_zero_and_lists_subcommands() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let out = Command::new(bin)
        .arg("--help")
        .output()
        .expect("failed to run cai --help");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for sub in ["doctor", "setup", "import", "export", "run", "shell", "stop", "status"] {
        assert!(stdout.contains(sub), "help text missing subcommand '{sub}'");
    }
}

#[test]
fn unknown_subcommand_is_usage_error() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let out = Command::new(bin)
        .arg("not-a-real-subcommand")
        .output()
        .expect("failed to run cai");
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(2));
}
