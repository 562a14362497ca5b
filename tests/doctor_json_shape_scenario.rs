use std::process::Command;

/// §6 Doctor JSON shape: the top-level keys are a stable contract regardless
/// of whether the overall gate passes on the host running the test.
#[test]
fn doctor_json_has_the_documented_top_level_keys() {
    let bin = env!("CARGO_BIN_EXE_cai");
    let out = Command::new(bin)
        .arg("doctor")
        .arg("--json")
        .output()
        .expect("failed to run cai doctor --json");

    let stdout = String::from_utf8_lossy(&out.stdout);
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("doctor --json did not emit valid JSON: {e}\nstdout: {stdout}"));

    for key in ["docker_desktop", "sysbox", "platform", "summary"] {
        assert!(parsed.get(key).is_some(), "doctor JSON missing top-level key '{key}'");
    }
    let summary = &parsed["summary"];
    for key in ["eci_enabled", "sysbox_ok", "isolation_available", "recommended_action"] {
        assert!(summary.get(key).is_some(), "doctor JSON summary missing '{key}'");
    }
}
