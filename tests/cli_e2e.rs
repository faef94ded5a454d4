use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use artipilot::transfer::normalize_path;

fn ap(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ap"))
        .args(args)
        .env("ARTIPILOT_HOME", home)
        .env_remove("ARTIPILOT_LOG")
        .output()
        .expect("failed to run ap")
}

fn summary(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!("stdout is not a summary ({}): {}", e, String::from_utf8_lossy(&out.stdout))
    })
}

#[test]
fn upload_reports_success_summary() {
    let home = tempfile::tempdir().unwrap();
    let srv = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("one.txt"), b"1").unwrap();
    fs::write(src.path().join("two.txt"), b"2").unwrap();
    let pattern = format!("{}/*.txt", normalize_path(&src.path().to_string_lossy(), false));
    let url = srv.path().to_string_lossy().into_owned();

    let out = ap(home.path(), &["upload", &pattern, "r/", "--url", &url, "--quiet"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v = summary(&out);
    assert_eq!(v["status"], "success");
    assert_eq!(v["totals"]["success"], 2);
    assert_eq!(v["totals"]["failure"], 0);

    let out = ap(home.path(), &["search", "r/*.txt", "--url", &url]);
    assert!(out.status.success());
    let items: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(items.as_array().map(|a| a.len()), Some(2));
}

#[test]
fn failures_exit_non_zero_and_are_logged() {
    let home = tempfile::tempdir().unwrap();
    let srv = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let url = srv.path().to_string_lossy().into_owned();
    let target = format!("{}/", normalize_path(&out_dir.path().to_string_lossy(), false));

    let out = ap(home.path(), &["download", "r/*", &target, "--build=missing/7", "--url", &url, "-q"]);
    assert_eq!(out.status.code(), Some(1));
    let v = summary(&out);
    assert_eq!(v["status"], "failure");
    assert_eq!(v["totals"]["failure"], 1);

    let logs: Vec<_> = fs::read_dir(home.path().join("logs"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("failures-"))
        .collect();
    assert_eq!(logs.len(), 1);
    let line = fs::read_to_string(logs[0].path()).unwrap();
    let rec: serde_json::Value = serde_json::from_str(line.lines().next().unwrap()).unwrap();
    assert_eq!(rec["variant"], "BuildNotFound");
}

#[test]
fn dry_run_changes_nothing() {
    let home = tempfile::tempdir().unwrap();
    let srv = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.bin"), b"a").unwrap();
    let pattern = format!("{}/a.bin", normalize_path(&src.path().to_string_lossy(), false));
    let url = srv.path().to_string_lossy().into_owned();

    let out = ap(home.path(), &["upload", &pattern, "r/", "--url", &url, "--dry-run", "-q"]);
    assert!(out.status.success());
    assert_eq!(summary(&out)["totals"]["success"], 1);
    assert!(!srv.path().join("r").join("a.bin").exists());
}

#[test]
fn missing_server_is_an_error() {
    let home = tempfile::tempdir().unwrap();
    let out = ap(home.path(), &["delete", "r/x", "-q"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
}
