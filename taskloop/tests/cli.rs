//! CLI tests: spawn the taskloop binary and check output and exit codes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use taskloop::exit_codes;
use taskloop::io::config::{DEFAULT_CONFIG_PATH, ExecutorConfig, LoopConfig, write_config};
use taskloop::test_support::doc;

fn taskloop(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskloop"))
        .current_dir(cwd)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn taskloop")
}

/// Config whose worker is `sh -c script` and with no inter-round delay.
fn write_worker_config(root: &Path, script: &str) {
    let config = LoopConfig {
        round_delay_ms: 0,
        round_timeout_secs: 10,
        executor: ExecutorConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        },
        ..LoopConfig::default()
    };
    write_config(&root.join(DEFAULT_CONFIG_PATH), &config).expect("write config");
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn new_document_shows_up_in_status() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = taskloop(temp.path(), &["new", "--title", "Ship auth", "--dir", "work"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let created = PathBuf::from(stdout(&out).trim());
    assert!(created.is_file());
    let name = created.file_name().expect("name").to_string_lossy().into_owned();
    assert!(name.starts_with("PRD-") && name.ends_with("-ship-auth.md"));
    assert!(temp.path().join(DEFAULT_CONFIG_PATH).is_file());

    let out = taskloop(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let text = stdout(&out);
    assert!(text.contains("Status: DRAFT | Loop: idle | Iteration: 0/128"));
    assert!(text.contains("[----------] 0/0"));

    let out = taskloop(temp.path(), &["status", "ship-auth"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(stdout(&out).contains(&name.trim_end_matches(".md").to_string()));
}

#[test]
fn pause_on_idle_document_is_refused() {
    let temp = tempfile::tempdir().expect("tempdir");
    doc("PRD-1").write(temp.path(), "PRD-1.md");
    let out = taskloop(temp.path(), &["pause", "PRD-1.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("loop is not running on PRD-1 (status: idle)"));
}

#[test]
fn stop_then_status_reports_stopped() {
    let temp = tempfile::tempdir().expect("tempdir");
    doc("PRD-1")
        .field("loop_status", "running")
        .write(temp.path(), "PRD-1.md");
    let out = taskloop(temp.path(), &["stop", "PRD-1.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let out = taskloop(temp.path(), &["status", "PRD-1.md"]);
    assert!(stdout(&out).contains("Loop: stopped"));
}

#[test]
fn run_exit_code_reflects_outcome() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_worker_config(temp.path(), "exit 0");

    doc("PRD-budget")
        .field("max_iterations", "1")
        .failing("ISC-AUTH-1", "login")
        .write(temp.path(), "PRD-budget.md");
    let out = taskloop(temp.path(), &["run", "PRD-budget.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
    let text = stdout(&out);
    assert!(text.contains("iter 1/1"));
    assert!(text.contains("Loop reached max iterations."));

    doc("PRD-blocked")
        .field("status", "BLOCKED")
        .failing("ISC-AUTH-1", "login")
        .write(temp.path(), "PRD-blocked.md");
    let out = taskloop(temp.path(), &["run", "PRD-blocked.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::BLOCKED));

    doc("PRD-done")
        .field("status", "COMPLETE")
        .passing("ISC-AUTH-1", "login")
        .write(temp.path(), "PRD-done.md");
    let out = taskloop(temp.path(), &["run", "PRD-done.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
}

#[test]
fn run_refuses_document_owned_by_another_loop() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_worker_config(temp.path(), "exit 0");
    doc("PRD-1")
        .field("loop_status", "running")
        .failing("ISC-AUTH-1", "login")
        .write(temp.path(), "PRD-1.md");
    let out = taskloop(temp.path(), &["run", "PRD-1.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("--force"));
}

#[test]
fn interactive_session_passes_through_exit_code_and_progress() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_worker_config(
        temp.path(),
        "sed 's/^- \\[ \\] ISC-AUTH-1:/- [x] ISC-AUTH-1:/' PRD-1.md > PRD-1.md.new && mv PRD-1.md.new PRD-1.md",
    );
    doc("PRD-1")
        .failing("ISC-AUTH-1", "login")
        .failing("ISC-DB-1", "schema")
        .write(temp.path(), "PRD-1.md");
    let out = taskloop(temp.path(), &["interactive", "PRD-1.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let text = stdout(&out);
    assert!(text.contains("Progress: 0/2"));
    assert!(text.contains("Session ended, 1/2 criteria passing"));

    write_worker_config(temp.path(), "exit 6");
    let out = taskloop(temp.path(), &["interactive", "PRD-1.md"]);
    assert_eq!(out.status.code(), Some(6));
    assert!(!stdout(&out).contains("Session ended"));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = taskloop(temp.path(), &["--config", "nope.toml", "status"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}
