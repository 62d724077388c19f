//! CLI tests for the `relay` binary.
//!
//! Spawns the binary in a temp project and checks printed state and exit
//! codes for the manual init → advance → done cycle.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use relay::exit_codes;
use relay::io::config::{BackendKind, RelayConfig, write_config};
use relay::io::paths::RelayPaths;
use relay::io::state_store::load_run_state;

fn relay(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_relay"))
        .current_dir(root)
        .args(args)
        .stdin(Stdio::null())
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn relay")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn init_then_status_shows_initial_stage() {
    let temp = tempfile::tempdir().expect("tempdir");

    let init = relay(temp.path(), &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK), "{}", stderr(&init));
    assert!(
        temp.path()
            .join(".relay/workflows/default/workflow.yml")
            .is_file()
    );

    let status = relay(temp.path(), &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    let out = stdout(&status);
    assert!(out.contains("Stage: working"), "{out}");
    assert!(out.contains("Active Role: worker"), "{out}");
}

#[test]
fn status_without_init_points_at_init() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = relay(temp.path(), &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&status).contains("relay init"));
}

#[test]
fn status_works_from_a_subdirectory() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init", "-t", "review"]);
    let nested = temp.path().join("src").join("deep");
    fs::create_dir_all(&nested).expect("mkdir");

    let status = relay(&nested, &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    assert!(stdout(&status).contains("Stage: drafting"));
}

#[test]
fn manual_review_cycle_reaches_done() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init", "--template", "review"]);
    let paths = RelayPaths::new(temp.path()).workflow("default");

    let next = relay(temp.path(), &["next"]);
    assert_eq!(next.status.code(), Some(exit_codes::OK));
    assert!(stdout(&next).contains("=== Prompt for: drafter (stage: drafting) ==="));

    let advance = relay(temp.path(), &["advance"]);
    assert_eq!(advance.status.code(), Some(exit_codes::OK), "{}", stderr(&advance));
    assert!(stdout(&advance).contains("drafter → review"));

    let reject = relay(temp.path(), &["advance", "--verdict", "Reject"]);
    assert_eq!(reject.status.code(), Some(exit_codes::OK), "{}", stderr(&reject));
    let state = load_run_state(&paths.state_path).expect("state");
    assert_eq!(state.stage(), "drafting");
    assert_eq!(state.iteration_count("drafting"), 1);
    assert!(stdout(&reject).contains("(verdict: reject, Explicit)"));

    relay(temp.path(), &["advance"]);
    fs::write(
        paths.artifacts_dir.join("review.md"),
        "# Review\n\n## Verdict: APPROVE\n",
    )
    .expect("write review");
    let approve = relay(temp.path(), &["advance"]);
    assert_eq!(approve.status.code(), Some(exit_codes::OK), "{}", stderr(&approve));
    assert!(stdout(&approve).contains("Workflow complete!"));

    let again = relay(temp.path(), &["advance"]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));
    assert!(stdout(&again).contains("already complete"));

    let status = relay(temp.path(), &["status"]);
    assert!(stdout(&status).contains("Status: DONE"));
}

#[test]
fn advance_rejects_unknown_verdict() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init", "-t", "review"]);
    relay(temp.path(), &["advance"]);

    let bad = relay(temp.path(), &["advance", "-v", "maybe"]);
    assert_eq!(bad.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&bad).contains("Available branches: approve, reject"));
}

#[test]
fn run_stops_with_limit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init", "-t", "review"]);
    for _ in 0..3 {
        relay(temp.path(), &["advance"]);
        relay(temp.path(), &["advance", "-v", "reject"]);
    }

    let run = relay(temp.path(), &["run"]);
    assert_eq!(run.status.code(), Some(exit_codes::LIMIT_REACHED), "{}", stderr(&run));
    let out = stdout(&run);
    assert!(out.contains("3/3"), "{out}");
    assert!(out.contains("--ignore-limits"));

    let status = relay(temp.path(), &["status"]);
    assert!(stdout(&status).contains("Warning: Iteration limit reached"));
}

#[cfg(unix)]
#[test]
fn run_with_command_backend_completes_minimal_workflow() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init"]);
    let config = RelayConfig {
        backend: BackendKind::Command,
        command: relay::io::config::CommandConfig {
            program: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /dev/null; printf 'finished\\n' > \"$RELAY_OUTPUT\"".to_string(),
            ],
        },
        ..RelayConfig::default()
    };
    write_config(&RelayPaths::new(temp.path()).config_path, &config).expect("config");

    let run = relay(temp.path(), &["run", "--loop"]);
    assert_eq!(run.status.code(), Some(exit_codes::OK), "{}", stderr(&run));
    assert!(stdout(&run).contains("Workflow complete after 1 step(s)."));

    let output = fs::read_to_string(
        temp.path()
            .join(".relay/workflows/default/artifacts/output.md"),
    )
    .expect("output");
    assert_eq!(output, "finished\n");
}

#[test]
fn validate_reports_graph_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init"]);

    let ok = relay(temp.path(), &["validate"]);
    assert_eq!(ok.status.code(), Some(exit_codes::OK));
    assert!(stdout(&ok).contains("Workflow is valid."));

    let workflow_path = temp.path().join(".relay/workflows/default/workflow.yml");
    let text = fs::read_to_string(&workflow_path).expect("read workflow");
    fs::write(&workflow_path, text.replace("next: done", "next: finished"))
        .expect("write workflow");

    let bad = relay(temp.path(), &["validate"]);
    assert_eq!(bad.status.code(), Some(exit_codes::INVALID));
    let out = stdout(&bad);
    assert!(out.contains("Found"), "{out}");
    assert!(out.contains("finished"), "{out}");
}

#[test]
fn reset_clean_keeps_context() {
    let temp = tempfile::tempdir().expect("tempdir");
    relay(temp.path(), &["init", "-t", "review"]);
    let paths = RelayPaths::new(temp.path()).workflow("default");
    fs::write(paths.artifacts_dir.join("draft.md"), "draft").expect("write");
    relay(temp.path(), &["advance"]);

    let reset = relay(temp.path(), &["reset", "--clean"]);
    assert_eq!(reset.status.code(), Some(exit_codes::OK));
    assert!(stdout(&reset).contains("1 artifact(s) removed"));
    assert!(paths.artifacts_dir.join("context.md").exists());
    assert!(!paths.artifacts_dir.join("draft.md").exists());
    assert_eq!(load_run_state(&paths.state_path).expect("state").stage(), "drafting");
}
