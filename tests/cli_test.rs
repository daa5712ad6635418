//! Tests for the `envproxy` binary.

use serde_json::Value;
use std::process::Command;

fn envproxy(args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_envproxy"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run envproxy");
    (
        output.status.success(),
        String::from_utf8(output.stdout).expect("stdout is not UTF-8"),
    )
}

fn json_lines(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("line is not JSON"))
        .collect()
}

#[test]
fn test_list_shows_builtin_environments() {
    let (ok, stdout) = envproxy(&["list"]);
    assert!(ok);
    assert_eq!(
        stdout,
        "Environments:\n  - broken\n  - counter\n  - crashing\n  - faulty\n"
    );
}

#[test]
fn test_run_in_worker_process() {
    let (ok, stdout) = envproxy(&[
        "run", "--env", "counter", "--strategy", "process", "--steps", "3", "--action", "4",
    ]);
    assert!(ok);

    let lines = json_lines(&stdout);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["reset"], 0);
    assert_eq!(lines[3]["step"], 3);
    assert_eq!(lines[3]["result"]["observation"], 12);
    assert_eq!(lines[3]["result"]["done"], true);
}

#[test]
fn test_run_copies_side_by_side() {
    let (ok, stdout) = envproxy(&[
        "run", "--strategy", "thread", "--steps", "2", "--copies", "3",
    ]);
    assert!(ok);

    let lines = json_lines(&stdout);
    assert_eq!(lines.len(), 9);
    for copy in 0..3 {
        let last = &lines[6 + copy];
        assert_eq!(last["copy"], copy);
        assert_eq!(last["result"]["observation"], 2);
    }
}

#[test]
fn test_run_reports_raised_errors() {
    let (ok, _) = envproxy(&["run", "--env", "faulty", "--strategy", "inline", "--steps", "5"]);
    assert!(!ok);

    let (ok, _) = envproxy(&["run", "--env", "nowhere"]);
    assert!(!ok);
}
