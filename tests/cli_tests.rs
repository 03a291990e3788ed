//! CLI integration tests using assert_cmd.
//!
//! None of these reach a panel: they cover help output, argument validation,
//! and the offline `status` / `reset` subcommands.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn rangefill() -> Command {
    let mut cmd = Command::cargo_bin("rangefill").unwrap();
    // keep the developer's environment out of the tests
    for var in [
        "RANGEFILL_BASE_URL",
        "RANGEFILL_USERNAME",
        "RANGEFILL_PASSWORD",
        "RANGEFILL_CONFIG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_shows_all_subcommands() {
    rangefill().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("reset"))
            .and(predicate::str::contains("check"))
            .and(predicate::str::contains("--base-url"))
            .and(predicate::str::contains("--progress-file")),
    );
}

#[test]
fn no_subcommand_is_an_error() {
    rangefill().assert().failure();
}

#[test]
fn status_without_progress_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    rangefill()
        .args(["--progress-file", path.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No saved progress"));
}

#[test]
fn status_prints_saved_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(
        &path,
        r#"{"last_batch_number": 7, "processed_ranges": ["R-1", "R-2"],
            "stats": {"successful": 2, "skipped": 0, "failed": 1},
            "last_saved": "2025-01-01T10:00:00"}"#,
    )
    .unwrap();

    rangefill()
        .args(["--progress-file", path.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"last_batch_number\": 7")
                .and(predicate::str::contains("R-2"))
                .and(predicate::str::contains("\"failed\": 1")),
        );
}

#[test]
fn status_reports_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, "{ nope").unwrap();

    rangefill()
        .args(["--progress-file", path.to_str().unwrap(), "status"])
        .assert()
        .failure();
}

#[test]
fn reset_removes_progress_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, r#"{"last_batch_number": 3}"#).unwrap();

    rangefill()
        .args(["--progress-file", path.to_str().unwrap(), "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared progress"));
    assert!(!path.exists());

    // idempotent
    rangefill()
        .args(["--progress-file", path.to_str().unwrap(), "reset"])
        .assert()
        .success();
}

#[test]
fn run_without_base_url_fails() {
    rangefill()
        .args(["--username", "u", "--password", "p", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("base_url"));
}

#[test]
fn run_without_credentials_fails() {
    rangefill()
        .args(["--base-url", "http://127.0.0.1:9/ints/", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("username is required"));
}

#[test]
fn run_rejects_zero_page_size() {
    rangefill()
        .args([
            "--base-url",
            "http://127.0.0.1:9/ints/",
            "--username",
            "u",
            "--password",
            "p",
            "--page-size",
            "0",
            "run",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("page_size"));
}

#[test]
fn missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    rangefill()
        .args([
            "--config",
            dir.path().join("absent.toml").to_str().unwrap(),
            "status",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn json_logs_stay_off_stdout() {
    let dir = tempfile::tempdir().unwrap();
    rangefill()
        .env("LOG_FORMAT", "json")
        .env("RUST_LOG", "info")
        .args([
            "--base-url",
            "http://127.0.0.1:9/ints/",
            "--username",
            "u",
            "--password",
            "p",
            "--progress-file",
            dir.path().join("progress.json").to_str().unwrap(),
            "run",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("rangefill starting"));
}

/// A panel that accepts the connection and never answers keeps the first
/// login in flight, so only a second interrupt can end the process early.
#[cfg(unix)]
#[test]
#[allow(deprecated)]
fn second_interrupt_exits_immediately() {
    use std::net::TcpListener;
    use std::process::{Command as StdCommand, Stdio};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (accepted_tx, accepted_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let conn = listener.accept();
        let _ = accepted_tx.send(());
        // hold the socket open without replying
        std::thread::sleep(Duration::from_secs(60));
        drop(conn);
    });

    let dir = tempfile::tempdir().unwrap();
    let mut child = StdCommand::new(assert_cmd::cargo::cargo_bin("rangefill"))
        .env_remove("RANGEFILL_CONFIG")
        .env_remove("RANGEFILL_BASE_URL")
        .args([
            "--base-url",
            &format!("http://127.0.0.1:{port}/ints/"),
            "--username",
            "u",
            "--password",
            "p",
            "--progress-file",
            dir.path().join("progress.json").to_str().unwrap(),
            "run",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    accepted_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let interrupt = |pid: u32| {
        let status = StdCommand::new("kill")
            .args(["-INT", &pid.to_string()])
            .status()
            .unwrap();
        assert!(status.success());
    };
    interrupt(child.id());
    std::thread::sleep(Duration::from_millis(300));
    assert!(child.try_wait().unwrap().is_none(), "first interrupt must not exit");
    interrupt(child.id());

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("process still running after second interrupt");
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(status.code(), Some(130));
}
